//! Live Voice: realtime voice conversation and generative media core.
//!
//! Talks to the host UI via JSON-line IPC on stdin/stdout. This is the entry
//! point that initializes all subsystems and runs the main event loop.

mod audio;
mod config;
mod conversation;
mod error;
mod ipc;
mod logging;
mod oplog;
mod playback;
mod provider;
mod session;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use audio::{list_input_devices, list_output_devices, DeviceBackend};
use config::paths::get_assets_dir;
use config::read_app_config;
use conversation::Conversation;
use error::VoiceError;
use ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use ipc::{AudioDeviceInfo, VoiceCommand, VoiceEvent};
use oplog::SharedOperationLog;
use provider::GeminiClient;
use session::GeminiLiveConnector;

/// How often finished playback sources are reaped.
const REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Shared handles for provider calls spawned off the main loop.
struct Services {
    client: Arc<GeminiClient>,
    oplog: SharedOperationLog,
}

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init() {
        logging::init_stderr_only();
        warn!("File logging unavailable: {:#}", e);
    }

    // Emit starting event immediately so the host knows we're alive.
    emit_event(&VoiceEvent::Starting {});

    let app_config = read_app_config();
    info!(
        voice_model = %app_config.models.voice,
        voice = %app_config.voice.voice_name,
        has_api_key = app_config.resolve_api_key().is_some(),
        "Configuration loaded"
    );
    if app_config.resolve_api_key().is_none() {
        warn!("No API key configured; provider calls will fail");
    }

    let services = Services {
        client: Arc::new(GeminiClient::new(&app_config, get_assets_dir())),
        oplog: oplog::shared(),
    };

    let backend = DeviceBackend::new(
        app_config.audio.input_device.clone(),
        app_config.audio.output_device.clone(),
        app_config.audio.volume,
    );
    let mut conversation = Conversation::new(
        Box::new(GeminiLiveConnector),
        Box::new(backend),
        app_config.session_config(),
        Arc::clone(&services.oplog),
    );
    conversation.on_state_change(Box::new(|state| {
        emit_event(&VoiceEvent::SessionState {
            state: state.to_string(),
        });
    }));

    let mut cmd_rx = spawn_stdin_reader();
    let mut reap = tokio::time::interval(REAP_INTERVAL);
    reap.set_missed_tick_behavior(MissedTickBehavior::Skip);

    emit_event(&VoiceEvent::Ready {});
    info!("Live voice core ready");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(command, &mut conversation, &mut cmd_rx, &services).await {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            event = conversation.next_event() => {
                if let Err(e) = conversation.handle_event(event) {
                    emit_error(&e.to_string());
                }
            }
            _ = reap.tick() => {
                conversation.reap_finished();
            }
        }
    }

    conversation.stop();
    info!("Live voice core shutting down");
}

/// Handle a single command from the host.
/// Returns `false` if the main loop should exit.
async fn handle_command(
    cmd: VoiceCommand,
    conversation: &mut Conversation,
    cmd_rx: &mut mpsc::UnboundedReceiver<VoiceCommand>,
    services: &Services,
) -> bool {
    match cmd {
        VoiceCommand::Stop {} => {
            emit_event(&VoiceEvent::Stopping {});
            conversation.stop();
            return false;
        }
        VoiceCommand::StartSession {} => {
            return start_session(conversation, cmd_rx, services).await;
        }
        VoiceCommand::StopSession {} => {
            conversation.stop();
        }
        other => handle_service_command(other, services),
    }
    true
}

/// Open a live session while still serving commands. `stop_session` or
/// `stop` cancels the handshake. Returns `false` if the main loop should exit.
async fn start_session(
    conversation: &mut Conversation,
    cmd_rx: &mut mpsc::UnboundedReceiver<VoiceCommand>,
    services: &Services,
) -> bool {
    // Pick up persona or key changes made since launch.
    conversation.set_config(read_app_config().session_config());

    let mut keep_running = true;
    let cancelled = {
        let start = conversation.start();
        tokio::pin!(start);
        loop {
            tokio::select! {
                result = &mut start => {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to start live session");
                        emit_error(&e.to_string());
                    }
                    break false;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(VoiceCommand::StopSession {}) => break true,
                    Some(VoiceCommand::Stop {}) => {
                        emit_event(&VoiceEvent::Stopping {});
                        keep_running = false;
                        break true;
                    }
                    Some(VoiceCommand::StartSession {}) => {
                        emit_error(&VoiceError::SessionActive.to_string());
                    }
                    Some(other) => handle_service_command(other, services),
                    None => {
                        info!("stdin closed while opening session");
                        keep_running = false;
                        break true;
                    }
                },
            }
        }
    };

    if cancelled {
        conversation.stop();
    }
    keep_running
}

/// Commands that never touch the live session.
fn handle_service_command(cmd: VoiceCommand, services: &Services) {
    match cmd {
        VoiceCommand::Ping {} => {
            emit_event(&VoiceEvent::Pong {});
        }

        VoiceCommand::ListAudioDevices {} => {
            emit_event(&VoiceEvent::AudioDevices {
                input: AudioDeviceInfo::from_names(list_input_devices()),
                output: AudioDeviceInfo::from_names(list_output_devices()),
            });
        }

        VoiceCommand::Chat { message } => {
            let client = Arc::clone(&services.client);
            spawn_tracked(
                services,
                "gemini.chatWithGrounding".to_string(),
                async move { client.chat_with_grounding(&message).await },
                |answer| VoiceEvent::ChatResponse {
                    text: answer.text,
                    sources: answer.sources,
                },
            );
        }

        VoiceCommand::GenerateImage { prompt, pro } => {
            let client = Arc::clone(&services.client);
            let method = format!("gemini.generateImage ({})", if pro { "Pro" } else { "Fast" });
            spawn_tracked(
                services,
                method,
                async move { client.generate_image(&prompt, pro).await },
                move |data_url| VoiceEvent::ImageGenerated { data_url, pro },
            );
        }

        VoiceCommand::GenerateVideo { prompt, aspect_ratio } => {
            let client = Arc::clone(&services.client);
            spawn_tracked(
                services,
                "veo.generateVideo".to_string(),
                async move { client.generate_video(&prompt, &aspect_ratio).await },
                |path| VoiceEvent::VideoGenerated {
                    path: path.display().to_string(),
                },
            );
        }

        VoiceCommand::MapSearch { query, lat, lng } => {
            let client = Arc::clone(&services.client);
            spawn_tracked(
                services,
                "gemini.mapsGrounding".to_string(),
                async move { client.map_grounding(&query, lat, lng).await },
                |answer| VoiceEvent::MapResponse {
                    text: answer.text,
                    sources: answer.sources,
                },
            );
        }

        VoiceCommand::GetLogs {} => {
            emit_event(&VoiceEvent::OperationLogs {
                entries: oplog::snapshot(&services.oplog),
            });
        }

        VoiceCommand::Stop {} | VoiceCommand::StartSession {} | VoiceCommand::StopSession {} => {
            warn!("Session command reached the service handler; ignoring");
        }
    }
}

/// Run a provider call off the main loop, recording it in the operation log
/// and emitting either its result event or an error event.
fn spawn_tracked<T, F, E>(services: &Services, method: String, call: F, into_event: E)
where
    T: Send + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    E: FnOnce(T) -> VoiceEvent + Send + 'static,
{
    let log = Arc::clone(&services.oplog);
    tokio::spawn(async move {
        match oplog::track(&log, &method, call).await {
            Ok(value) => emit_event(&into_event(value)),
            Err(e) => {
                error!(method = %method, "Provider call failed: {:#}", e);
                emit_error(&format!("{} failed: {}", method, e));
            }
        }
    });
}
