//! Atomic session state machine.
//!
//! `Idle -> Opening -> Open -> Closing -> Idle`, with `Errored` reachable
//! from `Opening` or `Open`. Shared between the main loop and anything that
//! reports status, so transitions are compare-and-swap on an `AtomicU8`.
//! An optional observer sees every transition that succeeds.

use std::sync::atomic::{AtomicU8, Ordering};

/// Live session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No session. The only state a new session may be opened from.
    Idle = 0,
    /// Devices acquired, transport handshake in flight.
    Opening = 1,
    /// Handshake complete; audio flows both ways.
    Open = 2,
    /// Teardown in progress after a user stop or remote close.
    Closing = 3,
    /// A failure occurred; resources are being released.
    Errored = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Errored,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Opening => write!(f, "opening"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Called with the new state after each successful transition.
pub type StateObserver = Box<dyn Fn(SessionState) + Send + Sync>;

pub struct SessionStateMachine {
    state: AtomicU8,
    observer: Option<StateObserver>,
}

impl std::fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("state", &self.current())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Idle as u8),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: StateObserver) {
        self.observer = Some(observer);
    }

    pub fn current(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            if let Some(observer) = &self.observer {
                observer(to);
            }
        }
        moved
    }

    /// Idle -> Opening. Fails in every other state.
    pub fn begin_opening(&self) -> bool {
        self.transition(SessionState::Idle, SessionState::Opening)
    }

    /// Opening -> Open.
    pub fn mark_open(&self) -> bool {
        self.transition(SessionState::Opening, SessionState::Open)
    }

    /// Open -> Closing.
    pub fn begin_closing(&self) -> bool {
        self.transition(SessionState::Open, SessionState::Closing)
    }

    /// Opening or Open -> Errored.
    pub fn fail(&self) -> bool {
        self.transition(SessionState::Opening, SessionState::Errored)
            || self.transition(SessionState::Open, SessionState::Errored)
    }

    /// Closing or Errored -> Idle, once resources are released.
    pub fn finish(&self) -> bool {
        self.transition(SessionState::Closing, SessionState::Idle)
            || self.transition(SessionState::Errored, SessionState::Idle)
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
