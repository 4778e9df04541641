//! Session lifecycle state.

use serde::Serialize;

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Error,
    Canceled,
}

/// Where an export returns once it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum ReturnState {
    Idle,
    Running,
    Paused,
    Terminal(Outcome),
}

impl ReturnState {
    pub fn into_state(self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Running => SessionState::Running,
            Self::Paused => SessionState::Paused,
            Self::Terminal(outcome) => SessionState::Terminal(outcome),
        }
    }

    /// Target after a failed export.
    pub fn after_failure(self) -> Self {
        match self {
            Self::Terminal(_) => Self::Terminal(Outcome::Error),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    /// Capture is stopped; waiting for the last segment and any room
    /// builds before the preview is emitted.
    FinishPending {
        pause_after: bool,
        awaiting_capture: bool,
    },
    Paused,
    /// Tracking runs against a saved world map and the timeout is armed.
    /// Only entered once a map was actually loaded.
    Relocalizing {
        attempt: u64,
    },
    Exporting {
        return_to: ReturnState,
    },
    Terminal(Outcome),
}

impl SessionState {
    /// `Idle` and `Terminal(_)` are the states a session rests in between scans.
    pub fn is_resting(&self) -> bool {
        matches!(self, Self::Idle | Self::Terminal(_))
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_exporting(&self) -> bool {
        matches!(self, Self::Exporting { .. })
    }

    /// Capture engine is expected to be live.
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Running | Self::FinishPending { .. })
    }

    /// The state an export started from here should come back to.
    pub fn return_point(&self) -> Option<ReturnState> {
        match self {
            Self::Idle => Some(ReturnState::Idle),
            Self::Running => Some(ReturnState::Running),
            Self::Paused => Some(ReturnState::Paused),
            Self::Terminal(outcome) => Some(ReturnState::Terminal(*outcome)),
            Self::FinishPending { .. } | Self::Relocalizing { .. } | Self::Exporting { .. } => {
                None
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::FinishPending { .. } => "finish_pending",
            Self::Paused => "paused",
            Self::Relocalizing { .. } => "relocalizing",
            Self::Exporting { .. } => "exporting",
            Self::Terminal(_) => "terminal",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
