//! Phase state machine.
//!
//! A session moves through planning, implementation and review once per
//! phase, then finalizes back to idle. All changes to the current state go
//! through [`transition`]; any pair not in the table is rejected and the
//! caller keeps its old state.
//!
//! ```text
//! IDLE ──plan──▶ PLANNING ──implement──▶ IMPLEMENTING ──review──▶ REVIEWING
//!   ▲                ▲                                               │
//!   │                └──────────────────plan─────────────────────────┤
//!   │                                                                │
//!   └──────finalize────── FINALIZING ◀──────────finalize─────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Development state of a generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevState {
    #[default]
    Idle,
    Planning,
    Implementing,
    Reviewing,
    Finalizing,
}

impl DevState {
    pub const ALL: [DevState; 5] = [
        Self::Idle,
        Self::Planning,
        Self::Implementing,
        Self::Reviewing,
        Self::Finalizing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Planning => "PLANNING",
            Self::Implementing => "IMPLEMENTING",
            Self::Reviewing => "REVIEWING",
            Self::Finalizing => "FINALIZING",
        }
    }

    /// Check whether `action` is legal from this state.
    pub fn allows(&self, action: DevAction) -> bool {
        transition(*self, action).is_ok()
    }
}

impl std::fmt::Display for DevState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A state-changing action. Each maps to one mutating tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevAction {
    PlanNextPhase,
    ImplementCurrentPhase,
    ReviewAndFix,
    Finalize,
}

impl DevAction {
    pub const ALL: [DevAction; 4] = [
        Self::PlanNextPhase,
        Self::ImplementCurrentPhase,
        Self::ReviewAndFix,
        Self::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanNextPhase => "plan the next phase",
            Self::ImplementCurrentPhase => "implement the current phase",
            Self::ReviewAndFix => "review and fix code",
            Self::Finalize => "finalize the project",
        }
    }
}

impl std::fmt::Display for DevAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compute the state reached by applying `action` in `from`.
pub fn transition(from: DevState, action: DevAction) -> CoreResult<DevState> {
    use DevAction::*;
    use DevState::*;

    match (from, action) {
        (Idle | Reviewing, PlanNextPhase) => Ok(Planning),
        (Planning, ImplementCurrentPhase) => Ok(Implementing),
        (Implementing, ReviewAndFix) => Ok(Reviewing),
        (Reviewing, Finalize) => Ok(Finalizing),
        (Finalizing, Finalize) => Ok(Idle),
        (from, action) => Err(CoreError::InvalidTransition { from, action }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert_eq!(transition(DevState::Idle, DevAction::PlanNextPhase).unwrap(), DevState::Planning);
        assert_eq!(
            transition(DevState::Planning, DevAction::ImplementCurrentPhase).unwrap(),
            DevState::Implementing
        );
        assert_eq!(
            transition(DevState::Implementing, DevAction::ReviewAndFix).unwrap(),
            DevState::Reviewing
        );
        assert_eq!(
            transition(DevState::Reviewing, DevAction::PlanNextPhase).unwrap(),
            DevState::Planning
        );
        assert_eq!(
            transition(DevState::Reviewing, DevAction::Finalize).unwrap(),
            DevState::Finalizing
        );
        assert_eq!(transition(DevState::Finalizing, DevAction::Finalize).unwrap(), DevState::Idle);
    }

    #[test]
    fn test_every_other_pair_is_rejected() {
        let legal = [
            (DevState::Idle, DevAction::PlanNextPhase),
            (DevState::Reviewing, DevAction::PlanNextPhase),
            (DevState::Planning, DevAction::ImplementCurrentPhase),
            (DevState::Implementing, DevAction::ReviewAndFix),
            (DevState::Reviewing, DevAction::Finalize),
            (DevState::Finalizing, DevAction::Finalize),
        ];

        for state in DevState::ALL {
            for action in DevAction::ALL {
                let result = transition(state, action);
                if legal.contains(&(state, action)) {
                    assert!(result.is_ok(), "{} / {:?} should be legal", state, action);
                } else {
                    let err = result.unwrap_err();
                    assert!(err.is_state_error(), "{} / {:?}", state, action);
                }
            }
        }
    }

    #[test]
    fn test_state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&DevState::Implementing).unwrap(), "\"IMPLEMENTING\"");
        let parsed: DevState = serde_json::from_str("\"REVIEWING\"").unwrap();
        assert_eq!(parsed, DevState::Reviewing);
    }
}
