//! State reconciliation
//!
//! Maps (observed state, caller flags) to the minimum sufficient action.
//! `pull` alone never forces recreation; it makes the feature resolver
//! re-fetch sources and the derived-image build run, which the caller wires
//! through separately.

use crate::state::ContainerState;
use std::fmt;

/// Caller flags influencing reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileFlags {
    pub recreate: bool,
    pub rebuild: bool,
    pub pull: bool,
}

/// The chosen action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Environment is already as desired
    None,
    /// Start the existing container
    Start,
    /// Create a new container
    Create,
    /// Remove the existing container, then create
    Recreate,
    /// Rebuild the image, then remove and create
    Rebuild,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::None => write!(f, "none"),
            Action::Start => write!(f, "start"),
            Action::Create => write!(f, "create"),
            Action::Recreate => write!(f, "recreate"),
            Action::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// Decide the action for an observed state and caller flags.
pub fn decide(state: ContainerState, flags: ReconcileFlags) -> Action {
    match state {
        ContainerState::Absent => Action::Create,
        ContainerState::Broken | ContainerState::Stale => Action::Recreate,
        ContainerState::Created => {
            if flags.rebuild {
                Action::Rebuild
            } else if flags.recreate {
                Action::Recreate
            } else {
                Action::Start
            }
        }
        ContainerState::Running => {
            if flags.rebuild {
                Action::Rebuild
            } else if flags.recreate {
                Action::Recreate
            } else {
                Action::None
            }
        }
    }
}
