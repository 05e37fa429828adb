//! Per-upload progress as an explicit state machine.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Idle,
    Hashing,
    Verifying,
    AwaitingAiCollaborator,
    SwitchingNetwork,
    Notarizing,
    Confirmed,
    Rejected,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Confirmed | Stage::Rejected | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Start,
    Hashed,
    HeuristicsPassed { consult_ai: bool },
    HeuristicsFailed,
    AiApproved,
    AiRejected,
    NetworkReady,
    /// Receipt confirmed, or the ledger already holds the record.
    Anchored,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: Stage,
    pub event: StageEvent,
}

/// Pure transition function.
pub fn transition(from: Stage, event: StageEvent) -> Result<Stage, InvalidTransition> {
    use Stage::*;
    use StageEvent as E;

    let to = match (from, event) {
        (Idle, E::Start) => Hashing,
        (Hashing, E::Hashed) => Verifying,
        (Verifying, E::HeuristicsPassed { consult_ai: true }) => AwaitingAiCollaborator,
        (Verifying, E::HeuristicsPassed { consult_ai: false }) => SwitchingNetwork,
        (Verifying, E::HeuristicsFailed) => Rejected,
        (AwaitingAiCollaborator, E::AiApproved) => SwitchingNetwork,
        (AwaitingAiCollaborator, E::AiRejected) => Rejected,
        (SwitchingNetwork, E::NetworkReady) => Notarizing,
        (Notarizing, E::Anchored) => Confirmed,
        (s, E::Failed) if !s.is_terminal() && s != Idle => Failed,
        _ => return Err(InvalidTransition { from, event }),
    };
    Ok(to)
}

/// Current stage plus the path taken to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTrail {
    current: Stage,
    visited: Vec<Stage>,
}

impl Default for StageTrail {
    fn default() -> Self {
        Self {
            current: Stage::Idle,
            visited: vec![Stage::Idle],
        }
    }
}

impl StageTrail {
    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn visited(&self) -> &[Stage] {
        &self.visited
    }

    pub fn apply(&mut self, event: StageEvent) -> Result<Stage, InvalidTransition> {
        let next = transition(self.current, event)?;
        self.current = next;
        self.visited.push(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_with_ai() {
        let mut trail = StageTrail::default();
        for event in [
            StageEvent::Start,
            StageEvent::Hashed,
            StageEvent::HeuristicsPassed { consult_ai: true },
            StageEvent::AiApproved,
            StageEvent::NetworkReady,
            StageEvent::Anchored,
        ] {
            trail.apply(event).unwrap();
        }
        assert_eq!(trail.current(), Stage::Confirmed);
        assert_eq!(
            trail.visited(),
            &[
                Stage::Idle,
                Stage::Hashing,
                Stage::Verifying,
                Stage::AwaitingAiCollaborator,
                Stage::SwitchingNetwork,
                Stage::Notarizing,
                Stage::Confirmed
            ]
        );
    }

    #[test]
    fn rejection_never_reaches_ledger_stages() {
        assert_eq!(transition(Stage::Verifying, StageEvent::HeuristicsFailed), Ok(Stage::Rejected));
        assert!(transition(Stage::Rejected, StageEvent::NetworkReady).is_err());
        assert!(transition(Stage::Verifying, StageEvent::NetworkReady).is_err());
    }

    #[test]
    fn failure_only_from_active_stages() {
        assert_eq!(transition(Stage::Notarizing, StageEvent::Failed), Ok(Stage::Failed));
        assert_eq!(transition(Stage::SwitchingNetwork, StageEvent::Failed), Ok(Stage::Failed));
        assert!(transition(Stage::Idle, StageEvent::Failed).is_err());
        assert!(transition(Stage::Confirmed, StageEvent::Failed).is_err());
    }

    #[test]
    fn terminal_stages_accept_no_further_events() {
        let events = [
            StageEvent::Start,
            StageEvent::Hashed,
            StageEvent::HeuristicsPassed { consult_ai: false },
            StageEvent::HeuristicsFailed,
            StageEvent::AiApproved,
            StageEvent::AiRejected,
            StageEvent::NetworkReady,
            StageEvent::Anchored,
            StageEvent::Failed,
        ];
        for stage in [Stage::Confirmed, Stage::Rejected, Stage::Failed] {
            for event in events {
                assert!(transition(stage, event).is_err(), "{stage} accepted {event:?}");
            }
        }
    }
}
