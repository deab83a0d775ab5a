//! Per-item pipeline state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Pipeline stage of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Created, not yet started.
    #[default]
    Queued,
    /// Resolving canonical metadata.
    Probing,
    /// A cached delivery reference exists for the content.
    CacheHit,
    /// Retrieving the media; holds a limiter slot.
    Fetching,
    /// Embedding cover art and tags.
    PostProcessing,
    /// Handing the artifact (or cached reference) to the delivery surface.
    Delivering,
    Done,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Probing => "PROBING",
            Self::CacheHit => "CACHE_HIT",
            Self::Fetching => "FETCHING",
            Self::PostProcessing => "POST_PROCESSING",
            Self::Delivering => "DELIVERING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Validate a state transition.
    ///
    /// `Delivering -> Fetching` is the stale-cache fallback: a cached reference was
    /// rejected by the delivery surface and the item is fetched from scratch.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;

        match (self, target) {
            (from, _) if from.is_terminal() => false,
            (_, Failed | Cancelled) => true,
            (Queued, Probing) => true,
            (Probing, CacheHit | Fetching) => true,
            (CacheHit, Delivering) => true,
            (Fetching, PostProcessing) => true,
            (PostProcessing, Delivering) => true,
            (Delivering, Done | Fetching) => true,
            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: Stage) -> Result<Stage, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Stage::Queued,
            Stage::Probing,
            Stage::Fetching,
            Stage::PostProcessing,
            Stage::Delivering,
            Stage::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_cache_hit_path() {
        assert!(Stage::Probing.can_transition_to(Stage::CacheHit));
        assert!(Stage::CacheHit.can_transition_to(Stage::Delivering));
        assert!(!Stage::CacheHit.can_transition_to(Stage::Fetching));
        assert!(!Stage::CacheHit.can_transition_to(Stage::PostProcessing));
        // stale fallback goes to Fetching, never back to Probing
        assert!(Stage::Delivering.can_transition_to(Stage::Fetching));
        assert!(!Stage::Delivering.can_transition_to(Stage::Probing));
    }

    #[test]
    fn test_failure_and_cancel_from_every_active_stage() {
        for stage in [
            Stage::Queued,
            Stage::Probing,
            Stage::CacheHit,
            Stage::Fetching,
            Stage::PostProcessing,
            Stage::Delivering,
        ] {
            assert!(stage.can_transition_to(Stage::Failed));
            assert!(stage.can_transition_to(Stage::Cancelled));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [Stage::Done, Stage::Failed, Stage::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Stage::Cancelled));
            assert!(!terminal.can_transition_to(Stage::Probing));
        }
    }

    #[test]
    fn test_transition_to_rejects_skips() {
        assert!(Stage::Queued.transition_to(Stage::Fetching).is_err());
        assert_eq!(
            Stage::Queued.transition_to(Stage::Probing).unwrap(),
            Stage::Probing
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Stage::PostProcessing).unwrap();
        assert_eq!(json, "\"POST_PROCESSING\"");
    }
}
