//! Pure notify-behavior decision table (spec.md §4.5). Kept free of any
//! store/notifier side effects so it can be exhaustively unit-tested.

use crate::domain::{Execution, ExecutionStatus, NotifyBehavior, Task};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyDecision {
    pub should_deliver: bool,
    pub should_pause: bool,
}

impl NotifyDecision {
    fn none() -> Self {
        Self {
            should_deliver: false,
            should_pause: false,
        }
    }
}

/// Decide whether to deliver a notification and/or pause the task's
/// schedule for one completed execution (spec.md §4.5 table).
///
/// Failed executions never deliver and never pause, regardless of
/// `notify_behavior`.
pub fn apply_notify_behavior(task: &Task, execution: &Execution) -> NotifyDecision {
    if execution.status != ExecutionStatus::Success {
        return NotifyDecision::none();
    }
    let condition_met = execution.condition_met.unwrap_or(false);

    match task.notify_behavior {
        NotifyBehavior::Once => {
            if condition_met {
                NotifyDecision {
                    should_deliver: true,
                    should_pause: true,
                }
            } else {
                NotifyDecision::none()
            }
        }
        NotifyBehavior::Always => NotifyDecision {
            should_deliver: condition_met,
            should_pause: false,
        },
        NotifyBehavior::TrackState => {
            // `change_summary` is null on the first observation and on an
            // unchanged snapshot (executor.rs), so this is naturally silent
            // in both cases without consulting `last_execution_id`.
            let changed = execution
                .change_summary
                .as_ref()
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            NotifyDecision {
                should_deliver: changed,
                should_pause: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn task(behavior: NotifyBehavior, has_prior_execution: bool) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "T".into(),
            schedule: "*/1 * * * *".into(),
            search_query: "q".into(),
            condition_description: "c".into(),
            notify_behavior: behavior,
            config: HashMap::new(),
            is_active: true,
            last_execution_id: has_prior_execution.then(Uuid::new_v4),
            last_known_state: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn success(condition_met: bool, change_summary: Option<&str>) -> Execution {
        let mut e = Execution::pending(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        e.status = ExecutionStatus::Success;
        e.condition_met = Some(condition_met);
        e.change_summary = change_summary.map(|s| s.to_string());
        e
    }

    #[test]
    fn once_behavior_delivers_and_pauses_on_first_match() {
        let t = task(NotifyBehavior::Once, true);
        let e = success(true, None);
        let decision = apply_notify_behavior(&t, &e);
        assert_eq!(
            decision,
            NotifyDecision {
                should_deliver: true,
                should_pause: true
            }
        );
    }

    #[test]
    fn once_behavior_is_silent_when_condition_not_met() {
        let t = task(NotifyBehavior::Once, true);
        let e = success(false, None);
        assert_eq!(apply_notify_behavior(&t, &e), NotifyDecision::none());
    }

    #[test]
    fn always_behavior_repeats_without_pausing() {
        let t = task(NotifyBehavior::Always, true);
        let e = success(true, None);
        let decision = apply_notify_behavior(&t, &e);
        assert_eq!(
            decision,
            NotifyDecision {
                should_deliver: true,
                should_pause: false
            }
        );
    }

    #[test]
    fn track_state_is_silent_on_unchanged_snapshot() {
        let t = task(NotifyBehavior::TrackState, true);
        let e = success(true, Some(""));
        assert_eq!(apply_notify_behavior(&t, &e), NotifyDecision::none());
    }

    #[test]
    fn track_state_delivers_on_changed_snapshot() {
        let t = task(NotifyBehavior::TrackState, true);
        let e = success(true, Some("Release date announced."));
        let decision = apply_notify_behavior(&t, &e);
        assert!(decision.should_deliver);
        assert!(!decision.should_pause);
    }

    #[test]
    fn failed_execution_never_delivers_or_pauses() {
        for behavior in [NotifyBehavior::Once, NotifyBehavior::Always, NotifyBehavior::TrackState] {
            let t = task(behavior, true);
            let mut e = success(true, Some("Release date announced."));
            e.status = ExecutionStatus::Failed;
            assert_eq!(apply_notify_behavior(&t, &e), NotifyDecision::none());
        }
    }
}
