//! The legal status-transition table and its guards.
//!
//! This is the pure core of the state machine: no side effects, no I/O.
//! Repository writes enforce the same table again via conditional updates
//! (`transition_status` only claims the row when the stored status is still
//! one of the expected source states), so an illegal transition can neither
//! be requested nor raced into.

use super::model::BroadcastStatus;
use crate::error::StateError;

/// Whether `from -> to` appears in the transition table.
///
/// | from                               | to          |
/// |------------------------------------|-------------|
/// | draft, scheduled                   | sending     |
/// | sending                            | paused      |
/// | paused                             | sending     |
/// | sending, paused                    | completed   |
/// | sending                            | failed      |
/// | draft, scheduled, sending, paused  | cancelled   |
///
/// `paused -> completed` covers resuming a broadcast whose pending set has
/// already drained. Everything else is illegal, including any transition out
/// of a terminal state.
pub fn is_legal_transition(from: BroadcastStatus, to: BroadcastStatus) -> bool {
    use BroadcastStatus::*;
    matches!(
        (from, to),
        (Draft, Sending)
            | (Scheduled, Sending)
            | (Sending, Paused)
            | (Paused, Sending)
            | (Sending, Completed)
            | (Paused, Completed)
            | (Sending, Failed)
            | (Draft, Cancelled)
            | (Scheduled, Cancelled)
            | (Sending, Cancelled)
            | (Paused, Cancelled)
    )
}

/// Check a transition, naming the current status and rejected target on failure.
pub fn check_transition(from: BroadcastStatus, to: BroadcastStatus) -> Result<(), StateError> {
    if is_legal_transition(from, to) {
        Ok(())
    } else {
        Err(StateError::Transition {
            current: from,
            target: to,
        })
    }
}

/// Name, template, and schedule edits are only allowed before sending starts.
pub fn can_edit(status: BroadcastStatus) -> bool {
    matches!(
        status,
        BroadcastStatus::Draft | BroadcastStatus::Scheduled
    )
}

/// Deletion is only allowed while nothing is (or could still be) in flight.
pub fn can_delete(status: BroadcastStatus) -> bool {
    matches!(
        status,
        BroadcastStatus::Draft
            | BroadcastStatus::Scheduled
            | BroadcastStatus::Cancelled
            | BroadcastStatus::Failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use BroadcastStatus::*;

    const ALL: [BroadcastStatus; 7] =
        [Draft, Scheduled, Sending, Paused, Completed, Cancelled, Failed];

    #[test]
    fn test_legal_transitions_match_table() {
        let legal = [
            (Draft, Sending),
            (Scheduled, Sending),
            (Sending, Paused),
            (Paused, Sending),
            (Sending, Completed),
            (Paused, Completed),
            (Sending, Failed),
            (Draft, Cancelled),
            (Scheduled, Cancelled),
            (Sending, Cancelled),
            (Paused, Cancelled),
        ];

        for from in ALL {
            for to in ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    is_legal_transition(from, to),
                    expected,
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [Completed, Cancelled, Failed] {
            for to in ALL {
                assert!(!is_legal_transition(from, to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_cancelled_to_sending_rejected_with_both_statuses() {
        let err = check_transition(Cancelled, Sending).unwrap_err();
        match err {
            StateError::Transition { current, target } => {
                assert_eq!(current, Cancelled);
                assert_eq!(target, Sending);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_edit_only_before_sending() {
        assert!(can_edit(Draft));
        assert!(can_edit(Scheduled));
        for status in [Sending, Paused, Completed, Cancelled, Failed] {
            assert!(!can_edit(status), "{status}");
        }
    }

    #[test]
    fn test_delete_only_in_inactive_states() {
        assert!(can_delete(Draft));
        assert!(can_delete(Scheduled));
        assert!(can_delete(Cancelled));
        assert!(can_delete(Failed));
        for status in [Sending, Paused, Completed] {
            assert!(!can_delete(status), "{status}");
        }
    }
}
