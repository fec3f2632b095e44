//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use crate::db::Role;
use proptest::prelude::*;
use std::collections::{HashSet, VecDeque};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_state() -> impl Strategy<Value = ConvState> {
    proptest::sample::select(ConvState::ALL.to_vec())
}

fn arb_event_type() -> impl Strategy<Value = EventType> {
    proptest::sample::select(EventType::ALL.to_vec())
}

/// Event types whose transition keeps the current state
fn is_state_preserving(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::UserMessageCreated
            | EventType::AssistantMessageCreated
            | EventType::LeadIdentityDecisionRecorded
    )
}

fn reachable_from(start: ConvState) -> HashSet<ConvState> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(state) = queue.pop_front() {
        for event_type in EventType::ALL {
            let next = transition(state, event_type).next;
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_transition_is_deterministic(state in arb_state(), event_type in arb_event_type()) {
        prop_assert_eq!(transition(state, event_type), transition(state, event_type));
    }

    #[test]
    fn prop_preserving_events_keep_state(state in arb_state(), event_type in arb_event_type()) {
        let t = transition(state, event_type);
        if is_state_preserving(event_type) {
            prop_assert_eq!(t.next, state);
        }
    }

    #[test]
    fn prop_state_changing_events_ignore_current_state(
        a in arb_state(),
        b in arb_state(),
        event_type in arb_event_type(),
    ) {
        if !is_state_preserving(event_type) {
            prop_assert_eq!(transition(a, event_type), transition(b, event_type));
        }
    }

    /// Final state after any sequence equals the state set by the last
    /// state-changing event in it.
    #[test]
    fn prop_sequence_folds_to_last_state_change(
        start in arb_state(),
        events in proptest::collection::vec(arb_event_type(), 0..40),
    ) {
        let folded = events.iter().fold(start, |s, e| transition(s, *e).next);
        let expected = events
            .iter()
            .rev()
            .find(|e| !is_state_preserving(**e))
            .map_or(start, |e| transition(start, *e).next);
        prop_assert_eq!(folded, expected);
    }

    #[test]
    fn prop_message_effect_matches_role(state in arb_state()) {
        prop_assert_eq!(
            transition(state, EventType::UserMessageCreated).effect,
            Effect::UpsertMessage(Role::User)
        );
        prop_assert_eq!(
            transition(state, EventType::AssistantMessageCreated).effect,
            Effect::UpsertMessage(Role::Assistant)
        );
    }
}

#[test]
fn test_machine_is_cyclic() {
    // No terminal state: chat is reachable from everywhere, and everything from chat
    let from_chat = reachable_from(ConvState::Chat);
    assert_eq!(from_chat.len(), ConvState::ALL.len());
    for state in ConvState::ALL {
        assert!(
            reachable_from(state).contains(&ConvState::Chat),
            "{state} cannot get back to CHAT"
        );
    }
}
