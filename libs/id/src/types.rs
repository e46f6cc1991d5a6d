//! Typed ID definitions for all solver records.

use crate::define_id;

// =============================================================================
// Problem
// =============================================================================

define_id!(ProblemId, "problem");

// =============================================================================
// Planning facts and entities
// =============================================================================

define_id!(AgentId, "agent");
define_id!(CallId, "call");

// =============================================================================
// Change log
// =============================================================================

define_id!(ChangeId, "change");

impl ChangeId {
    /// Returns true if a solution stamped with `watermark` already reflects this change.
    #[must_use]
    pub fn is_reflected_in(&self, watermark: Option<ChangeId>) -> bool {
        watermark.is_some_and(|last| *self <= last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_problem_id_roundtrip() {
        let id = ProblemId::new(42);
        let s = id.to_string();
        assert_eq!(s, "42");
        let parsed: ProblemId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_empty() {
        let result: Result<CallId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_id_not_numeric() {
        let result: Result<AgentId, _> = "agent_7".parse();
        match result.unwrap_err() {
            crate::IdError::NotNumeric { kind, value } => {
                assert_eq!(kind, "agent");
                assert_eq!(value, "agent_7");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_id_json_is_a_number() {
        let json = serde_json::to_string(&CallId::new(7)).unwrap();
        assert_eq!(json, "7");
        let parsed: CallId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, CallId::new(7));
    }

    #[test]
    fn test_change_id_watermark() {
        let change = ChangeId::new(5);
        assert!(!change.is_reflected_in(None));
        assert!(change.is_reflected_in(Some(ChangeId::new(5))));
        assert!(change.is_reflected_in(Some(ChangeId::new(9))));
        assert!(!change.is_reflected_in(Some(ChangeId::new(4))));
    }

    proptest! {
        #[test]
        fn prop_display_parse_roundtrip(raw in any::<i64>()) {
            let id = ChangeId::new(raw);
            let parsed: ChangeId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn prop_ordering_matches_raw(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(ProblemId::new(a).cmp(&ProblemId::new(b)), a.cmp(&b));
        }
    }
}
