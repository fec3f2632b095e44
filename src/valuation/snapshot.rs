//! Snapshot hashing for valuation deduplication

use crate::db::AnswerMap;
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of the snapshot's canonical JSON.
///
/// `AnswerMap` is ordered by key, so equal answers hash equally no matter
/// the order they were collected in.
pub fn snapshot_hash(snapshot: &AnswerMap) -> String {
    let canonical = serde_json::to_string(snapshot).unwrap_or_default();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_values() {
        let empty = snapshot_hash(&AnswerMap::new());
        // sha256("{}")
        assert_eq!(
            empty,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        assert_eq!(empty.len(), 64);
    }

    #[test]
    fn test_values_matter() {
        let a = AnswerMap::from([("maker".to_string(), "Omega".to_string())]);
        let b = AnswerMap::from([("maker".to_string(), "Rolex".to_string())]);
        assert_ne!(snapshot_hash(&a), snapshot_hash(&b));
    }

    proptest! {
        #[test]
        fn prop_insertion_order_does_not_matter(
            answers in proptest::collection::btree_map("[a-z_]{1,8}", "[ -~]{0,16}", 0..12)
        ) {
            let mut reversed = AnswerMap::new();
            for (k, v) in answers.iter().rev() {
                reversed.insert(k.clone(), v.clone());
            }
            prop_assert_eq!(snapshot_hash(&answers), snapshot_hash(&reversed));
        }
    }
}
