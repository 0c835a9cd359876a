//! Shared pipeline state and the deep-merge rule
//!
//! The pipeline state is a recursively nested JSON mapping threaded through
//! every node of a run. Operators treat it as read-at-entry /
//! returned-at-exit; the scheduler folds returned states back in on its own
//! turn, so there is exactly one writer at a time.
//!
//! Merging follows one rule, [`deep_merge`]:
//!
//! - keys present only in the update are inserted,
//! - nested mappings recurse,
//! - scalar and sequence values replace,
//! - with `keep = false`, keys absent from the update are deleted.
//!
//! With `keep = true` the merge is a left-biased monoid on mappings:
//! associative, with `{}` as identity, on non-conflicting scalar keys.

use serde_json::Value;

/// Deep-merge `update` into `base` in place.
///
/// Both values are expected to be JSON objects; a non-object `base` is
/// replaced wholesale by a clone of `update`.
pub fn deep_merge(base: &mut Value, update: &Value, keep: bool) {
    let (Some(base_map), Some(update_map)) = (base.as_object_mut(), update.as_object()) else {
        *base = update.clone();
        return;
    };

    if !keep {
        base_map.retain(|k, _| update_map.contains_key(k));
    }

    for (k, v) in update_map {
        match base_map.get_mut(k) {
            Some(existing) if v.is_object() && existing.is_object() => {
                deep_merge(existing, v, keep);
            }
            Some(existing) => *existing = v.clone(),
            None => {
                base_map.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Fresh, empty pipeline state
pub fn empty_state() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_new_keys() {
        let mut base = json!({"a": 1});
        deep_merge(&mut base, &json!({"b": 2}), true);
        assert_eq!(base, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_nested_maps_recurse() {
        let mut base = json!({"cfg": {"host": "a", "port": 1}});
        deep_merge(&mut base, &json!({"cfg": {"port": 2}}), true);
        assert_eq!(base, json!({"cfg": {"host": "a", "port": 2}}));
    }

    #[test]
    fn test_scalars_and_sequences_replace() {
        let mut base = json!({"xs": [1, 2, 3], "n": 1});
        deep_merge(&mut base, &json!({"xs": [9], "n": 2}), true);
        assert_eq!(base, json!({"xs": [9], "n": 2}));
    }

    #[test]
    fn test_keep_false_deletes_absent_keys() {
        let mut base = json!({"a": 1, "b": 2});
        deep_merge(&mut base, &json!({"b": 3}), false);
        assert_eq!(base, json!({"b": 3}));
    }

    #[test]
    fn test_identity_element() {
        let mut base = json!({"a": {"b": 1}});
        deep_merge(&mut base, &json!({}), true);
        assert_eq!(base, json!({"a": {"b": 1}}));

        let mut empty = json!({});
        deep_merge(&mut empty, &json!({"a": {"b": 1}}), true);
        assert_eq!(empty, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_associativity_on_disjoint_keys() {
        let a = json!({"a": 1});
        let b = json!({"b": {"x": 1}});
        let c = json!({"c": [1, 2]});

        let mut left = a.clone();
        deep_merge(&mut left, &b, true);
        deep_merge(&mut left, &c, true);

        let mut bc = b.clone();
        deep_merge(&mut bc, &c, true);
        let mut right = a.clone();
        deep_merge(&mut right, &bc, true);

        assert_eq!(left, right);
    }

    #[test]
    fn test_non_object_base_is_replaced() {
        let mut base = json!(42);
        deep_merge(&mut base, &json!({"a": 1}), true);
        assert_eq!(base, json!({"a": 1}));
    }
}
