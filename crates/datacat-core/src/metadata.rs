//! Metadata lock sentinels and merge rules.
//!
//! A key of the form `__<field>__lock__` set to `true` inside a row's
//! metadata marks `<field>` as locked: later ingestions must not overwrite
//! it. Setting a sentinel to `null` removes it (unlock). Sentinels
//! themselves are preserved across merges unless explicitly cleared.

use serde_json::{Map, Value};

type JsonMap = Map<String, Value>;

/// Whether a key is a lock sentinel.
pub fn is_lock_sentinel(key: &str) -> bool {
    key.len() > "____lock__".len() && key.starts_with("__") && key.ends_with("__lock__")
}

/// The sentinel key guarding a field.
pub fn lock_sentinel_for(field: &str) -> String {
    format!("__{}__lock__", field)
}

/// Whether `field` is currently locked in `metadata`.
pub fn is_locked(metadata: &JsonMap, field: &str) -> bool {
    metadata
        .get(&lock_sentinel_for(field))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Merge `incoming` over `existing`, honoring lock sentinels.
///
/// Sentinel keys in the update pass through (`null` removes the sentinel,
/// anything else stores it). A regular key whose sentinel is `true` in the
/// existing document is skipped. Everything already present, sentinels
/// included, survives unless overwritten by these rules.
pub fn merge_respecting_locks(existing: &JsonMap, incoming: &JsonMap) -> JsonMap {
    let mut merged = existing.clone();

    for (key, value) in incoming {
        if is_lock_sentinel(key) {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
            continue;
        }

        if is_locked(existing, key) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(is_lock_sentinel("__energy__lock__"));
        assert!(is_lock_sentinel("__cross-section__lock__"));
        assert!(!is_lock_sentinel("energy"));
        assert!(!is_lock_sentinel("__lock__"));
        assert!(!is_lock_sentinel("____lock__"));
        assert!(!is_lock_sentinel("__energy__"));
    }

    #[test]
    fn test_locked_field_is_not_overwritten() {
        let existing = map(json!({"energy": 240, "__energy__lock__": true}));
        let incoming = map(json!({"energy": 365}));
        let merged = merge_respecting_locks(&existing, &incoming);
        assert_eq!(merged["energy"], json!(240));
        assert_eq!(merged["__energy__lock__"], json!(true));
    }

    #[test]
    fn test_unlocked_field_is_overwritten() {
        let existing = map(json!({"energy": 240}));
        let incoming = map(json!({"energy": 365, "status": "done"}));
        let merged = merge_respecting_locks(&existing, &incoming);
        assert_eq!(merged["energy"], json!(365));
        assert_eq!(merged["status"], json!("done"));
    }

    #[test]
    fn test_false_sentinel_does_not_lock() {
        let existing = map(json!({"energy": 240, "__energy__lock__": false}));
        let incoming = map(json!({"energy": 365}));
        let merged = merge_respecting_locks(&existing, &incoming);
        assert_eq!(merged["energy"], json!(365));
    }

    #[test]
    fn test_null_sentinel_unlocks() {
        let existing = map(json!({"energy": 240, "__energy__lock__": true}));
        let incoming = map(json!({"__energy__lock__": null, "energy": 365}));
        let merged = merge_respecting_locks(&existing, &incoming);
        // The unlock lands; the value update in the same batch is still
        // judged against the pre-merge lock state.
        assert!(!merged.contains_key("__energy__lock__"));
        assert_eq!(merged["energy"], json!(240));
    }

    #[test]
    fn test_existing_sentinels_are_preserved() {
        let existing = map(json!({"energy": 240, "__energy__lock__": true, "status": "new"}));
        let incoming = map(json!({"status": "done"}));
        let merged = merge_respecting_locks(&existing, &incoming);
        assert_eq!(merged["__energy__lock__"], json!(true));
        assert_eq!(merged["status"], json!("done"));
        assert_eq!(merged["energy"], json!(240));
    }

    #[test]
    fn test_merge_is_idempotent_for_repeated_ingest() {
        let existing = map(json!({"energy": 240, "__energy__lock__": true, "status": "new"}));
        let incoming = map(json!({"energy": 999, "status": "new"}));
        let once = merge_respecting_locks(&existing, &incoming);
        let twice = merge_respecting_locks(&once, &incoming);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_setting_a_lock_in_the_update() {
        let existing = map(json!({"energy": 240}));
        let incoming = map(json!({"__energy__lock__": true}));
        let merged = merge_respecting_locks(&existing, &incoming);
        assert_eq!(merged["__energy__lock__"], json!(true));
        assert_eq!(merged["energy"], json!(240));
    }
}
