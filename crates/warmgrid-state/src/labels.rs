//! The label contract between the provisioner and the cluster.
//!
//! Labels are the durable encoding of pool state: on restart the registry is
//! rebuilt entirely from them. Any external process touching managed units
//! must preserve these keys or reconciliation will misclassify the unit.

use std::collections::HashMap;

/// Every unit the provisioner creates carries `managed-by=warmgrid`.
pub const MANAGED_BY_KEY: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "warmgrid";

/// `pool=warm` while the unit belongs to the warm pool, `pool=none` after.
pub const POOL_KEY: &str = "pool";
pub const POOL_WARM: &str = "warm";
pub const POOL_NONE: &str = "none";

/// `assigned=true|false`.
pub const ASSIGNED_KEY: &str = "assigned";

/// `session-id=<id>`, present only on assigned units.
pub const SESSION_ID_KEY: &str = "session-id";

/// Label set for a freshly created warm unit.
pub fn warm_labels() -> HashMap<String, String> {
    HashMap::from([
        (MANAGED_BY_KEY.to_string(), MANAGED_BY_VALUE.to_string()),
        (POOL_KEY.to_string(), POOL_WARM.to_string()),
        (ASSIGNED_KEY.to_string(), "false".to_string()),
    ])
}

/// Label set for a unit assigned to `session_id`.
pub fn assigned_labels(session_id: &str) -> HashMap<String, String> {
    HashMap::from([
        (MANAGED_BY_KEY.to_string(), MANAGED_BY_VALUE.to_string()),
        (POOL_KEY.to_string(), POOL_NONE.to_string()),
        (ASSIGNED_KEY.to_string(), "true".to_string()),
        (SESSION_ID_KEY.to_string(), session_id.to_string()),
    ])
}

/// Selector matching every unit this provisioner manages.
pub fn managed_selector() -> String {
    format!("{MANAGED_BY_KEY}={MANAGED_BY_VALUE}")
}

/// Classify a label set: `Some(session_id)` for assigned units, `None` for
/// warm ones. Labels that say `assigned=true` but carry no session id are
/// treated as warm — the session half of the contract was lost, so the unit
/// is only safe to reuse as pool capacity.
pub fn session_from_labels(labels: &HashMap<String, String>) -> Option<&str> {
    if labels.get(ASSIGNED_KEY).map(String::as_str) == Some("true") {
        labels.get(SESSION_ID_KEY).map(String::as_str)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_labels_contract() {
        let labels = warm_labels();
        assert_eq!(labels.get(MANAGED_BY_KEY).unwrap(), MANAGED_BY_VALUE);
        assert_eq!(labels.get(POOL_KEY).unwrap(), POOL_WARM);
        assert_eq!(labels.get(ASSIGNED_KEY).unwrap(), "false");
        assert!(!labels.contains_key(SESSION_ID_KEY));
    }

    #[test]
    fn assigned_labels_contract() {
        let labels = assigned_labels("abc12345");
        assert_eq!(labels.get(ASSIGNED_KEY).unwrap(), "true");
        assert_eq!(labels.get(POOL_KEY).unwrap(), POOL_NONE);
        assert_eq!(labels.get(SESSION_ID_KEY).unwrap(), "abc12345");
    }

    #[test]
    fn managed_selector_format() {
        assert_eq!(managed_selector(), "managed-by=warmgrid");
    }

    #[test]
    fn classify_assigned() {
        let labels = assigned_labels("s1");
        assert_eq!(session_from_labels(&labels), Some("s1"));
    }

    #[test]
    fn classify_warm() {
        assert_eq!(session_from_labels(&warm_labels()), None);
    }

    #[test]
    fn classify_assigned_without_session_is_warm() {
        let mut labels = warm_labels();
        labels.insert(ASSIGNED_KEY.to_string(), "true".to_string());
        assert_eq!(session_from_labels(&labels), None);
    }
}
