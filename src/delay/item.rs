//! Stored shape of a delayed message

use serde::{Deserialize, Serialize};

/// A message waiting to be forwarded to `destination` at `fire_at`.
///
/// Serialized as the sorted-set member, so two pushes of identical content for the same
/// second collapse into one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedItem {
    pub destination: String,
    pub payload: serde_json::Value,
    /// Unix seconds
    #[serde(rename = "fireAt")]
    pub fire_at: i64,
    #[serde(default)]
    pub attempts: u32,
}

impl DelayedItem {
    pub fn new(destination: impl Into<String>, payload: serde_json::Value, fire_at: i64) -> Self {
        Self {
            destination: destination.into(),
            payload,
            fire_at,
            attempts: 0,
        }
    }

    /// Copy scheduled for another attempt at `fire_at`
    pub fn next_attempt(&self, fire_at: i64) -> Self {
        Self {
            fire_at,
            attempts: self.attempts + 1,
            ..self.clone()
        }
    }

    pub fn to_member(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_member(member: &str) -> serde_json::Result<Self> {
        serde_json::from_str(member)
    }
}

/// A member moved into a claimed set by `pop`, with the bucket it was claimed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedEntry {
    pub bucket: u32,
    pub member: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_uses_fire_at_field_name() {
        let item = DelayedItem::new("orders", serde_json::json!({"id": 1}), 1_700_000_000);
        let member = item.to_member().unwrap();
        assert!(member.contains("\"fireAt\":1700000000"));

        let back = DelayedItem::from_member(&member).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_next_attempt_increments_once() {
        let item = DelayedItem::new("orders", serde_json::Value::Null, 100);
        let retry = item.next_attempt(160);
        assert_eq!(retry.attempts, 1);
        assert_eq!(retry.fire_at, 160);
        assert_eq!(retry.destination, "orders");
    }

    #[test]
    fn test_missing_attempts_defaults_to_zero() {
        let item =
            DelayedItem::from_member(r#"{"destination":"t","payload":1,"fireAt":5}"#).unwrap();
        assert_eq!(item.attempts, 0);
    }
}
