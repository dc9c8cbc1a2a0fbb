use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A generated remediation plan and the session it is filed under.
///
/// Serializes to the caller-visible record shape
/// `{"sessionId": "...", "to-do list": "..."}`. The plan text is opaque and
/// is stored and returned verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    #[serde(rename = "to-do list")]
    pub to_do_list: String,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Issue a fresh session for `to_do_list`.
    pub fn new(to_do_list: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            to_do_list: to_do_list.into(),
            created_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_record_shape() {
        let plan = Plan::new("1. VACUUM sales;");
        let value: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 2);
        assert_eq!(value["sessionId"], plan.session_id.to_string());
        assert_eq!(value["to-do list"], "1. VACUUM sales;");
    }

    #[test]
    fn fresh_plans_get_distinct_sessions() {
        let a = Plan::new("same text");
        let b = Plan::new("same text");
        assert_ne!(a.session_id, b.session_id);
    }
}
