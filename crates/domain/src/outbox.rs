//! Outbox records for events that could not be published immediately.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{MessageId, OrderId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Delivery status of an outbox row.
///
/// `Processed` and `Failed` are final: the relay never picks those rows up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, OutboxStatus::Pending)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(DomainError::UnknownOutboxStatus(other.to_string())),
        }
    }
}

/// An event waiting in the outbox for redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub id: MessageId,
    /// Broker pattern the payload is published under.
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Creates a fresh pending row with no attempts recorded.
    pub fn pending(
        order_id: OrderId,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            order_id,
            created_at: now,
        }
    }

    /// Returns true if the relay should still try to deliver this row.
    pub fn is_retryable(&self, max_attempts: u32) -> bool {
        self.status == OutboxStatus::Pending && self.attempts < max_attempts
    }

    /// Records a failed delivery attempt.
    ///
    /// The row becomes `Failed` once `attempts` reaches `max_attempts`, so the
    /// counter never goes past the cap. Final rows are left untouched.
    pub fn record_failure(&mut self, error: impl Into<String>, max_attempts: u32) {
        if self.status.is_final() {
            return;
        }
        self.attempts = (self.attempts + 1).min(max_attempts);
        self.last_error = Some(error.into());
        if self.attempts >= max_attempts {
            self.status = OutboxStatus::Failed;
        }
    }

    /// Marks the row as delivered.
    pub fn mark_processed(&mut self) {
        if self.status == OutboxStatus::Pending {
            self.status = OutboxStatus::Processed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message() -> OutboxMessage {
        OutboxMessage::pending(OrderId::new(), "order.created", json!({"k": 1}), Utc::now())
    }

    #[test]
    fn test_new_message_is_pending_with_no_attempts() {
        let msg = message();
        assert_eq!(msg.status, OutboxStatus::Pending);
        assert_eq!(msg.attempts, 0);
        assert!(msg.last_error.is_none());
        assert!(msg.is_retryable(3));
    }

    #[test]
    fn test_failure_cap() {
        let mut msg = message();
        msg.record_failure("boom 1", 3);
        msg.record_failure("boom 2", 3);
        assert_eq!(msg.status, OutboxStatus::Pending);
        assert_eq!(msg.attempts, 2);

        msg.record_failure("boom 3", 3);
        assert_eq!(msg.status, OutboxStatus::Failed);
        assert_eq!(msg.attempts, 3);
        assert_eq!(msg.last_error.as_deref(), Some("boom 3"));
        assert!(!msg.is_retryable(3));

        msg.record_failure("boom 4", 3);
        assert_eq!(msg.attempts, 3);
        assert_eq!(msg.last_error.as_deref(), Some("boom 3"));
    }

    #[test]
    fn test_processed_is_final() {
        let mut msg = message();
        msg.mark_processed();
        assert_eq!(msg.status, OutboxStatus::Processed);
        msg.record_failure("late", 3);
        assert_eq!(msg.status, OutboxStatus::Processed);
        assert_eq!(msg.attempts, 0);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("failed".parse::<OutboxStatus>().unwrap(), OutboxStatus::Failed);
        assert!("done".parse::<OutboxStatus>().is_err());
    }
}
