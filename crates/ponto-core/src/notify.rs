//! Best-effort notifications about attendance events.
//!
//! Delivery is fire-and-forget: a failed notification is logged and never
//! rolls back the attendance event that triggered it.

use crate::types::{EntryType, Identity, Timestamp};
use chrono::NaiveTime;
use serde::Serialize;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FirstEntry,
    LateArrival,
    EarlyDeparture,
    UnknownFace,
}

/// Webhook payload: `{event, timestamp, data}`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event: EventKind,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn attendance(event: EventKind, identity: &Identity, at: Timestamp) -> Self {
        let timestamp = at.to_rfc3339();
        Self {
            event,
            data: serde_json::json!({
                "employee_id": identity.id,
                "employee_name": identity.name,
                "timestamp": timestamp,
            }),
            timestamp,
        }
    }

    pub fn unknown_face(attempts: usize, at: Timestamp) -> Self {
        Self {
            event: EventKind::UnknownFace,
            timestamp: at.to_rfc3339(),
            data: serde_json::json!({ "attempts": attempts }),
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook returned HTTP {0}")]
    Status(u16),
    #[error("webhook transport error: {0}")]
    Transport(String),
}

pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notification: &Notification) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Notifier that drops everything. Used when no webhook is configured.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Which events to emit, and the time-of-day thresholds behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPolicy {
    pub on_first_entry: bool,
    pub on_late_arrival: bool,
    pub on_early_departure: bool,
    pub on_unknown_face: bool,
    pub late_arrival_after: NaiveTime,
    pub early_departure_before: NaiveTime,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            on_first_entry: true,
            on_late_arrival: true,
            on_early_departure: true,
            on_unknown_face: false,
            late_arrival_after: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            early_departure_before: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
        }
    }
}

impl NotificationPolicy {
    /// Events triggered by an accepted attendance event.
    pub fn events_for(&self, entry_type: Option<EntryType>, at: Timestamp) -> Vec<EventKind> {
        let time = at.time();
        let mut events = Vec::new();
        match entry_type {
            Some(EntryType::Entrada) => {
                if self.on_first_entry {
                    events.push(EventKind::FirstEntry);
                }
                if self.on_late_arrival && time > self.late_arrival_after {
                    events.push(EventKind::LateArrival);
                }
            }
            Some(EntryType::Saida) => {
                if self.on_early_departure && time < self.early_departure_before {
                    events.push(EventKind::EarlyDeparture);
                }
            }
            None => {}
        }
        events
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::sync::{Arc, Mutex};

    /// Notifier that remembers what it was asked to deliver.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) sent: Arc<Mutex<Vec<Notification>>>,
    }

    impl RecordingNotifier {
        pub(crate) fn events(&self) -> Vec<EventKind> {
            self.sent.lock().unwrap().iter().map(|n| n.event).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Err(NotifyError::Status(500))
        }
    }

    fn at(h: u32, m: u32) -> Timestamp {
        Local.with_ymd_and_hms(2026, 1, 15, h, m, 0).unwrap()
    }

    #[test]
    fn test_entrada_events() {
        let policy = NotificationPolicy::default();
        assert_eq!(policy.events_for(Some(EntryType::Entrada), at(8, 0)), vec![EventKind::FirstEntry]);
        assert_eq!(
            policy.events_for(Some(EntryType::Entrada), at(9, 30)),
            vec![EventKind::FirstEntry, EventKind::LateArrival]
        );
    }

    #[test]
    fn test_saida_events() {
        let policy = NotificationPolicy::default();
        assert_eq!(policy.events_for(Some(EntryType::Saida), at(16, 0)), vec![EventKind::EarlyDeparture]);
        assert!(policy.events_for(Some(EntryType::Saida), at(18, 0)).is_empty());
    }

    #[test]
    fn test_disabled_flags_and_unknown_type() {
        let policy = NotificationPolicy {
            on_first_entry: false,
            on_late_arrival: false,
            ..NotificationPolicy::default()
        };
        assert!(policy.events_for(Some(EntryType::Entrada), at(10, 0)).is_empty());
        assert!(NotificationPolicy::default().events_for(None, at(10, 0)).is_empty());
    }

    #[test]
    fn test_payload_shape() {
        let n = Notification::attendance(EventKind::FirstEntry, &Identity::new("E1", "Ana"), at(8, 0));
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "first_entry");
        assert_eq!(json["data"]["employee_id"], "E1");
        assert_eq!(json["data"]["employee_name"], "Ana");
        assert_eq!(json["data"]["timestamp"], json["timestamp"]);
    }
}
