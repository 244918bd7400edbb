//! Delivery of accepted attendance events to the external store.
//!
//! Up to `max_retries` attempts with a fixed pause between them (no jitter,
//! no exponential growth). Any error on an attempt counts as a failed
//! attempt; exhausting all attempts is returned as data, never raised.

use crate::types::{EntryType, Identity, Timestamp};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Body of `POST /timecard`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimecardRequest {
    pub employee_id: String,
    pub employee_name: String,
    /// ISO-8601 timestamp with local offset.
    pub timestamp: String,
    pub recognition_method: String,
}

impl TimecardRequest {
    pub fn facial(identity: &Identity, at: Timestamp) -> Self {
        Self {
            employee_id: identity.id.clone(),
            employee_name: identity.name.clone(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, false),
            recognition_method: "facial".to_string(),
        }
    }
}

/// Store reply on HTTP 200: `{success, message, data: {entry_type}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimecardReceipt {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<ReceiptData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptData {
    #[serde(default)]
    pub entry_type: Option<EntryType>,
}

impl TimecardReceipt {
    pub fn entry_type(&self) -> Option<EntryType> {
        self.data.as_ref().and_then(|d| d.entry_type)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store returned HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// External attendance-record store. One call is one attempt.
pub trait AttendanceStore: Send + Sync {
    fn record(
        &self,
        request: &TimecardRequest,
    ) -> impl Future<Output = Result<TimecardReceipt, StoreError>> + Send;
}

/// Why a submission did not reach the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFailure {
    /// Every attempt failed; carries the last attempt's error.
    Exhausted(StoreError),
    /// Shutdown requested while the submission was in flight.
    Cancelled,
}

impl fmt::Display for SubmitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitFailure::Exhausted(err) => write!(f, "retries exhausted: {err}"),
            SubmitFailure::Cancelled => f.write_str("submission cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    Accepted {
        entry_type: Option<EntryType>,
        message: Option<String>,
        attempts: u32,
    },
    Failed {
        reason: SubmitFailure,
        attempts: u32,
    },
}

impl SubmissionResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionResult::Accepted { .. })
    }

    pub fn entry_type(&self) -> Option<EntryType> {
        match self {
            SubmissionResult::Accepted { entry_type, .. } => *entry_type,
            SubmissionResult::Failed { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            SubmissionResult::Accepted { attempts, .. } | SubmissionResult::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Retry policy around an [`AttendanceStore`].
pub struct AttendanceSubmitter<S> {
    store: S,
    max_retries: u32,
    retry_interval: Duration,
    attempt_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<S: AttendanceStore> AttendanceSubmitter<S> {
    pub fn new(store: S, max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            store,
            max_retries: max_retries.max(1),
            retry_interval,
            attempt_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Bound every attempt, independent of the store's own transport timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Abort in-flight submissions (and pending retry pauses) when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn attempt(&self, request: &TimecardRequest) -> Result<TimecardReceipt, StoreError> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.record(request))
                .await
                .unwrap_or(Err(StoreError::Timeout(limit))),
            None => self.store.record(request).await,
        }
    }

    pub async fn submit(&self, identity: &Identity, timestamp: Timestamp) -> SubmissionResult {
        let request = TimecardRequest::facial(identity, timestamp);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return SubmissionResult::Failed {
                        reason: SubmitFailure::Cancelled,
                        attempts: attempt - 1,
                    };
                }
                outcome = self.attempt(&request) => outcome,
            };

            match outcome {
                Ok(receipt) => {
                    let entry_type = receipt.entry_type();
                    tracing::info!(
                        employee_id = %identity.id,
                        attempt,
                        entry_type = ?entry_type,
                        message = receipt.message.as_deref().unwrap_or("OK"),
                        "attendance recorded"
                    );
                    return SubmissionResult::Accepted {
                        entry_type,
                        message: receipt.message,
                        attempts: attempt,
                    };
                }
                Err(err) if attempt >= self.max_retries => {
                    tracing::warn!(employee_id = %identity.id, attempt, error = %err, "final attempt failed");
                    return SubmissionResult::Failed {
                        reason: SubmitFailure::Exhausted(err),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    tracing::warn!(employee_id = %identity.id, attempt, error = %err, "attempt failed; retrying");
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return SubmissionResult::Failed {
                        reason: SubmitFailure::Cancelled,
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Store that replays a script of per-attempt results, then succeeds.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedStore {
        script: Arc<Mutex<VecDeque<Result<TimecardReceipt, StoreError>>>>,
        calls: Arc<AtomicU32>,
        requests: Arc<Mutex<Vec<TimecardRequest>>>,
        delay: Option<Duration>,
    }

    impl ScriptedStore {
        pub(crate) fn new(script: Vec<Result<TimecardReceipt, StoreError>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                ..Self::default()
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn requests(&self) -> Vec<TimecardRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    pub(crate) fn receipt(entry_type: EntryType) -> TimecardReceipt {
        TimecardReceipt {
            success: true,
            message: Some(format!("registered - {entry_type}")),
            data: Some(ReceiptData {
                entry_type: Some(entry_type),
            }),
        }
    }

    impl AttendanceStore for ScriptedStore {
        async fn record(&self, request: &TimecardRequest) -> Result<TimecardReceipt, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(receipt(EntryType::Entrada)))
        }
    }

    fn identity() -> Identity {
        Identity::new("E1", "Ana")
    }

    fn now() -> Timestamp {
        Local.with_ymd_and_hms(2026, 1, 15, 8, 30, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let store = ScriptedStore::new(vec![
            Err(StoreError::Status(500)),
            Err(StoreError::Transport("connection refused".into())),
            Ok(receipt(EntryType::Saida)),
        ]);
        let submitter = AttendanceSubmitter::new(store.clone(), 3, Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        let result = submitter.submit(&identity(), now()).await;

        assert!(result.is_accepted());
        assert_eq!(result.entry_type(), Some(EntryType::Saida));
        assert_eq!(result.attempts(), 3);
        assert_eq!(store.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_last_error() {
        let store = ScriptedStore::new(vec![
            Err(StoreError::Status(503)),
            Err(StoreError::Status(502)),
            Err(StoreError::Status(500)),
        ]);
        let submitter = AttendanceSubmitter::new(store.clone(), 3, Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        let result = submitter.submit(&identity(), now()).await;

        assert_eq!(
            result,
            SubmissionResult::Failed {
                reason: SubmitFailure::Exhausted(StoreError::Status(500)),
                attempts: 3,
            }
        );
        assert_eq!(store.calls(), 3);
        // No pause after the last attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_has_no_delay() {
        let store = ScriptedStore::new(vec![]);
        let submitter = AttendanceSubmitter::new(store.clone(), 3, Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        let result = submitter.submit(&identity(), now()).await;
        assert!(result.is_accepted());
        assert_eq!(store.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_store_times_out_per_attempt() {
        let store = ScriptedStore::new(vec![]).with_delay(Duration::from_secs(60));
        let submitter = AttendanceSubmitter::new(store.clone(), 2, Duration::from_secs(1))
            .with_attempt_timeout(Duration::from_secs(10));

        let result = submitter.submit(&identity(), now()).await;
        assert_eq!(
            result,
            SubmissionResult::Failed {
                reason: SubmitFailure::Exhausted(StoreError::Timeout(Duration::from_secs(10))),
                attempts: 2,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_retry_pause() {
        let store = ScriptedStore::new(vec![Err(StoreError::Status(500))]);
        let token = CancellationToken::new();
        let submitter = AttendanceSubmitter::new(store.clone(), 3, Duration::from_secs(30))
            .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });
        let result = submitter.submit(&identity(), now()).await;
        canceller.await.unwrap();

        assert_eq!(
            result,
            SubmissionResult::Failed {
                reason: SubmitFailure::Cancelled,
                attempts: 1,
            }
        );
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_request_body() {
        let store = ScriptedStore::new(vec![]);
        let submitter = AttendanceSubmitter::new(store.clone(), 1, Duration::from_secs(1));
        submitter.submit(&identity(), now()).await;

        let requests = store.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].employee_id, "E1");
        assert_eq!(requests[0].employee_name, "Ana");
        assert_eq!(requests[0].recognition_method, "facial");
        assert!(requests[0].timestamp.starts_with("2026-01-15T08:30:00.000"));
    }

    #[test]
    fn test_receipt_decoding() {
        let receipt: TimecardReceipt = serde_json::from_str(
            r#"{"success": true, "message": "ok - ENTRADA", "data": {"id": 7, "entry_type": "entrada"}}"#,
        )
        .unwrap();
        assert_eq!(receipt.entry_type(), Some(EntryType::Entrada));

        let bare: TimecardReceipt = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.entry_type(), None);
    }
}
