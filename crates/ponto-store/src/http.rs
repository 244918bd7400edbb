//! HTTP attendance store and webhook notifier over `reqwest`.

use ponto_core::notify::{Notification, Notifier, NotifyError};
use ponto_core::submitter::{AttendanceStore, StoreError, TimecardReceipt, TimecardRequest};
use reqwest::StatusCode;
use std::time::Duration;

/// Attendance store reached at `{base}/timecard`.
#[derive(Clone)]
pub struct HttpAttendanceStore {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAttendanceStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Transport(err.to_string())
        }
    }

    /// `GET {base}/health`. Any 200 counts as healthy.
    pub async fn health(&self) -> Result<serde_json::Value, StoreError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        if response.status() != StatusCode::OK {
            return Err(StoreError::Status(response.status().as_u16()));
        }
        Ok(response.json().await.unwrap_or(serde_json::Value::Null))
    }
}

impl AttendanceStore for HttpAttendanceStore {
    async fn record(&self, request: &TimecardRequest) -> Result<TimecardReceipt, StoreError> {
        let response = self
            .client
            .post(format!("{}/timecard", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), employee_id = %request.employee_id, "store rejected timecard");
            return Err(StoreError::Status(status.as_u16()));
        }

        // The event is recorded once the store answers 200; an unreadable body only loses the entry type.
        match response.json::<TimecardReceipt>().await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                tracing::warn!(error = %err, "store accepted timecard with unreadable body");
                Ok(TimecardReceipt::default())
            }
        }
    }
}

/// Posts notifications as JSON to a single webhook URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use ponto_core::types::{EntryType, Identity};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// One-shot loopback HTTP responder. Yields the raw request it received.
    async fn respond_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if request_complete(&buf) {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        (format!("http://{addr}/api"), rx)
    }

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..head_end]
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        buf.len() >= head_end + 4 + length
    }

    fn request() -> TimecardRequest {
        let at = Local.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap();
        TimecardRequest::facial(&Identity::new("E1", "Ana"), at)
    }

    #[tokio::test]
    async fn test_record_posts_timecard() {
        let (base, seen) = respond_once(
            "200 OK",
            r#"{"success":true,"message":"Ana - entrada","data":{"entry_type":"entrada"}}"#,
        )
        .await;
        let store = HttpAttendanceStore::new(&base, Duration::from_secs(5)).unwrap();

        let receipt = store.record(&request()).await.unwrap();
        assert_eq!(receipt.entry_type(), Some(EntryType::Entrada));

        let raw = seen.await.unwrap();
        assert!(raw.starts_with("POST /api/timecard"));
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let sent: TimecardRequest = serde_json::from_str(body).unwrap();
        assert_eq!(sent, request());
    }

    #[tokio::test]
    async fn test_non_200_is_failed_attempt() {
        let (base, _seen) = respond_once("201 Created", "{}").await;
        let store = HttpAttendanceStore::new(&base, Duration::from_secs(5)).unwrap();
        assert_eq!(store.record(&request()).await.unwrap_err(), StoreError::Status(201));
    }

    #[tokio::test]
    async fn test_unreadable_200_body_still_accepted() {
        let (base, _seen) = respond_once("200 OK", "not json").await;
        let store = HttpAttendanceStore::new(&base, Duration::from_secs(5)).unwrap();
        let receipt = store.record(&request()).await.unwrap();
        assert_eq!(receipt.entry_type(), None);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let store = HttpAttendanceStore::new(&format!("http://{addr}/api/"), Duration::from_secs(2)).unwrap();
        assert_eq!(store.base_url(), format!("http://{addr}/api"));
        assert!(matches!(store.record(&request()).await, Err(StoreError::Transport(_))));
    }

    #[tokio::test]
    async fn test_health() {
        let (base, seen) = respond_once("200 OK", r#"{"status":"ok"}"#).await;
        let store = HttpAttendanceStore::new(&base, Duration::from_secs(5)).unwrap();
        let body = store.health().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert!(seen.await.unwrap().starts_with("GET /api/health"));
    }

    #[tokio::test]
    async fn test_webhook_posts_notification() {
        let (base, seen) = respond_once("500 Internal Server Error", "{}").await;
        let notifier = WebhookNotifier::new(&format!("{base}/hook"), Duration::from_secs(5)).unwrap();
        let at = Local.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap();
        let n = Notification::unknown_face(3, at);

        let err = notifier.notify(&n).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status(500)));

        let raw = seen.await.unwrap();
        assert!(raw.starts_with("POST /api/hook"));
        assert!(raw.contains(r#""event":"unknown_face""#));
    }
}
