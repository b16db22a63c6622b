//! Progress transport: the ordered event stream of one request.
//!
//! Events flow through an mpsc channel; the HTTP layer frames them as SSE.
//! Exactly one terminal event (`complete` or `error`) is emitted per stream;
//! later terminal attempts are ignored. Heartbeats for proxy keep-alive are
//! the SSE layer's keep-alive comments, not events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    Stage,
    Partial,
    Complete,
    Error,
}

/// Wire shape: `{type, ts, data}`, one JSON object per event.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub ts: DateTime<Utc>,
    pub data: serde_json::Value,
}

pub fn progress_channel() -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (ProgressSender { tx, terminal_sent: Arc::new(AtomicBool::new(false)) }, rx)
}

#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    terminal_sent: Arc<AtomicBool>,
}

impl ProgressSender {
    pub async fn stage(&self, name: &str, pct: u8, detail: Option<&str>) {
        let mut data = serde_json::json!({ "name": name, "pct": pct.min(100) });
        if let Some(detail) = detail {
            data["detail"] = serde_json::Value::String(detail.to_string());
        }
        self.send(ProgressEventType::Stage, data).await;
    }

    pub async fn partial(&self, data: serde_json::Value) {
        self.send(ProgressEventType::Partial, data).await;
    }

    /// Terminal success. Returns false when a terminal event already went
    /// out (the payload is dropped in that case).
    pub async fn complete(&self, data: serde_json::Value) -> bool {
        if self.terminal_sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.send_unchecked(ProgressEventType::Complete, data).await;
        true
    }

    /// Terminal failure; same single-terminal contract as `complete`.
    pub async fn error(&self, kind: &str, message: &str) -> bool {
        if self.terminal_sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.send_unchecked(
            ProgressEventType::Error,
            serde_json::json!({ "kind": kind, "message": message }),
        )
        .await;
        true
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent.load(Ordering::SeqCst)
    }

    async fn send(&self, event_type: ProgressEventType, data: serde_json::Value) {
        if self.terminal_sent() {
            return;
        }
        self.send_unchecked(event_type, data).await;
    }

    async fn send_unchecked(&self, event_type: ProgressEventType, data: serde_json::Value) {
        let event = ProgressEvent { event_type, ts: Utc::now(), data };
        // A closed receiver means the client is gone; cancellation is
        // handled by the token, so a failed send is just dropped.
        if self.tx.send(event).await.is_err() {
            tracing::debug!("progress receiver closed, dropping {:?} event", event_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_issue_order() {
        let (sender, mut rx) = progress_channel();
        sender.stage("plan", 10, None).await;
        sender.stage("retrieve", 40, Some("120 candidates")).await;
        sender.complete(serde_json::json!({"ok": true})).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, ProgressEventType::Stage);
        assert_eq!(first.data["name"], "plan");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.data["detail"], "120 candidates");

        let third = rx.recv().await.unwrap();
        assert_eq!(third.event_type, ProgressEventType::Complete);
    }

    #[tokio::test]
    async fn exactly_one_terminal_event() {
        let (sender, mut rx) = progress_channel();
        assert!(sender.complete(serde_json::json!({})).await);
        assert!(!sender.error("internal", "too late").await);
        assert!(!sender.complete(serde_json::json!({})).await);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, ProgressEventType::Complete);
        drop(sender);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn no_events_after_terminal() {
        let (sender, mut rx) = progress_channel();
        sender.error("llm_timeout", "budget exhausted").await;
        sender.stage("late", 99, None).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, ProgressEventType::Error);
        assert_eq!(first.data["kind"], "llm_timeout");
        drop(sender);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_receiver_does_not_panic() {
        let (sender, rx) = progress_channel();
        drop(rx);
        sender.stage("plan", 5, None).await;
        sender.complete(serde_json::json!({})).await;
    }
}
