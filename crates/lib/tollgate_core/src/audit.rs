//! Best-effort security event broadcast.
//!
//! `emit` stamps the server time and hands the record to every subscribed
//! handler. A failing or panicking handler is logged and skipped; the rest
//! still run. Handlers run on the caller's task, so they must not block:
//! anything slow belongs behind a [`ChannelAuditHandler`].

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    TokenIssued,
    TokenRotated,
    TokenRevoked,
    TokenReuseDetected,
    FamilyRevoked,
    SessionStarted,
    SessionRevoked,
    AuthFailed,
    RateLimited,
    SigningKeyRotated,
}

impl AuditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventKind::TokenIssued => "token_issued",
            AuditEventKind::TokenRotated => "token_rotated",
            AuditEventKind::TokenRevoked => "token_revoked",
            AuditEventKind::TokenReuseDetected => "token_reuse_detected",
            AuditEventKind::FamilyRevoked => "family_revoked",
            AuditEventKind::SessionStarted => "session_started",
            AuditEventKind::SessionRevoked => "session_revoked",
            AuditEventKind::AuthFailed => "auth_failed",
            AuditEventKind::RateLimited => "rate_limited",
            AuditEventKind::SigningKeyRotated => "signing_key_rotated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    High,
}

/// Security event as raised by the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub severity: Severity,
    /// Principal the event is about.
    pub principal_id: Option<String>,
    /// Token, session, family or key the event concerns.
    pub subject_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind) -> Self {
        let severity = match kind {
            AuditEventKind::TokenReuseDetected => Severity::High,
            AuditEventKind::AuthFailed
            | AuditEventKind::RateLimited
            | AuditEventKind::FamilyRevoked => Severity::Warning,
            _ => Severity::Info,
        };
        Self {
            kind,
            severity,
            principal_id: None,
            subject_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn principal(mut self, id: impl Into<String>) -> Self {
        self.principal_id = Some(id.into());
        self
    }

    pub fn subject(mut self, id: impl ToString) -> Self {
        self.subject_id = Some(id.to_string());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// An event stamped with server time by [`AuditEventBus::emit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

#[derive(Debug, Error)]
#[error("audit handler failed: {0}")]
pub struct AuditError(pub String);

/// Subscriber to security events.
pub trait AuditHandler: Send + Sync {
    fn handle(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Handler identifier for logging.
    fn name(&self) -> &str;
}

/// Opaque subscription id returned by [`AuditEventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct AuditEventBus {
    handlers: RwLock<Vec<(HandlerId, Arc<dyn AuditHandler>)>>,
    next_id: AtomicU64,
}

impl AuditEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn AuditHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.write_handlers().push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.write_handlers();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Drop every subscriber, e.g. on shutdown or reconfiguration.
    pub fn clear_handlers(&self) {
        self.write_handlers().clear();
    }

    pub fn handler_count(&self) -> usize {
        match self.handlers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Stamp and deliver an event. Never fails.
    pub fn emit(&self, event: AuditEvent) -> AuditRecord {
        let record = AuditRecord {
            at: Utc::now(),
            event,
        };
        // Deliver from a snapshot so handlers may (un)subscribe re-entrantly.
        let handlers: Vec<Arc<dyn AuditHandler>> = match self.handlers.read() {
            Ok(guard) => guard.iter().map(|(_, h)| h.clone()).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, h)| h.clone()).collect(),
        };
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(&record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(handler = handler.name(), event = record.event.kind.as_str(), "{e}");
                }
                Err(_) => {
                    warn!(
                        handler = handler.name(),
                        event = record.event.kind.as_str(),
                        "audit handler panicked"
                    );
                }
            }
        }
        record
    }

    fn write_handlers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, Vec<(HandlerId, Arc<dyn AuditHandler>)>> {
        match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Writes every event to `tracing` under the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditHandler;

impl AuditHandler for TracingAuditHandler {
    fn handle(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let e = &record.event;
        let principal = e.principal_id.as_deref().unwrap_or("");
        let subject = e.subject_id.as_deref().unwrap_or("");
        let metadata = format!("{:?}", e.metadata);
        match e.severity {
            Severity::High | Severity::Warning => {
                warn!(target: "audit", event = e.kind.as_str(), severity = ?e.severity, principal, subject, %metadata, at = %record.at);
            }
            Severity::Info => {
                info!(target: "audit", event = e.kind.as_str(), principal, subject, %metadata, at = %record.at);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "TracingAuditHandler"
    }
}

/// Forwards records into an unbounded channel for async consumers
/// (persistence, alerting). Sending never blocks.
#[derive(Debug, Clone)]
pub struct ChannelAuditHandler {
    tx: mpsc::UnboundedSender<AuditRecord>,
}

impl ChannelAuditHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditHandler for ChannelAuditHandler {
    fn handle(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.tx
            .send(record.clone())
            .map_err(|_| AuditError("receiver dropped".into()))
    }

    fn name(&self) -> &str {
        "ChannelAuditHandler"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder {
        seen: Mutex<Vec<AuditEventKind>>,
    }

    impl AuditHandler for Recorder {
        fn handle(&self, record: &AuditRecord) -> Result<(), AuditError> {
            self.seen.lock().unwrap().push(record.event.kind);
            Ok(())
        }

        fn name(&self) -> &str {
            "Recorder"
        }
    }

    struct Failing;

    impl AuditHandler for Failing {
        fn handle(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError("boom".into()))
        }

        fn name(&self) -> &str {
            "Failing"
        }
    }

    struct Panicking;

    impl AuditHandler for Panicking {
        fn handle(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            panic!("handler bug");
        }

        fn name(&self) -> &str {
            "Panicking"
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn failing_handlers_do_not_stop_delivery() {
        let bus = AuditEventBus::new();
        let rec = recorder();
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(Arc::new(Panicking));
        bus.subscribe(rec.clone());

        bus.emit(AuditEvent::new(AuditEventKind::TokenIssued));
        assert_eq!(*rec.seen.lock().unwrap(), vec![AuditEventKind::TokenIssued]);
    }

    #[test]
    fn emit_stamps_server_time() {
        let bus = AuditEventBus::new();
        let before = Utc::now();
        let record = bus.emit(AuditEvent::new(AuditEventKind::AuthFailed).principal("u1"));
        assert!(record.at >= before);
        assert_eq!(record.event.severity, Severity::Warning);
    }

    #[test]
    fn clear_and_unsubscribe() {
        let bus = AuditEventBus::new();
        let rec = recorder();
        let id = bus.subscribe(rec.clone());
        bus.subscribe(Arc::new(Failing));
        assert_eq!(bus.handler_count(), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(AuditEvent::new(AuditEventKind::TokenRevoked));
        assert!(rec.seen.lock().unwrap().is_empty());

        bus.clear_handlers();
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn reuse_events_are_high_severity() {
        let event = AuditEvent::new(AuditEventKind::TokenReuseDetected);
        assert_eq!(event.severity, Severity::High);
    }

    #[tokio::test]
    async fn channel_handler_forwards_records() {
        let bus = AuditEventBus::new();
        let (handler, mut rx) = ChannelAuditHandler::new();
        bus.subscribe(Arc::new(handler));
        bus.emit(
            AuditEvent::new(AuditEventKind::SessionRevoked)
                .subject("s1")
                .meta("reason", "logout"),
        );
        let record = rx.recv().await.unwrap();
        assert_eq!(record.event.subject_id.as_deref(), Some("s1"));
        assert_eq!(record.event.metadata["reason"], "logout");
    }
}
