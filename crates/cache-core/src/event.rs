//! C4 Event Bus (spec §4.2): creates a per-call event, invokes listener
//! hooks with isolation between listeners, and lets a listener short-circuit
//! the call via throttling.

use std::sync::Arc;
use std::time::Instant;

use crate::key::NormalisedKey;
use crate::metrics;

/// The kind of logical operation a call represents (spec §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Get,
    GetBulk,
    GetAndTouch,
    MetaGet,
    MetaDebug,
    Set,
    Add,
    Replace,
    Append,
    AppendOrAdd,
    Delete,
    Touch,
    Incr,
    Decr,
}

impl CallKind {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            CallKind::Set
                | CallKind::Add
                | CallKind::Replace
                | CallKind::Append
                | CallKind::AppendOrAdd
                | CallKind::Delete
                | CallKind::Touch
                | CallKind::Incr
                | CallKind::Decr
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Get => "get",
            CallKind::GetBulk => "get_bulk",
            CallKind::GetAndTouch => "get_and_touch",
            CallKind::MetaGet => "meta_get",
            CallKind::MetaDebug => "meta_debug",
            CallKind::Set => "set",
            CallKind::Add => "add",
            CallKind::Replace => "replace",
            CallKind::Append => "append",
            CallKind::AppendOrAdd => "append_or_add",
            CallKind::Delete => "delete",
            CallKind::Touch => "touch",
            CallKind::Incr => "incr",
            CallKind::Decr => "decr",
        }
    }
}

/// Free-form per-call status attribute (spec §3.4, §4.4, §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    GHit,
    GMiss,
    BHit,
    BHitPartial(Vec<String>),
    BMissAll,
    Success,
    Error(String),
}

/// Per-call object mutated only by the orchestrator, read by listeners
/// (spec §3.4).
#[derive(Debug, Clone)]
pub struct Event {
    pub call: CallKind,
    pub application: String,
    pub prefix: Option<String>,
    pub keys: Vec<NormalisedKey>,
    pub ttl: Option<i64>,
    pub start: Instant,
    pub end: Option<Instant>,
    pub status: Option<EventStatus>,
}

impl Event {
    pub fn new(
        call: CallKind,
        application: String,
        prefix: Option<String>,
        keys: Vec<NormalisedKey>,
        ttl: Option<i64>,
    ) -> Self {
        Event {
            call,
            application,
            prefix,
            keys,
            ttl,
            start: Instant::now(),
            end: None,
            status: None,
        }
    }
}

/// Capability surface a plug-in listener implements (spec §9). Any `Err`
/// returned from a hook is swallowed and counted under
/// `INTERNAL_EVENT_FAIL{listener, stage}`; it never reaches the caller.
#[async_trait::async_trait]
pub trait EventListener: Send + Sync {
    /// Returns `Ok(true)` to reject (throttle) the call.
    async fn on_throttle(&self, _event: &Event) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn on_start(&self, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_complete(&self, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_error(&self, _event: &Event, _error: &crate::Error) -> anyhow::Result<()> {
        Ok(())
    }

    /// Identifies this listener in `INTERNAL_EVENT_FAIL` tags.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Iterates an immutable snapshot of registered listeners (spec §4.2, §5).
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new(listeners: Vec<Arc<dyn EventListener>>) -> Self {
        EventBus {
            listeners: Arc::new(listeners),
        }
    }

    /// Returns an `Event` only if there are registered listeners; otherwise
    /// `None` (fast-path skip, spec §4.2).
    pub fn create(
        &self,
        call: CallKind,
        application: &str,
        prefix: Option<&str>,
        keys: Vec<NormalisedKey>,
        ttl: Option<i64>,
    ) -> Option<Event> {
        if self.listeners.is_empty() {
            return None;
        }
        Some(Event::new(
            call,
            application.to_string(),
            prefix.map(str::to_string),
            keys,
            ttl,
        ))
    }

    /// Returns `true` if any listener opts to reject the call. The first
    /// listener to return `Ok(true)` short-circuits the scan.
    pub async fn throttle(&self, event: &Event) -> bool {
        for listener in self.listeners.iter() {
            match listener.on_throttle(event).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => swallow(listener.name(), "throttle", err),
            }
        }
        false
    }

    pub async fn start(&self, event: &Event) {
        for listener in self.listeners.iter() {
            if let Err(err) = listener.on_start(event).await {
                swallow(listener.name(), "start", err);
            }
        }
    }

    pub async fn complete(&self, event: &mut Event) {
        event.end = Some(Instant::now());
        for listener in self.listeners.iter() {
            if let Err(err) = listener.on_complete(event).await {
                swallow(listener.name(), "complete", err);
            }
        }
    }

    pub async fn error(&self, event: &mut Event, err: &crate::Error) {
        event.end = Some(Instant::now());
        for listener in self.listeners.iter() {
            if let Err(listener_err) = listener.on_error(event, err).await {
                swallow(listener.name(), "error", listener_err);
            }
        }
    }
}

fn swallow(listener: &str, stage: &'static str, err: anyhow::Error) {
    tracing::warn!(listener, stage, %err, "event listener failed; swallowing");
    metrics::internal_event_fail(listener, stage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingListener {
        throttled: AtomicBool,
        starts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventListener for CountingListener {
        async fn on_throttle(&self, _event: &Event) -> anyhow::Result<bool> {
            Ok(self.throttled.load(Ordering::SeqCst))
        }
        async fn on_start(&self, _event: &Event) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingListener;

    #[async_trait::async_trait]
    impl EventListener for FailingListener {
        async fn on_start(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn no_listeners_means_no_event() {
        let bus = EventBus::default();
        assert!(bus
            .create(CallKind::Get, "app", None, vec![], None)
            .is_none());
    }

    #[tokio::test]
    async fn throttle_short_circuits() {
        let l = Arc::new(CountingListener {
            throttled: AtomicBool::new(true),
            starts: AtomicUsize::new(0),
        });
        let bus = EventBus::new(vec![l.clone()]);
        let event = bus
            .create(CallKind::Get, "app", None, vec![], None)
            .unwrap();
        assert!(bus.throttle(&event).await);
    }

    #[tokio::test]
    async fn listener_failure_is_swallowed() {
        let bus = EventBus::new(vec![Arc::new(FailingListener)]);
        let event = bus
            .create(CallKind::Get, "app", None, vec![], None)
            .unwrap();
        bus.start(&event).await; // must not propagate the error
    }
}
