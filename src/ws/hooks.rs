use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use super::error::WsError;
use super::traits::CloseInfo;

type OpenHook = Arc<dyn Fn() + Send + Sync + 'static>;
type MessageHook = Arc<dyn Fn(&Value, &str) + Send + Sync + 'static>;
type ErrorHook = Arc<dyn Fn(&WsError) + Send + Sync + 'static>;
type CloseHook = Arc<dyn Fn(&CloseInfo) + Send + Sync + 'static>;

/// Connection-level callbacks, all optional.
///
/// Hooks run on the connection task, one at a time. They may call back into
/// the client; such calls are queued and handled after the hook returns. A
/// hook that panics is logged and otherwise ignored.
///
/// ```
/// use ws_pubsub::ws::Hooks;
///
/// let hooks = Hooks::new()
///     .on_open(|| println!("open"))
///     .on_error(|e| eprintln!("connection error: {e}"));
/// # drop(hooks);
/// ```
#[derive(Clone, Default)]
pub struct Hooks {
    on_open: Option<OpenHook>,
    on_message: Option<MessageHook>,
    on_error: Option<ErrorHook>,
    on_close: Option<CloseHook>,
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the transport opens, before the heartbeat starts and queued
    /// commands are flushed.
    #[must_use]
    pub fn on_open<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(hook));
        self
    }

    /// Called with the decoded document and the raw text of every inbound
    /// message, before it is dispatched to a channel.
    #[must_use]
    pub fn on_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(hook));
        self
    }

    /// Called for connection-level errors: transport failures, malformed
    /// envelopes, send timeouts and retry exhaustion.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WsError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Called when the connection closes, whether by the peer or by `close()`.
    #[must_use]
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(hook));
        self
    }

    pub(crate) fn opened(&self) {
        if let Some(hook) = &self.on_open {
            guarded("on_open", || hook());
        }
    }

    pub(crate) fn message(&self, data: &Value, raw: &str) {
        if let Some(hook) = &self.on_message {
            guarded("on_message", || hook(data, raw));
        }
    }

    pub(crate) fn error(&self, error: &WsError) {
        if let Some(hook) = &self.on_error {
            guarded("on_error", || hook(error));
        }
    }

    pub(crate) fn closed(&self, info: &CloseInfo) {
        if let Some(hook) = &self.on_close {
            guarded("on_close", || hook(info));
        }
    }
}

/// Run a hook, keeping a panic inside it from unwinding into the connection task.
fn guarded<F: FnOnce()>(name: &'static str, hook: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
        #[cfg(feature = "tracing")]
        tracing::error!(
            hook = name,
            panic = crate::subscription::panic_message(payload.as_ref()),
            "hook panicked"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (&name, &payload);
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}
