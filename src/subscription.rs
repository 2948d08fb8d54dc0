#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::envelope::{Envelope, Status};

/// Broadcast channel capacity for diagnostics.
const DIAGNOSTICS_CAPACITY: usize = 256;

pub type HandlerError = Box<dyn StdError + Send + Sync + 'static>;
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Envelope) -> HandlerResult + Send + Sync + 'static>;

/// Handler pair registered for one channel.
#[derive(Clone)]
pub struct Subscription {
    on_message: Handler,
    on_error: Option<Handler>,
}

impl Subscription {
    /// Handle envelopes with a `success` status.
    pub fn new<F>(on_message: F) -> Self
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            on_message: Arc::new(on_message),
            on_error: None,
        }
    }

    /// Handle envelopes with an `error` status. Without one, such envelopes
    /// are reported as [`Diagnostic::UnhandledError`].
    #[must_use]
    pub fn with_on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Handlers that accept everything and do nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| Ok(())).with_on_error(|_| Ok(()))
    }

    #[must_use]
    pub fn has_error_handler(&self) -> bool {
        self.on_error.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// A subscription to send: channel name, optional payload and handlers.
///
/// ```
/// use serde_json::json;
/// use ws_pubsub::subscription::SubscribeRequest;
///
/// let request = SubscribeRequest::new("prices", |envelope| {
///     println!("{:?}", envelope.data);
///     Ok(())
/// })
/// .data(json!({ "symbol": "btcusdt" }))
/// .on_error(|envelope| {
///     eprintln!("rejected: {:?}", envelope.raw);
///     Ok(())
/// });
/// # drop(request);
/// ```
#[derive(Debug)]
pub struct SubscribeRequest {
    pub(crate) name: String,
    pub(crate) data: Option<Value>,
    pub(crate) subscription: Subscription,
}

impl SubscribeRequest {
    pub fn new<N, F>(name: N, on_message: F) -> Self
    where
        N: Into<String>,
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        Self::with_subscription(name, Subscription::new(on_message))
    }

    pub fn with_subscription<N: Into<String>>(name: N, subscription: Subscription) -> Self {
        Self {
            name: name.into(),
            data: None,
            subscription,
        }
    }

    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscription = self.subscription.with_on_error(on_error);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Routing field an inbound envelope was missing.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingField {
    Status,
    Channel,
}

/// Recoverable, message-level conditions observed while dispatching.
///
/// None of these affect the connection; the offending envelope is dropped.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// The envelope lacked the `status` field or the configured channel field
    MissingField {
        field: RoutingField,
        envelope: Value,
    },
    /// An `error` envelope arrived for a channel registered without an error handler
    UnhandledError { channel: String, envelope: Value },
    /// A registered handler returned an error
    HandlerFailed {
        channel: String,
        status: Status,
        message: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field, envelope } => {
                write!(f, "envelope without {field:?} field dropped: {envelope}")
            }
            Self::UnhandledError { channel, envelope } => {
                write!(f, "error on channel {channel} has no error handler: {envelope}")
            }
            Self::HandlerFailed {
                channel,
                status,
                message,
            } => write!(f, "{status} handler for channel {channel} failed: {message}"),
        }
    }
}

/// Outcome of routing one inbound envelope.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// `on_message` ran
    Delivered,
    /// `on_error` ran
    ErrorDelivered,
    /// A routing field was missing
    MissingField(RoutingField),
    /// No subscription for the channel
    UnknownChannel,
    /// `error` status but no `on_error`
    Unhandled,
    /// Status other than `success` or `error`
    Ignored,
    /// The handler that ran returned an error
    HandlerFailed,
}

/// Channel name to handler-pair map, and the dispatcher over it.
pub struct SubscriptionRegistry {
    entries: DashMap<String, Subscription>,
    diagnostics: broadcast::Sender<Diagnostic>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_CAPACITY);
        Self {
            entries: DashMap::new(),
            diagnostics,
        }
    }
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register handlers for `channel`, replacing any previous registration.
    ///
    /// Returns `true` if a registration was replaced.
    pub fn register(&self, channel: String, subscription: Subscription) -> bool {
        #[cfg(feature = "tracing")]
        tracing::debug!(%channel, "registering subscription");

        self.entries.insert(channel, subscription).is_some()
    }

    /// Remove the local registration for `channel`.
    pub fn unregister(&self, channel: &str) -> bool {
        #[cfg(feature = "tracing")]
        tracing::debug!(%channel, "removing subscription");

        self.entries.remove(channel).is_some()
    }

    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.entries.contains_key(channel)
    }

    #[must_use]
    pub fn get(&self, channel: &str) -> Option<Subscription> {
        self.entries.get(channel).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Receive diagnostics reported from now on.
    #[must_use]
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Route an inbound envelope to the handler registered for its channel.
    pub fn dispatch(&self, envelope: &Envelope) -> Dispatch {
        let Some(status) = &envelope.status else {
            self.missing(RoutingField::Status, envelope);
            return Dispatch::MissingField(RoutingField::Status);
        };
        let Some(channel) = &envelope.channel else {
            self.missing(RoutingField::Channel, envelope);
            return Dispatch::MissingField(RoutingField::Channel);
        };

        // Clone the handlers out so no map guard is held while they run;
        // a handler may subscribe or unsubscribe.
        let Some(subscription) = self.get(channel) else {
            #[cfg(feature = "tracing")]
            tracing::trace!(%channel, "no subscription for channel, dropping envelope");
            return Dispatch::UnknownChannel;
        };

        let (handler, delivered) = match status {
            Status::Success => (&subscription.on_message, Dispatch::Delivered),
            Status::Error => match &subscription.on_error {
                Some(on_error) => (on_error, Dispatch::ErrorDelivered),
                None => {
                    self.report(Diagnostic::UnhandledError {
                        channel: channel.clone(),
                        envelope: envelope.raw.clone(),
                    });
                    return Dispatch::Unhandled;
                }
            },
            Status::Other(_other) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%channel, status = %_other, "unrecognized status, dropping envelope");
                return Dispatch::Ignored;
            }
        };

        let message = match panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
            Ok(Ok(())) => return delivered,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
        };

        self.report(Diagnostic::HandlerFailed {
            channel: channel.clone(),
            status: status.clone(),
            message,
        });
        Dispatch::HandlerFailed
    }

    fn missing(&self, field: RoutingField, envelope: &Envelope) {
        self.report(Diagnostic::MissingField {
            field,
            envelope: envelope.raw.clone(),
        });
    }

    fn report(&self, diagnostic: Diagnostic) {
        #[cfg(feature = "tracing")]
        tracing::warn!(%diagnostic, "dropping inbound envelope");

        // No receivers is fine; diagnostics are best effort.
        _ = self.diagnostics.send(diagnostic);
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::envelope::EnvelopeShape;

    fn envelope(value: &Value) -> Envelope {
        EnvelopeShape::default().decode(&value.to_string()).unwrap()
    }

    fn counting() -> (Arc<AtomicUsize>, impl Fn(&Envelope) -> HandlerResult) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler_count = Arc::clone(&count);
        (count, move |_: &Envelope| {
            handler_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn success_invokes_only_on_message() {
        let registry = SubscriptionRegistry::new();
        let (messages, on_message) = counting();
        let (errors, on_error) = counting();
        registry.register(
            "prices".to_owned(),
            Subscription::new(on_message).with_on_error(on_error),
        );

        let outcome = registry.dispatch(&envelope(
            &json!({ "channel": "prices", "status": "success", "data": 1 }),
        ));

        assert_eq!(outcome, Dispatch::Delivered);
        assert_eq!(messages.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn error_without_handler_is_reported_not_delivered() {
        let registry = SubscriptionRegistry::new();
        let mut diagnostics = registry.diagnostics();
        let (messages, on_message) = counting();
        registry.register("prices".to_owned(), Subscription::new(on_message));

        let outcome =
            registry.dispatch(&envelope(&json!({ "channel": "prices", "status": "error" })));

        assert_eq!(outcome, Dispatch::Unhandled);
        assert_eq!(messages.load(Ordering::SeqCst), 0);
        assert!(
            matches!(
                diagnostics.try_recv(),
                Ok(Diagnostic::UnhandledError { ref channel, .. }) if channel == "prices"
            ),
            "unhandled error should be reported"
        );
    }

    #[test]
    fn error_with_handler_invokes_on_error() {
        let registry = SubscriptionRegistry::new();
        let (messages, on_message) = counting();
        let (errors, on_error) = counting();
        registry.register(
            "prices".to_owned(),
            Subscription::new(on_message).with_on_error(on_error),
        );

        let outcome =
            registry.dispatch(&envelope(&json!({ "channel": "prices", "status": "error" })));

        assert_eq!(outcome, Dispatch::ErrorDelivered);
        assert_eq!(messages.load(Ordering::SeqCst), 0);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_fields_are_dropped_with_diagnostic() {
        let registry = SubscriptionRegistry::new();
        let mut diagnostics = registry.diagnostics();
        let (messages, on_message) = counting();
        registry.register("prices".to_owned(), Subscription::new(on_message));

        let no_channel = registry.dispatch(&envelope(&json!({ "status": "success" })));
        let no_status = registry.dispatch(&envelope(&json!({ "channel": "prices" })));

        assert_eq!(no_channel, Dispatch::MissingField(RoutingField::Channel));
        assert_eq!(no_status, Dispatch::MissingField(RoutingField::Status));
        assert_eq!(messages.load(Ordering::SeqCst), 0);
        assert!(
            matches!(
                diagnostics.try_recv(),
                Ok(Diagnostic::MissingField {
                    field: RoutingField::Channel,
                    ..
                })
            ),
            "missing channel reported"
        );
        assert!(
            matches!(
                diagnostics.try_recv(),
                Ok(Diagnostic::MissingField {
                    field: RoutingField::Status,
                    ..
                })
            ),
            "missing status reported"
        );
    }

    #[test]
    fn unknown_channel_is_silently_dropped() {
        let registry = SubscriptionRegistry::new();
        let mut diagnostics = registry.diagnostics();

        let outcome =
            registry.dispatch(&envelope(&json!({ "channel": "nobody", "status": "success" })));

        assert_eq!(outcome, Dispatch::UnknownChannel);
        assert!(diagnostics.try_recv().is_err(), "nothing reported");
    }

    #[test]
    fn unrecognized_status_is_silently_dropped() {
        let registry = SubscriptionRegistry::new();
        let mut diagnostics = registry.diagnostics();
        let (messages, on_message) = counting();
        let (errors, on_error) = counting();
        registry.register(
            "prices".to_owned(),
            Subscription::new(on_message).with_on_error(on_error),
        );

        let outcome =
            registry.dispatch(&envelope(&json!({ "channel": "prices", "status": "pending" })));

        assert_eq!(outcome, Dispatch::Ignored);
        assert_eq!(messages.load(Ordering::SeqCst), 0);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert!(diagnostics.try_recv().is_err(), "nothing reported");
    }

    #[test]
    fn resubscribing_overwrites_previous_handlers() {
        let registry = SubscriptionRegistry::new();
        let (first, first_handler) = counting();
        let (second, second_handler) = counting();

        assert!(!registry.register("prices".to_owned(), Subscription::new(first_handler)));
        assert!(registry.register("prices".to_owned(), Subscription::new(second_handler)));
        assert_eq!(registry.len(), 1);

        registry.dispatch(&envelope(&json!({ "channel": "prices", "status": "success" })));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_failure_is_reported_distinctly() {
        let registry = SubscriptionRegistry::new();
        let mut diagnostics = registry.diagnostics();
        registry.register(
            "prices".to_owned(),
            Subscription::new(|_| Err(io::Error::other("handler broke").into())),
        );

        let outcome =
            registry.dispatch(&envelope(&json!({ "channel": "prices", "status": "success" })));

        assert_eq!(outcome, Dispatch::HandlerFailed);
        let Ok(Diagnostic::HandlerFailed {
            channel,
            status,
            message,
        }) = diagnostics.try_recv()
        else {
            panic!("expected a handler failure diagnostic");
        };
        assert_eq!(channel, "prices");
        assert_eq!(status, Status::Success);
        assert_eq!(message, "handler broke");
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let inner = Arc::clone(&registry);
        registry.register(
            "once".to_owned(),
            Subscription::new(move |_| {
                inner.unregister("once");
                Ok(())
            }),
        );

        let outcome =
            registry.dispatch(&envelope(&json!({ "channel": "once", "status": "success" })));

        assert_eq!(outcome, Dispatch::Delivered);
        assert!(!registry.contains("once"), "handler removed its own registration");
    }

    #[test]
    fn unregister_removes_local_registration() {
        let registry = SubscriptionRegistry::new();
        registry.register("a".to_owned(), Subscription::noop());

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn panicking_handler_is_reported_as_failure() {
        let registry = SubscriptionRegistry::new();
        let mut diagnostics = registry.diagnostics();
        registry.register(
            "prices".to_owned(),
            Subscription::new(|_| panic!("handler exploded")),
        );

        let outcome =
            registry.dispatch(&envelope(&json!({ "channel": "prices", "status": "success" })));

        assert_eq!(outcome, Dispatch::HandlerFailed);
        assert!(
            matches!(
                diagnostics.try_recv(),
                Ok(Diagnostic::HandlerFailed { ref message, .. }) if message.contains("handler exploded")
            ),
            "panic reported as handler failure"
        );
        assert!(registry.contains("prices"), "registration survives the panic");
    }
}
