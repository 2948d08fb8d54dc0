#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

use crate::envelope::EnvelopeShape;

const DEFAULT_TIMEOUT_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_CHANNEL: &str = "ping";
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for WebSocket client behavior.
///
/// ```
/// use std::time::Duration;
/// use ws_pubsub::ws::config::Config;
///
/// let config = Config::builder()
///     .heartbeat_interval(Duration::from_secs(10))
///     .manual_open(true)
///     .build();
/// assert_eq!(config.timeout, Duration::from_secs(30));
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Do not connect when the client is constructed; wait for an explicit `connect()`
    #[builder(default)]
    pub manual_open: bool,
    /// How long to wait for any inbound message after a send before reporting a timeout
    #[builder(default = DEFAULT_TIMEOUT_DURATION)]
    pub timeout: Duration,
    /// What to do when the send timeout fires
    #[builder(default)]
    pub timeout_policy: TimeoutPolicy,
    /// Interval between keep-alive subscriptions
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Reserved channel the keep-alive subscribes to
    #[builder(into, default = DEFAULT_HEARTBEAT_CHANNEL.to_owned())]
    pub heartbeat_channel: String,
    /// Field names of the channel and payload in each envelope
    #[builder(default)]
    pub envelope: EnvelopeShape,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manual_open: false,
            timeout: DEFAULT_TIMEOUT_DURATION,
            timeout_policy: TimeoutPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            heartbeat_channel: DEFAULT_HEARTBEAT_CHANNEL.to_owned(),
            envelope: EnvelopeShape::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Behavior when no inbound message follows a send within [`Config::timeout`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Report [`WsError::SendTimeout`](super::WsError::SendTimeout) and keep the connection
    #[default]
    Report,
    /// Report the timeout, drop the transport and go through the reconnect path
    Reconnect,
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts before the
    /// connection is marked as failed
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_attempts: u32,
    /// Initial backoff duration for first reconnection attempt
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[builder(default = DEFAULT_MAX_BACKOFF_DURATION)]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,
    /// Randomization applied to each backoff interval (0.0 disables jitter)
    #[builder(default = backoff::default::RANDOMIZATION_FACTOR)]
    pub randomization_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            randomization_factor: backoff::default::RANDOMIZATION_FACTOR,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(config.randomization_factor)
            .with_max_elapsed_time(None) // Attempts are bounded by max_attempts
            .build()
    }
}
