use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use moka::sync::Cache;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

const DEFAULT_ABUSE_THRESHOLD: u16 = 5;
const DEFAULT_ABUSE_WINDOW_SECS: u64 = 600;

/// Shared observability options for binaries.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
    abuse_threshold: u16,
    abuse_window: Duration,
}

impl TelemetryConfig {
    /// Loads telemetry knobs from optional environment variables prefixed with
    /// `<PREFIX>_`, e.g. `API_LOG_FILTER`. Missing entries fall back to sane
    /// defaults so binaries do not require extra configuration to boot.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let upper = prefix.trim().to_ascii_uppercase();
        let log_key = format!("{}_LOG_FILTER", upper);
        let metrics_key = format!("{}_METRICS_ADDRESS", upper);
        let abuse_key = format!("{}_ABUSE_THRESHOLD", upper);
        let window_key = format!("{}_ABUSE_WINDOW_SECS", upper);

        let log_filter = env::var(log_key).unwrap_or_else(|_| "info".to_string());
        let metrics_address = env::var(metrics_key).ok().and_then(|value| {
            if value.trim().is_empty() {
                None
            } else {
                Some(value)
            }
        });
        let abuse_threshold = env::var(abuse_key)
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_ABUSE_THRESHOLD);
        let abuse_window = env::var(window_key)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_ABUSE_WINDOW_SECS);

        Self {
            log_filter,
            metrics_address,
            abuse_threshold,
            abuse_window: Duration::from_secs(abuse_window),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }

    pub fn abuse_threshold(&self) -> u16 {
        self.abuse_threshold
    }

    pub fn abuse_window(&self) -> Duration {
        self.abuse_window
    }
}

/// Guard returned after telemetry initialization.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
    abuse_threshold: u16,
    abuse_window: Duration,
}

impl TelemetryGuard {
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }

    pub fn abuse_tracker(&self) -> AbuseTracker {
        AbuseTracker::new(self.abuse_threshold, self.abuse_window)
    }
}

/// Centralized helper to wire up tracing + metrics exporters once per process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;

    Ok(TelemetryGuard {
        metrics,
        abuse_threshold: config.abuse_threshold(),
        abuse_window: config.abuse_window(),
    })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let mut builder = PrometheusBuilder::new();
            if let Some(addr) = config.metrics_address() {
                let socket: SocketAddr =
                    addr.parse().map_err(|err: std::net::AddrParseError| {
                        TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                    })?;
                builder = builder.with_http_listener(socket);
            }

            builder
                .install_recorder()
                .map(Arc::new)
                .map_err(|err| TelemetryError::Metrics(err.to_string()))
        })
        .cloned()
}

/// Counts failed payment-token lookups per client so token guessing shows up
/// in logs and metrics. Entries expire `window` after their last failure.
#[derive(Clone)]
pub struct AbuseTracker {
    threshold: u16,
    attempts: Cache<String, u16>,
}

impl AbuseTracker {
    pub fn new(threshold: u16, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            attempts: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(window)
                .build(),
        }
    }

    pub fn record(&self, key: impl AsRef<str>) -> AbuseSignal {
        let key = key.as_ref().to_owned();
        let attempts = self
            .attempts
            .get(&key)
            .unwrap_or(0)
            .saturating_add(1);
        self.attempts.insert(key.clone(), attempts);
        counter!("abuse_events_total", "state" => "recorded").increment(1);

        if attempts >= self.threshold {
            counter!("abuse_events_total", "state" => "escalated").increment(1);
            warn!(identifier = %key, attempts, "abuse threshold exceeded");
            AbuseSignal::Escalated { attempts }
        } else {
            AbuseSignal::None
        }
    }

    pub fn reset(&self, key: impl AsRef<str>) {
        self.attempts.invalidate(key.as_ref());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbuseSignal {
    None,
    Escalated { attempts: u16 },
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn telemetry_config_uses_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::remove_var("API_LOG_FILTER");
        env::remove_var("API_METRICS_ADDRESS");
        env::remove_var("API_ABUSE_THRESHOLD");
        env::remove_var("API_ABUSE_WINDOW_SECS");

        let cfg = TelemetryConfig::from_env("api");
        assert_eq!(cfg.log_filter(), "info");
        assert_eq!(cfg.metrics_address(), None);
        assert_eq!(cfg.abuse_threshold(), 5);
        assert_eq!(cfg.abuse_window(), Duration::from_secs(600));
    }

    #[test]
    fn telemetry_config_reads_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("API_LOG_FILTER", "debug");
        env::set_var("API_METRICS_ADDRESS", "127.0.0.1:9898");
        env::set_var("API_ABUSE_THRESHOLD", "9");
        env::set_var("API_ABUSE_WINDOW_SECS", "30");
        let cfg = TelemetryConfig::from_env("API");
        assert_eq!(cfg.log_filter(), "debug");
        assert_eq!(cfg.metrics_address(), Some("127.0.0.1:9898"));
        assert_eq!(cfg.abuse_threshold(), 9);
        assert_eq!(cfg.abuse_window(), Duration::from_secs(30));
        env::remove_var("API_LOG_FILTER");
        env::remove_var("API_METRICS_ADDRESS");
        env::remove_var("API_ABUSE_THRESHOLD");
        env::remove_var("API_ABUSE_WINDOW_SECS");
    }

    #[test]
    fn empty_metrics_address_is_treated_as_none() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("API_METRICS_ADDRESS", "  ");
        let cfg = TelemetryConfig::from_env("API");
        assert_eq!(cfg.metrics_address(), None);
        env::remove_var("API_METRICS_ADDRESS");
    }

    #[test]
    fn abuse_tracker_escalates() {
        let tracker = AbuseTracker::new(2, Duration::from_secs(60));
        assert_eq!(tracker.record("10.0.0.1"), AbuseSignal::None);
        assert_eq!(
            tracker.record("10.0.0.1"),
            AbuseSignal::Escalated { attempts: 2 }
        );
        tracker.reset("10.0.0.1");
        assert_eq!(tracker.record("10.0.0.1"), AbuseSignal::None);
    }

    #[test]
    fn abuse_tracker_keys_are_independent() {
        let tracker = AbuseTracker::new(2, Duration::from_secs(60));
        assert_eq!(tracker.record("a"), AbuseSignal::None);
        assert_eq!(tracker.record("b"), AbuseSignal::None);
    }
}
