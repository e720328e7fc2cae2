use std::time::Duration;

use eyre::Result;
use serde::Deserialize;

use sengine_base::settings::{fragment, parse_bool, parse_opt};
use sengine_base::{LoadableFromSettings, Settings};

/// Drip pipeline tuning.
#[derive(Clone, Debug)]
pub struct DripSettings {
    /// Pre-queue scheduler cycle interval.
    pub interval: Duration,
    /// How far ahead of `scheduled_at` rows are promoted to the broker.
    pub lead_window: Duration,
    /// Max rows drained per cycle.
    pub batch_size: u64,
    /// Prefetch for the drip consumer.
    pub prefetch: u16,
    /// Optional extra delay between handled drip messages, per consumer.
    pub per_message_delay: Option<Duration>,
    /// Run a second in-process drip consumer.
    pub high_scale: bool,
}

/// Direct-send worker tuning.
#[derive(Clone, Debug)]
pub struct MessageWorkerSettings {
    /// Whether the `inbox.send` consumer runs at all.
    pub enabled: bool,
    /// Prefetch for the send consumer.
    pub prefetch: u16,
}

/// Settings for the courier agent: the shared base plus drip tuning.
#[derive(Debug)]
pub struct CourierSettings {
    pub(crate) base: Settings,
    pub(crate) drip: DripSettings,
    pub(crate) message_worker: MessageWorkerSettings,
}

#[derive(Debug, Deserialize)]
struct RawCourierSettings {
    pre_queue_worker_interval: Option<String>,
    drip_pre_queue_minutes: Option<String>,
    drip_pre_queue_batch: Option<String>,
    drip_consumer_prefetch: Option<String>,
    drip_rate_limit_ms: Option<String>,
    high_scale_drip_enabled: Option<String>,
    message_worker_enabled: Option<String>,
    message_prefetch: Option<String>,
}

impl CourierSettings {
    fn from_raw(base: Settings, raw: RawCourierSettings) -> Result<Self> {
        let per_message_delay =
            parse_opt("DRIP_RATE_LIMIT_MS", raw.drip_rate_limit_ms, 0u64)?;
        Ok(Self {
            base,
            drip: DripSettings {
                interval: Duration::from_millis(parse_opt(
                    "PRE_QUEUE_WORKER_INTERVAL",
                    raw.pre_queue_worker_interval,
                    30_000,
                )?),
                lead_window: Duration::from_secs(
                    60 * parse_opt("DRIP_PRE_QUEUE_MINUTES", raw.drip_pre_queue_minutes, 15u64)?,
                ),
                batch_size: parse_opt("DRIP_PRE_QUEUE_BATCH", raw.drip_pre_queue_batch, 2000)?,
                prefetch: parse_opt("DRIP_CONSUMER_PREFETCH", raw.drip_consumer_prefetch, 50)?,
                per_message_delay: (per_message_delay > 0)
                    .then(|| Duration::from_millis(per_message_delay)),
                high_scale: parse_bool(
                    "HIGH_SCALE_DRIP_ENABLED",
                    raw.high_scale_drip_enabled,
                    false,
                )?,
            },
            message_worker: MessageWorkerSettings {
                enabled: parse_bool("MESSAGE_WORKER_ENABLED", raw.message_worker_enabled, true)?,
                prefetch: parse_opt("MESSAGE_PREFETCH", raw.message_prefetch, 50)?,
            },
        })
    }
}

impl AsRef<Settings> for CourierSettings {
    fn as_ref(&self) -> &Settings {
        &self.base
    }
}

impl LoadableFromSettings for CourierSettings {
    fn load() -> Result<Self> {
        Self::from_raw(Settings::load()?, fragment()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn empty_raw() -> RawCourierSettings {
        serde_json::from_str("{}").unwrap()
    }

    fn base() -> Settings {
        Settings::from_raw(serde_json::from_str("{}").unwrap()).unwrap()
    }

    #[test]
    fn defaults_match_the_designed_tuning() {
        let settings = CourierSettings::from_raw(base(), empty_raw()).unwrap();
        assert_eq!(settings.drip.interval, Duration::from_secs(30));
        assert_eq!(settings.drip.lead_window, Duration::from_secs(15 * 60));
        assert_eq!(settings.drip.batch_size, 2000);
        assert_eq!(settings.drip.prefetch, 50);
        assert!(settings.drip.per_message_delay.is_none());
        assert!(!settings.drip.high_scale);
        assert!(settings.message_worker.enabled);
    }

    #[test]
    fn zero_rate_limit_delay_means_none() {
        let mut raw = empty_raw();
        raw.drip_rate_limit_ms = Some("0".into());
        let settings = CourierSettings::from_raw(base(), raw).unwrap();
        assert!(settings.drip.per_message_delay.is_none());

        let mut raw = empty_raw();
        raw.drip_rate_limit_ms = Some("250".into());
        let settings = CourierSettings::from_raw(base(), raw).unwrap();
        assert_eq!(
            settings.drip.per_message_delay,
            Some(Duration::from_millis(250))
        );
    }
}
