//! Runtime configuration (spec.md §6 "Configuration keys recognized").
//!
//! The teacher has no configuration layer of its own — `with-mx`,
//! `with-smtp-verify`, etc. are compile-time Cargo features, not runtime
//! settings. This mirrors `open-hims-rustcare-engine/config-engine`'s use of
//! the `config` crate instead: defaults are set programmatically, then
//! layered with an environment source, then deserialized into a typed
//! struct. `smtp.mail_from` has no safe default (spec.md §6) and its absence
//! is a [`ConfigError`] at construction time.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub ehlo_hostname: String,
    pub mail_from: String,
    /// Verify the STARTTLS peer certificate. Default `false`: spec.md's open
    /// question on this leaves it unresolved, and the teacher's own
    /// `native-tls` usage performs no certificate pinning either, so the
    /// permissive default matches existing behaviour. See DESIGN.md.
    pub starttls_verify: bool,
    pub port: u16,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 15_000,
            write_timeout_ms: 15_000,
            ehlo_hostname: "localhost".to_string(),
            mail_from: String::new(),
            starttls_verify: false,
            port: 25,
        }
    }
}

impl SmtpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    pub per_domain_interval_ms: u64,
    pub per_domain_concurrency: usize,
    pub per_mx_concurrency: usize,
    /// Multiplier applied to `per_domain_interval_ms` after a `421` reply,
    /// decaying back to baseline after `cooldown_idle_secs` of quiet.
    pub cooldown_factor: u32,
    pub cooldown_idle_secs: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            per_domain_interval_ms: 1_000,
            per_domain_concurrency: 5,
            per_mx_concurrency: 50,
            cooldown_factor: 2,
            cooldown_idle_secs: 300,
        }
    }
}

impl RateSettings {
    pub fn per_domain_interval(&self) -> Duration {
        Duration::from_millis(self.per_domain_interval_ms)
    }
    pub fn cooldown_idle(&self) -> Duration {
        Duration::from_secs(self.cooldown_idle_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 2_000,
            factor: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Exponential backoff for the given zero-indexed retry attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let millis = self.base_backoff_ms as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(millis.round() as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatchallSettings {
    pub enabled: bool,
    pub probe_count: u8,
    pub intra_probe_delay_ms: u64,
    pub freshness_secs: u64,
}

impl Default for CatchallSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_count: 2,
            intra_probe_delay_ms: 500,
            freshness_secs: 7 * 24 * 3600,
        }
    }
}

impl CatchallSettings {
    pub fn intra_probe_delay(&self) -> Duration {
        Duration::from_millis(self.intra_probe_delay_ms)
    }
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub mx_ttl_min_secs: u64,
    pub mx_ttl_max_secs: u64,
    pub mx_negative_ttl_secs: u64,
    pub result_ttl_secs: u64,
    pub result_max_capacity: u64,
    pub domain_meta_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            mx_ttl_min_secs: 3600,
            mx_ttl_max_secs: 24 * 3600,
            mx_negative_ttl_secs: 600,
            result_ttl_secs: 7 * 24 * 3600,
            result_max_capacity: 100_000,
            domain_meta_ttl_secs: 24 * 3600,
        }
    }
}

impl CacheSettings {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
    pub fn mx_ttl_min(&self) -> Duration {
        Duration::from_secs(self.mx_ttl_min_secs)
    }
    pub fn mx_ttl_max(&self) -> Duration {
        Duration::from_secs(self.mx_ttl_max_secs)
    }
    pub fn mx_negative_ttl(&self) -> Duration {
        Duration::from_secs(self.mx_negative_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub smtp: SmtpSettings,
    pub rate: RateSettings,
    pub retry: RetrySettings,
    pub catchall: CatchallSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration source error: {0}")]
    Source(#[from] config::ConfigError),
    #[error("smtp.mail_from is required and has no default")]
    MissingMailFrom,
}

impl Config {
    /// Load defaults layered with an `MAILGATE_`-prefixed environment
    /// source (`MAILGATE_SMTP__MAIL_FROM`, `MAILGATE_RATE__PER_DOMAIN_CONCURRENCY`,
    /// ...), per spec.md §6, then validate that `smtp.mail_from` ended up set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self::from_env_unvalidated()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Same as [`Config::from_env`] but skips the `smtp.mail_from` presence
    /// check, for callers (e.g. the CLI) that still need to apply an
    /// override such as `--from` before validating — call [`Config::validate`]
    /// once the override has been applied.
    pub fn from_env_unvalidated() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let raw = config::Config::builder()
            .set_default("smtp.connect_timeout_ms", defaults.smtp.connect_timeout_ms)?
            .set_default("smtp.read_timeout_ms", defaults.smtp.read_timeout_ms)?
            .set_default("smtp.write_timeout_ms", defaults.smtp.write_timeout_ms)?
            .set_default("smtp.ehlo_hostname", defaults.smtp.ehlo_hostname.clone())?
            .set_default("smtp.mail_from", defaults.smtp.mail_from.clone())?
            .set_default("smtp.starttls_verify", defaults.smtp.starttls_verify)?
            .set_default("smtp.port", defaults.smtp.port as i64)?
            .set_default(
                "rate.per_domain_interval_ms",
                defaults.rate.per_domain_interval_ms,
            )?
            .set_default(
                "rate.per_domain_concurrency",
                defaults.rate.per_domain_concurrency as i64,
            )?
            .set_default(
                "rate.per_mx_concurrency",
                defaults.rate.per_mx_concurrency as i64,
            )?
            .set_default("rate.cooldown_factor", defaults.rate.cooldown_factor as i64)?
            .set_default("rate.cooldown_idle_secs", defaults.rate.cooldown_idle_secs)?
            .set_default("retry.max_attempts", defaults.retry.max_attempts as i64)?
            .set_default("retry.base_backoff_ms", defaults.retry.base_backoff_ms)?
            .set_default("retry.factor", defaults.retry.factor)?
            .set_default("catchall.enabled", defaults.catchall.enabled)?
            .set_default("catchall.probe_count", defaults.catchall.probe_count as i64)?
            .set_default(
                "catchall.intra_probe_delay_ms",
                defaults.catchall.intra_probe_delay_ms,
            )?
            .set_default("catchall.freshness_secs", defaults.catchall.freshness_secs)?
            .set_default("cache.mx_ttl_min_secs", defaults.cache.mx_ttl_min_secs)?
            .set_default("cache.mx_ttl_max_secs", defaults.cache.mx_ttl_max_secs)?
            .set_default(
                "cache.mx_negative_ttl_secs",
                defaults.cache.mx_negative_ttl_secs,
            )?
            .set_default("cache.result_ttl_secs", defaults.cache.result_ttl_secs)?
            .set_default(
                "cache.result_max_capacity",
                defaults.cache.result_max_capacity as i64,
            )?
            .set_default(
                "cache.domain_meta_ttl_secs",
                defaults.cache.domain_meta_ttl_secs,
            )?
            .add_source(
                config::Environment::with_prefix("MAILGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = raw.try_deserialize()?;
        Ok(cfg)
    }

    /// `smtp.mail_from` has no safe default (spec.md §6); call this after
    /// any override (env, `--from`) has been applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp.mail_from.trim().is_empty() {
            return Err(ConfigError::MissingMailFrom);
        }
        Ok(())
    }

    /// Convenience constructor for tests and the CLI harness: defaults with
    /// the required `mail_from` filled in.
    pub fn with_mail_from(mail_from: impl Into<String>) -> Self {
        let mut cfg = Config::default();
        cfg.smtp.mail_from = mail_from.into();
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::with_mail_from("postmaster@example.com");
        assert_eq!(cfg.smtp.connect_timeout_ms, 10_000);
        assert_eq!(cfg.rate.per_domain_concurrency, 5);
        assert_eq!(cfg.rate.per_mx_concurrency, 50);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.catchall.probe_count, 2);
        assert_eq!(cfg.cache.result_ttl_secs, 7 * 24 * 3600);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let retry = RetrySettings::default();
        assert_eq!(retry.backoff_for(0), Duration::from_millis(2_000));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(4_000));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(8_000));
    }
}
