use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use briefing_core::{
    SlotSettings, DEFAULT_LOOKBACK_DAYS, DEFAULT_SUBJECT_PREFIX, MAX_FREQUENCY_DAYS,
};
use serde::{Deserialize, Serialize};
use time::{Time, UtcOffset};
use tracing::debug;

/// Scheduler configuration, read from YAML.
///
/// Every field has a default, so an empty file and a missing file both
/// produce a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    pub lookback_days: u32,
    pub subject_prefix: String,
    pub slots: SlotConfig,
    pub webhook: Option<WebhookConfig>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            slots: SlotConfig::default(),
            webhook: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SlotConfig {
    /// `HH:MM`, 24-hour clock.
    pub morning: String,
    pub afternoon: String,
    pub utc_offset_hours: i8,
    pub zone_label: String,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            morning: "10:00".to_string(),
            afternoon: "14:00".to_string(),
            utc_offset_hours: -5,
            zone_label: "ET".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

impl SchedulerSettings {
    /// Load settings from `path`, falling back to defaults when no file is given
    /// or the file does not exist.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read, parsed, or validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("invalid settings file {}", path.display()))
    }

    /// # Errors
    /// Returns an error when the YAML is malformed or the values are invalid.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let settings = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str::<Self>(raw).context("failed to parse settings YAML")?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// # Errors
    /// Returns an error for an out-of-range lookback, bad slot times, or a malformed webhook.
    pub fn validate(&self) -> Result<()> {
        if self.lookback_days == 0 {
            return Err(anyhow!("lookback_days MUST be >= 1"));
        }
        if self.lookback_days > MAX_FREQUENCY_DAYS {
            return Err(anyhow!(
                "lookback_days MUST be <= {MAX_FREQUENCY_DAYS}, got {}",
                self.lookback_days
            ));
        }
        self.slot_settings()?;
        if let Some(webhook) = &self.webhook {
            if !(webhook.url.starts_with("http://") || webhook.url.starts_with("https://")) {
                return Err(anyhow!("webhook.url MUST be an http(s) URL, got `{}`", webhook.url));
            }
            if webhook.timeout_secs == 0 {
                return Err(anyhow!("webhook.timeout_secs MUST be >= 1"));
            }
        }
        Ok(())
    }

    /// Resolve the slot section into typed times and offset.
    ///
    /// # Errors
    /// Returns an error when a time or the offset is out of range.
    pub fn slot_settings(&self) -> Result<SlotSettings> {
        let utc_offset = UtcOffset::from_hms(self.slots.utc_offset_hours, 0, 0).with_context(|| {
            format!("slots.utc_offset_hours out of range: {}", self.slots.utc_offset_hours)
        })?;
        let settings = SlotSettings {
            morning: parse_clock_time("slots.morning", &self.slots.morning)?,
            afternoon: parse_clock_time("slots.afternoon", &self.slots.afternoon)?,
            utc_offset,
            zone_label: self.slots.zone_label.clone(),
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_clock_time(field: &str, value: &str) -> Result<Time> {
    let format = time::format_description::parse("[hour]:[minute]")
        .context("failed to build clock time format")?;
    Time::parse(value.trim(), &format)
        .with_context(|| format!("{field} MUST be HH:MM (24-hour), got `{value}`"))
}
