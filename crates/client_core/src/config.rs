use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::Context;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "site.toml";

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub contact_sink_url: Option<Url>,
    pub results_log_url: Option<Url>,
    pub analytics_url: Option<Url>,
    pub payment_url: Option<Url>,
    pub analyzing_min_dwell_ms: u64,
    pub analyzing_max_wait_ms: u64,
    pub http_timeout_ms: u64,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            contact_sink_url: None,
            results_log_url: None,
            analytics_url: None,
            payment_url: None,
            analyzing_min_dwell_ms: 3500,
            analyzing_max_wait_ms: 8000,
            http_timeout_ms: 5000,
        }
    }
}

impl SiteSettings {
    pub fn timings(&self) -> FlowTimings {
        FlowTimings {
            analyzing_min_dwell: Duration::from_millis(self.analyzing_min_dwell_ms),
            analyzing_max_wait: Duration::from_millis(self.analyzing_max_wait_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// Timers governing the analysing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTimings {
    pub analyzing_min_dwell: Duration,
    /// Upper bound on waiting for background calls once the dwell elapsed.
    pub analyzing_max_wait: Duration,
}

impl Default for FlowTimings {
    fn default() -> Self {
        SiteSettings::default().timings()
    }
}

/// Defaults, then `site.toml` (if present), then `APP__*` environment
/// variables.
pub fn load_settings() -> anyhow::Result<SiteSettings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<SiteSettings> {
    let mut settings = SiteSettings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", file.display()))?;
        for (key, value) in file_cfg {
            let value = match value {
                toml::Value::String(text) => text,
                other => other.to_string(),
            };
            apply(&mut settings, &key, &value)
                .with_context(|| format!("invalid `{key}` in '{}'", file.display()))?;
        }
    }

    for key in [
        "contact_sink_url",
        "results_log_url",
        "analytics_url",
        "payment_url",
        "analyzing_min_dwell_ms",
        "analyzing_max_wait_ms",
        "http_timeout_ms",
    ] {
        let env_key = format!("APP__{}", key.to_ascii_uppercase());
        if let Some(value) = env(&env_key) {
            apply(&mut settings, key, &value).with_context(|| format!("invalid {env_key}"))?;
        }
    }

    Ok(settings)
}

fn apply(settings: &mut SiteSettings, key: &str, value: &str) -> anyhow::Result<()> {
    let value = value.trim();
    match key {
        "contact_sink_url" => settings.contact_sink_url = parse_optional_url(value)?,
        "results_log_url" => settings.results_log_url = parse_optional_url(value)?,
        "analytics_url" => settings.analytics_url = parse_optional_url(value)?,
        "payment_url" => settings.payment_url = parse_optional_url(value)?,
        "analyzing_min_dwell_ms" => settings.analyzing_min_dwell_ms = value.parse()?,
        "analyzing_max_wait_ms" => settings.analyzing_max_wait_ms = value.parse()?,
        "http_timeout_ms" => settings.http_timeout_ms = value.parse()?,
        _ => tracing::warn!(key, "config: ignoring unknown setting"),
    }
    Ok(())
}

fn parse_optional_url(value: &str) -> anyhow::Result<Option<Url>> {
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(Url::parse(value)?))
}
