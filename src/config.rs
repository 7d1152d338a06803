use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// GatewayBackend
// ---------------------------------------------------------------------------

/// Transport used to reach the hub, selected once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayBackend {
    /// Pull-based JSON API served by the hub itself.
    Http { base_url: String },
    /// Push-based realtime database shared with the hub.
    Firebase {
        database_url: String,
        auth_token: Option<String>,
        /// Skip discovery under `devices/*` when set.
        device_id: Option<String>,
    },
}

/// Value of `GATEWAY_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Http,
    Firebase,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Self::Http),
            "firebase" => Ok(Self::Firebase),
            other => Err(anyhow::anyhow!("unknown gateway backend: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

pub const DEFAULT_HUB_URL: &str = "http://192.168.1.100:8080";
pub const DEFAULT_GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: GatewayBackend,
    /// Bound on a single fetch or write.
    pub request_timeout: Duration,
    /// Bound on waiting for a correlated command acknowledgment.
    pub command_timeout: Duration,
    /// Interval between `/status` polls for the HTTP subscription, and the
    /// back-off before a dropped push listener re-attaches.
    pub poll_interval: Duration,
    /// Concurrent background operations.
    pub worker_pool_size: usize,
    /// `None` puts the advisory bridge in placeholder mode.
    pub gemini_api_key: Option<String>,
    pub gemini_endpoint: String,
    pub advisory_timeout: Duration,
    pub automation_enabled: bool,
    pub control_interval: Duration,
    /// Window requested from the hub history on startup.
    pub history_hours: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let kind: BackendKind = env
            .optional("GATEWAY_BACKEND", "http")
            .parse()
            .context("GATEWAY_BACKEND must be 'http' or 'firebase'")?;

        let backend = match kind {
            BackendKind::Http => GatewayBackend::Http {
                base_url: trim_url(env.optional("HUB_BASE_URL", DEFAULT_HUB_URL)),
            },
            BackendKind::Firebase => GatewayBackend::Firebase {
                database_url: trim_url(env.required("FIREBASE_DATABASE_URL")?),
                auth_token: env.non_empty("FIREBASE_AUTH_TOKEN"),
                device_id: env.non_empty("HUB_DEVICE_ID"),
            },
        };

        Ok(Self {
            backend,
            request_timeout: env.secs("REQUEST_TIMEOUT_SECS", "10")?,
            command_timeout: env.secs("COMMAND_TIMEOUT_SECS", "10")?,
            poll_interval: env.secs("POLL_INTERVAL_SECS", "30")?,
            worker_pool_size: env
                .optional("WORKER_POOL_SIZE", "3")
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .context("WORKER_POOL_SIZE must be a positive integer")?,
            gemini_api_key: env.non_empty("GEMINI_API_KEY"),
            gemini_endpoint: env.optional("GEMINI_ENDPOINT", DEFAULT_GEMINI_ENDPOINT),
            advisory_timeout: env.secs("ADVISORY_TIMEOUT_SECS", "30")?,
            automation_enabled: parse_bool(&env.optional("AUTOMATION_ENABLED", "false"))
                .context("AUTOMATION_ENABLED must be true or false")?,
            control_interval: env.secs("CONTROL_INTERVAL_SECS", "60")?,
            history_hours: env
                .optional("HISTORY_HOURS", "24")
                .parse()
                .context("HISTORY_HOURS must be a positive integer")?,
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn required(&self, key: &str) -> Result<String> {
        (self.0)(key).with_context(|| format!("missing required env var: {key}"))
    }

    fn optional(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_owned())
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn secs(&self, key: &str, default: &str) -> Result<Duration> {
        let secs: u64 = self
            .optional(key, default)
            .parse()
            .with_context(|| format!("{key} must be a positive integer"))?;
        anyhow::ensure!(secs > 0, "{key} must be a positive integer");
        Ok(Duration::from_secs(secs))
    }
}

fn trim_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_owned()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("not a boolean: {other:?}")),
    }
}
