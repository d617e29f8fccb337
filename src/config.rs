//! Runtime configuration.
//!
//! Defaults are overridden by a `.env` file (loaded by the binary through
//! `dotenvy`) and then by the process environment.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Control-loop limits and suspension timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Hard ceiling on dispatched actions per instruction.
    pub max_iterations: u32,
    /// Consecutive failed observations before giving up.
    pub max_consecutive_failures: u32,
    pub oracle_timeout_secs: u64,
    pub action_timeout_secs: u64,
    pub user_timeout_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            max_consecutive_failures: 5,
            oracle_timeout_secs: 60,
            action_timeout_secs: 30,
            user_timeout_secs: 300,
        }
    }
}

impl LoopConfig {
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn user_timeout(&self) -> Duration {
        Duration::from_secs(self.user_timeout_secs)
    }
}

/// Backoff envelope for transient interaction failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

/// Human-likeness knobs for the interaction simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    pub typing_delay_ms: u64,
    /// Relative jitter around the typing delay (0.4 = ±40 %).
    pub typing_jitter: f64,
    /// Disables every sleep; used by tests and dry runs.
    pub instant: bool,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            typing_delay_ms: 90,
            typing_jitter: 0.4,
            instant: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    /// DevTools endpoint of an already running Chrome to attach to first.
    pub cdp_endpoint: Option<String>,
    pub chrome_path: Option<String>,
    pub max_elements: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            cdp_endpoint: Some("http://127.0.0.1:9222".to_string()),
            chrome_path: None,
            max_elements: 500,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.2,
        }
    }
}

impl std::fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub agent: LoopConfig,
    pub recovery: RecoveryConfig,
    pub interaction: InteractionConfig,
    pub browser: BrowserConfig,
    pub oracle: OracleConfig,
}

impl Config {
    /// Read every setting from the environment, keeping defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary key source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            config.oracle.api_key = Some(key);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.oracle.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("AGENT_MODEL") {
            config.oracle.model = model;
        }
        parse_into(&get, "AGENT_TEMPERATURE", &mut config.oracle.temperature)?;

        parse_into(&get, "AGENT_MAX_ITERATIONS", &mut config.agent.max_iterations)?;
        parse_into(
            &get,
            "AGENT_MAX_CONSECUTIVE_FAILURES",
            &mut config.agent.max_consecutive_failures,
        )?;
        parse_into(
            &get,
            "AGENT_ORACLE_TIMEOUT_SECS",
            &mut config.agent.oracle_timeout_secs,
        )?;
        parse_into(
            &get,
            "AGENT_ACTION_TIMEOUT_SECS",
            &mut config.agent.action_timeout_secs,
        )?;
        parse_into(
            &get,
            "AGENT_USER_TIMEOUT_SECS",
            &mut config.agent.user_timeout_secs,
        )?;

        parse_into(&get, "AGENT_MAX_ATTEMPTS", &mut config.recovery.max_attempts)?;
        parse_into(&get, "AGENT_BACKOFF_MS", &mut config.recovery.base_backoff_ms)?;
        parse_into(
            &get,
            "AGENT_TYPING_DELAY_MS",
            &mut config.interaction.typing_delay_ms,
        )?;
        parse_into(&get, "AGENT_MAX_ELEMENTS", &mut config.browser.max_elements)?;

        if let Some(raw) = get("BROWSER_HEADLESS") {
            config.browser.headless = parse_bool("BROWSER_HEADLESS", &raw)?;
        }
        if let Some(endpoint) = lookup("BROWSER_CDP_ENDPOINT") {
            // An explicitly empty endpoint disables attach mode.
            let endpoint = endpoint.trim().to_string();
            config.browser.cdp_endpoint = (!endpoint.is_empty()).then_some(endpoint);
        }
        if let Some(path) = get("CHROME_PATH") {
            config.browser.chrome_path = Some(path);
        }

        if config.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                key: "AGENT_MAX_ITERATIONS".to_string(),
                value: "0".to_string(),
            });
        }
        if config.recovery.max_attempts == 0 {
            config.recovery.max_attempts = 1;
        }

        Ok(config)
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.agent.max_iterations = max;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.browser.headless = headless;
        self
    }

    /// Zero delays everywhere; handy for tests.
    pub fn instant(mut self) -> Self {
        self.interaction.instant = true;
        self.recovery.base_backoff_ms = 1;
        self.recovery.max_backoff_ms = 1;
        self
    }
}

fn parse_into<T, F>(get: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}
