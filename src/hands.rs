use anyhow::{Context, Result};
use headless_chrome::browser::tab::ModifierKey;
use headless_chrome::browser::tab::point::Point as ChromePoint;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::driver::{BrowserDriver, Modifier, Point};
use crate::error::DriverError;

/// The one browser session an instruction runs against.
pub struct ChromeDriver {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    /// Attach to a running Chrome when an endpoint is configured, otherwise
    /// launch one with a persistent agent profile.
    pub fn launch(config: &BrowserConfig) -> Result<Self> {
        if let Some(endpoint) = &config.cdp_endpoint {
            info!(%endpoint, "attempting to attach to existing Chrome");
            match Browser::connect(endpoint.clone()) {
                Ok(browser) => {
                    let existing = {
                        let tabs = browser.get_tabs();
                        let tabs = tabs
                            .lock()
                            .map_err(|_| anyhow::anyhow!("tab list lock poisoned"))?;
                        tabs.first().cloned()
                    };
                    let tab = match existing {
                        Some(tab) => {
                            debug!("using existing tab");
                            tab
                        }
                        None => browser.new_tab()?,
                    };
                    info!("attached to existing Chrome");
                    return Ok(Self {
                        _browser: browser,
                        tab,
                    });
                }
                Err(err) => warn!(%err, "could not attach, launching a new Chrome"),
            }
        }

        let profile = agent_profile_dir()?;
        std::fs::create_dir_all(&profile)
            .with_context(|| format!("creating profile dir {}", profile.display()))?;

        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.as_ref().map(PathBuf::from),
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--disable-notifications"),
                OsStr::new("--start-maximized"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless = config.headless, "starting Chrome");
        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

fn agent_profile_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow::anyhow!("no local data directory"))?;
    Ok(base.join("webpilot").join("profile"))
}

fn modifier_keys(modifiers: &[Modifier]) -> Vec<ModifierKey> {
    modifiers
        .iter()
        .map(|m| match m {
            Modifier::Alt => ModifierKey::Alt,
            Modifier::Ctrl => ModifierKey::Ctrl,
            Modifier::Meta => ModifierKey::Meta,
            Modifier::Shift => ModifierKey::Shift,
        })
        .collect()
}

fn input_err(err: impl std::fmt::Display) -> DriverError {
    DriverError::Input(err.to_string())
}

impl BrowserDriver for ChromeDriver {
    fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        // Objects only cross the protocol by value as strings, so every
        // script result is JSON-encoded in the page and decoded here.
        let wrapped = format!("JSON.stringify(({}))", script.trim().trim_end_matches(';'));
        let result = self
            .tab
            .evaluate(&wrapped, true)
            .map_err(|e| DriverError::Script(e.to_string()))?;
        match result.value {
            Some(Value::String(raw)) => {
                serde_json::from_str(&raw).map_err(|e| DriverError::Decode(e.to_string()))
            }
            Some(other) => Ok(other),
            None => Ok(Value::Null),
        }
    }

    fn navigate(&self, url: &str) -> Result<String, DriverError> {
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        Ok(self.tab.get_url())
    }

    fn go_back(&self) -> Result<String, DriverError> {
        self.tab
            .evaluate("window.history.back()", false)
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        std::thread::sleep(Duration::from_millis(300));
        self.tab
            .wait_until_navigated()
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        Ok(self.tab.get_url())
    }

    fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.tab.get_url())
    }

    fn mouse_move(&self, point: Point) -> Result<(), DriverError> {
        self.tab
            .move_mouse_to_point(ChromePoint {
                x: point.x,
                y: point.y,
            })
            .map_err(input_err)?;
        Ok(())
    }

    fn mouse_click(&self, point: Point) -> Result<(), DriverError> {
        self.tab
            .click_point(ChromePoint {
                x: point.x,
                y: point.y,
            })
            .map_err(input_err)?;
        Ok(())
    }

    fn press_key(&self, key: &str, modifiers: &[Modifier]) -> Result<(), DriverError> {
        if modifiers.is_empty() {
            self.tab.press_key(key).map_err(input_err)?;
        } else {
            let keys = modifier_keys(modifiers);
            self.tab
                .press_key_with_modifiers(key, Some(keys.as_slice()))
                .map_err(input_err)?;
        }
        Ok(())
    }

    fn press_key_held(&self, key: &str, held: &[Modifier]) -> Result<(), DriverError> {
        std::thread::sleep(Duration::from_millis(200));
        self.press_key(key, held)?;
        std::thread::sleep(Duration::from_millis(200));
        Ok(())
    }

    fn send_char(&self, ch: char) -> Result<(), DriverError> {
        self.tab
            .send_character(&ch.to_string())
            .map_err(input_err)?;
        Ok(())
    }
}
