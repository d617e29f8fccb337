use serde_json::Value;

use crate::error::DriverError;

/// Viewport coordinate in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Alt,
    Ctrl,
    Meta,
    Shift,
}

/// What the core needs from a live browser page.
///
/// Implementations are blocking; the control loop runs them on a blocking
/// thread and owns the single session for the whole instruction.
pub trait BrowserDriver: Send + Sync {
    /// Evaluate a script expression in the top-level page and return its
    /// JSON value (`Value::Null` for `undefined`).
    fn evaluate(&self, script: &str) -> Result<Value, DriverError>;

    /// Navigate and wait for the load to complete. Returns the final URL.
    fn navigate(&self, url: &str) -> Result<String, DriverError>;

    /// Go one step back in history and wait for the load. Returns the new URL.
    fn go_back(&self) -> Result<String, DriverError>;

    fn current_url(&self) -> Result<String, DriverError>;

    fn mouse_move(&self, point: Point) -> Result<(), DriverError>;

    fn mouse_click(&self, point: Point) -> Result<(), DriverError>;

    /// Press and release one key (DOM `key` name such as `Enter`, `a`).
    fn press_key(&self, key: &str, modifiers: &[Modifier]) -> Result<(), DriverError>;

    /// Hold modifiers down, press `key`, then release them.
    fn press_key_held(&self, key: &str, held: &[Modifier]) -> Result<(), DriverError> {
        self.press_key(key, held)
    }

    /// Insert one character as text input into the focused element.
    fn send_char(&self, ch: char) -> Result<(), DriverError>;
}
