use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::InteractionConfig;
use crate::driver::{BrowserDriver, Point};
use crate::error::{DriverError, InteractError};
use crate::keys::parse_key_sequence;
use crate::motion::{cursor_path, jitter_pause, keystroke_delay, random_unit};
use crate::types::{ElementDescriptor, ElementKind, ElementLocator, ScrollDirection};

/// Where the virtual cursor sits before the first movement.
pub const CURSOR_START: Point = Point { x: 100.0, y: 100.0 };

const SEARCH_URL: &str = "https://www.google.com/search";

/// Pixels moved by one `scroll` up/down request.
const SCROLL_STEP_PX: f64 = 300.0;
const SCROLL_INCREMENTS: u32 = 3;

/// Executes resolved actions against the live page. Each operation returns
/// a short observation for the oracle.
pub trait Interact: Send {
    fn click(&mut self, element: &ElementDescriptor) -> Result<String, InteractError>;

    /// Focus `element` (when given), clear it, then type `text`.
    fn type_text(
        &mut self,
        element: Option<&ElementDescriptor>,
        text: &str,
    ) -> Result<String, InteractError>;

    fn select_option(
        &mut self,
        element: &ElementDescriptor,
        option: &str,
    ) -> Result<String, InteractError>;

    fn keyboard(
        &mut self,
        element: Option<&ElementDescriptor>,
        combo: &str,
    ) -> Result<String, InteractError>;

    fn navigate(&mut self, url: &str) -> Result<String, InteractError>;

    fn go_back(&mut self) -> Result<String, InteractError>;

    fn search(&mut self, query: &str) -> Result<String, InteractError>;

    fn scroll(&mut self, direction: ScrollDirection) -> Result<String, InteractError>;
}

/// Scroll the element into view and report its live centre, or why it
/// cannot be used.
const LOCATE_JS: &str = r#"/* locate */ (() => {
  const frames = __FRAMES__;
  const selector = __SELECTOR__;
  const chain = [];
  let doc = document;
  for (const path of frames) {
    const frame = doc.querySelector(path);
    let inner = null;
    try { inner = frame ? frame.contentDocument : null; } catch (e) { inner = null; }
    if (!inner) return { status: 'detached' };
    chain.push(frame);
    doc = inner;
  }
  const el = doc.querySelector(selector);
  if (!el || !el.isConnected) return { status: 'detached' };
  el.scrollIntoView({ block: 'center', inline: 'center', behavior: 'instant' });
  let ox = 0, oy = 0;
  for (const frame of chain) {
    const r = frame.getBoundingClientRect();
    ox += r.left + frame.clientLeft;
    oy += r.top + frame.clientTop;
  }
  const tag = el.tagName.toUpperCase();
  const type = (el.getAttribute('type') || '').toLowerCase();
  let text = '';
  if (tag === 'INPUT') text = ['submit','button','reset'].includes(type) ? (el.value || '') : '';
  else if (tag !== 'SELECT' && tag !== 'TEXTAREA' && !el.isContentEditable) text = el.innerText || el.textContent || '';
  text = text.replace(/\s+/g, ' ').trim();
  const r = el.getBoundingClientRect();
  const style = doc.defaultView.getComputedStyle(el);
  if (r.width <= 0 || r.height <= 0 || style.display === 'none' || style.visibility === 'hidden') {
    return { status: 'hidden', text };
  }
  if (el.disabled || el.getAttribute('aria-disabled') === 'true') return { status: 'disabled', text };
  const cx = r.left + r.width / 2;
  const cy = r.top + r.height / 2;
  const hit = doc.elementFromPoint(cx, cy);
  const labelled = el.labels && Array.from(el.labels).some((l) => l === hit || l.contains(hit));
  if (hit && hit !== el && !el.contains(hit) && !hit.contains(el) && !labelled) {
    return { status: 'covered', by: hit.tagName.toLowerCase(), text };
  }
  return { status: 'ok', x: cx + ox, y: cy + oy, text };
})()"#;

/// Pick an option of a native `<select>` by text, then value, then index.
const SELECT_JS: &str = r#"/* select */ (() => {
  const frames = __FRAMES__;
  const selector = __SELECTOR__;
  const wanted = __OPTION__;
  let doc = document;
  for (const path of frames) {
    const frame = doc.querySelector(path);
    let inner = null;
    try { inner = frame ? frame.contentDocument : null; } catch (e) { inner = null; }
    if (!inner) return { status: 'detached' };
    doc = inner;
  }
  const el = doc.querySelector(selector);
  if (!el) return { status: 'detached' };
  if (el.tagName.toUpperCase() !== 'SELECT') return { status: 'custom' };
  const options = Array.from(el.options);
  const norm = (t) => (t || '').replace(/\s+/g, ' ').trim().toLowerCase();
  const target = norm(wanted);
  let index = options.findIndex((o) => norm(o.text) === target);
  let via = 'text';
  if (index < 0) { index = options.findIndex((o) => norm(o.value) === target); via = 'value'; }
  if (index < 0 && /^\d+$/.test(target)) {
    const n = parseInt(target, 10);
    if (n >= 0 && n < options.length) { index = n; via = 'index'; }
  }
  if (index < 0) return { status: 'missing', options: options.slice(0, 20).map((o) => o.text.trim()) };
  el.selectedIndex = index;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return { status: 'ok', text: options[index].text.trim(), via };
})()"#;

/// Find a visible option of an opened custom dropdown.
const OPTION_JS: &str = r#"/* option */ (() => {
  const frames = __FRAMES__;
  const wanted = __OPTION__;
  let doc = document;
  let ox = 0, oy = 0;
  for (const path of frames) {
    const frame = doc.querySelector(path);
    let inner = null;
    try { inner = frame ? frame.contentDocument : null; } catch (e) { inner = null; }
    if (!inner) return { status: 'detached' };
    const r = frame.getBoundingClientRect();
    ox += r.left + frame.clientLeft;
    oy += r.top + frame.clientTop;
    doc = inner;
  }
  const norm = (t) => (t || '').replace(/\s+/g, ' ').trim().toLowerCase();
  const target = norm(wanted);
  const visible = (el) => {
    const r = el.getBoundingClientRect();
    const s = doc.defaultView.getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden';
  };
  const candidates = Array.from(doc.querySelectorAll('[role=option], li, option, .dropdown-item, [role=menuitem]'))
    .filter(visible);
  const pick = candidates.find((el) => norm(el.innerText || el.textContent) === target)
    || candidates.find((el) => norm(el.innerText || el.textContent).includes(target));
  if (!pick) {
    return { status: 'missing', options: candidates.slice(0, 15).map((el) => norm(el.innerText || el.textContent)) };
  }
  pick.scrollIntoView({ block: 'nearest', behavior: 'instant' });
  const r = pick.getBoundingClientRect();
  return { status: 'ok', x: r.left + r.width / 2 + ox, y: r.top + r.height / 2 + oy,
           text: (pick.innerText || pick.textContent || '').trim() };
})()"#;

const SCROLL_JS: &str = r#"/* scroll */ (() => {
  const to = __TO__;
  const by = __BY__;
  const root = document.scrollingElement || document.documentElement;
  if (to === 'top') window.scrollTo(0, 0);
  else if (to === 'bottom') window.scrollTo(0, root.scrollHeight);
  else if (by !== 0) window.scrollBy(0, by);
  return { y: window.scrollY, max: Math.max(0, root.scrollHeight - window.innerHeight) };
})()"#;

fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn with_locator(script: &str, locator: &ElementLocator) -> String {
    script
        .replace("__FRAMES__", &js_literal(&locator.frames))
        .replace("__SELECTOR__", &js_literal(&locator.selector))
}

pub fn locate_script(locator: &ElementLocator) -> String {
    with_locator(LOCATE_JS, locator)
}

pub fn select_script(locator: &ElementLocator, option: &str) -> String {
    with_locator(SELECT_JS, locator).replace("__OPTION__", &js_literal(option))
}

pub fn option_script(locator: &ElementLocator, option: &str) -> String {
    with_locator(OPTION_JS, locator).replace("__OPTION__", &js_literal(option))
}

fn scroll_script(to: Option<&str>, by: f64) -> String {
    SCROLL_JS
        .replace("__TO__", &js_literal(&to))
        .replace("__BY__", &by.to_string())
}

#[derive(Debug, Deserialize)]
struct ScriptReply {
    status: String,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    by: Option<String>,
    #[serde(default)]
    via: Option<String>,
    #[serde(default)]
    options: Vec<String>,
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, InteractError> {
    serde_json::from_value(value).map_err(|e| DriverError::Decode(e.to_string()).into())
}

#[derive(Debug, Deserialize)]
struct ScrollPosition {
    y: f64,
    max: f64,
}

impl ScrollPosition {
    fn at_top(&self) -> bool {
        self.y <= 1.0
    }

    fn at_bottom(&self) -> bool {
        self.y >= self.max - 1.0
    }

    /// The edge reached in the direction of travel, if any. A page that
    /// cannot scroll is at both edges.
    fn boundary(&self, direction: ScrollDirection) -> Option<&'static str> {
        match direction {
            ScrollDirection::Up | ScrollDirection::Top => self.at_top().then_some("top"),
            ScrollDirection::Down | ScrollDirection::Bottom => {
                self.at_bottom().then_some("bottom")
            }
        }
    }
}

/// Clean up a URL handed over by the oracle.
///
/// Strips wrapping quotes and backticks, collapses a duplicated leading
/// protocol (`https://https://x`) and defaults to `https://`.
pub fn normalize_url(raw: &str) -> Result<String, InteractError> {
    let mut url = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '<' | '>'))
        .trim()
        .to_string();
    if url.is_empty() {
        return Err(InteractError::Invalid("empty URL".to_string()));
    }

    loop {
        let lower = url.to_ascii_lowercase();
        let rest = ["https://", "http://"]
            .iter()
            .find_map(|scheme| lower.strip_prefix(scheme).map(|_| &url[scheme.len()..]));
        match rest {
            Some(rest)
                if rest.to_ascii_lowercase().starts_with("http://")
                    || rest.to_ascii_lowercase().starts_with("https://") =>
            {
                url = rest.to_string();
            }
            _ => break,
        }
    }

    let has_scheme = url.contains("://")
        || ["about:", "data:", "file:", "chrome:"]
            .iter()
            .any(|p| url.to_ascii_lowercase().starts_with(p));
    if !has_scheme {
        url = format!("https://{}", url);
    }

    reqwest::Url::parse(&url)
        .map(|parsed| parsed.to_string())
        .map_err(|e| InteractError::Invalid(format!("invalid URL {:?}: {}", raw, e)))
}

pub fn search_url(query: &str) -> Result<String, InteractError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(InteractError::Invalid("empty search query".to_string()));
    }
    reqwest::Url::parse_with_params(SEARCH_URL, [("q", query)])
        .map(|url| url.to_string())
        .map_err(|e| InteractError::Invalid(e.to_string()))
}

/// Drives the page through a [`BrowserDriver`] with human-like motion and
/// timing.
pub struct Simulator {
    driver: Arc<dyn BrowserDriver>,
    config: InteractionConfig,
    cursor: Point,
    sample: fn() -> f64,
}

impl Simulator {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: InteractionConfig) -> Self {
        Self {
            driver,
            config,
            cursor: CURSOR_START,
            sample: random_unit,
        }
    }

    /// Replace the randomness source; tests use a constant.
    pub fn with_sampler(mut self, sample: fn() -> f64) -> Self {
        self.sample = sample;
        self
    }

    pub fn cursor(&self) -> Point {
        self.cursor
    }

    fn pause(&self, duration: Duration) {
        if !self.config.instant && !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    fn settle(&self, min_ms: u64, max_ms: u64) {
        self.pause(jitter_pause(min_ms, max_ms, self.sample));
    }

    fn locate(&self, element: &ElementDescriptor) -> Result<Point, InteractError> {
        let reply: ScriptReply = decode(self.driver.evaluate(&locate_script(&element.locator))?)?;

        // A live node whose text no longer matches is a different element
        // that took over the same structural position.
        let changed = !element.visible_text.is_empty()
            && !reply.text.is_empty()
            && element.kind != ElementKind::Select
            && !reply
                .text
                .chars()
                .take(element.visible_text.chars().count())
                .eq(element.visible_text.chars());

        match reply.status.as_str() {
            "detached" => Err(InteractError::Detached { id: element.id }),
            _ if changed => {
                debug!(id = element.id, now = %reply.text, "element text changed since snapshot");
                Err(InteractError::Detached { id: element.id })
            }
            "ok" => Ok(Point::new(reply.x, reply.y)),
            "covered" => Err(InteractError::NotInteractable {
                id: element.id,
                reason: format!(
                    "covered by <{}>",
                    reply.by.as_deref().unwrap_or("another element")
                ),
            }),
            "disabled" => Err(InteractError::NotInteractable {
                id: element.id,
                reason: "disabled".to_string(),
            }),
            "hidden" => Err(InteractError::NotInteractable {
                id: element.id,
                reason: "not rendered".to_string(),
            }),
            other => Err(DriverError::Decode(format!("locate status {:?}", other)).into()),
        }
    }

    /// Glide the cursor to `target` along a human-like path.
    fn move_to(&mut self, target: Point) -> Result<(), InteractError> {
        for step in cursor_path(self.cursor, target, self.sample) {
            self.driver.mouse_move(step.point)?;
            self.pause(step.delay);
        }
        self.cursor = target;
        Ok(())
    }

    fn click_point(&mut self, target: Point) -> Result<(), InteractError> {
        self.move_to(target)?;
        self.settle(40, 120);
        self.driver.mouse_click(target)?;
        Ok(())
    }

    fn clear_focused(&self) -> Result<(), InteractError> {
        self.driver.press_key("a", &[crate::driver::Modifier::Ctrl])?;
        self.driver.press_key("Backspace", &[])?;
        Ok(())
    }

    fn type_chars(&self, text: &str) -> Result<(), InteractError> {
        for ch in text.chars() {
            match ch {
                '\n' => self.driver.press_key("Enter", &[])?,
                '\t' => self.driver.press_key("Tab", &[])?,
                '\r' => continue,
                _ => self.driver.send_char(ch)?,
            }
            self.pause(keystroke_delay(
                self.config.typing_delay_ms,
                self.config.typing_jitter,
                ch,
                self.sample,
            ));
        }
        Ok(())
    }

    fn scroll_position(&self, to: Option<&str>, by: f64) -> Result<ScrollPosition, InteractError> {
        decode(self.driver.evaluate(&scroll_script(to, by))?)
    }
}

impl Interact for Simulator {
    fn click(&mut self, element: &ElementDescriptor) -> Result<String, InteractError> {
        let target = self.locate(element)?;
        self.click_point(target)?;
        info!(id = element.id, kind = %element.kind, "clicked");
        self.settle(300, 700);
        Ok(format!("Clicked {}", element.map_line()))
    }

    fn type_text(
        &mut self,
        element: Option<&ElementDescriptor>,
        text: &str,
    ) -> Result<String, InteractError> {
        if let Some(element) = element {
            if element.kind == ElementKind::Select {
                return Err(InteractError::Invalid(format!(
                    "{} is a select; use selectOption",
                    element.map_line()
                )));
            }
            let target = self.locate(element)?;
            self.click_point(target)?;
            self.settle(80, 200);
        }

        self.clear_focused()?;
        self.type_chars(text)?;
        // Content is not logged; it may be a password.
        info!(chars = text.chars().count(), "typed text");

        let count = text.chars().count();
        Ok(match element {
            Some(element) => format!("Typed {} characters into {}", count, element.map_line()),
            None => format!("Typed {} characters into the focused element", count),
        })
    }

    fn select_option(
        &mut self,
        element: &ElementDescriptor,
        option: &str,
    ) -> Result<String, InteractError> {
        let target = self.locate(element)?;
        let reply: ScriptReply =
            decode(self.driver.evaluate(&select_script(&element.locator, option))?)?;

        match reply.status.as_str() {
            "ok" => {
                info!(id = element.id, via = ?reply.via, "selected native option");
                Ok(format!(
                    "Selected {:?} in {}",
                    reply.text,
                    element.map_line()
                ))
            }
            "missing" => Err(InteractError::Invalid(format!(
                "no option matching {:?} in {}; options: {}",
                option,
                element.map_line(),
                reply.options.join(" | ")
            ))),
            "detached" => Err(InteractError::Detached { id: element.id }),
            _ => {
                // Custom widget: open it, then click the matching option.
                self.click_point(target)?;
                self.settle(250, 500);
                let reply: ScriptReply =
                    decode(self.driver.evaluate(&option_script(&element.locator, option))?)?;
                match reply.status.as_str() {
                    "ok" => {
                        self.click_point(Point::new(reply.x, reply.y))?;
                        info!(id = element.id, "selected custom option");
                        self.settle(200, 400);
                        Ok(format!(
                            "Selected {:?} in {}",
                            reply.text,
                            element.map_line()
                        ))
                    }
                    "detached" => Err(InteractError::Detached { id: element.id }),
                    _ => Err(InteractError::Invalid(format!(
                        "opened {} but found no option matching {:?}; visible: {}",
                        element.map_line(),
                        option,
                        reply.options.join(" | ")
                    ))),
                }
            }
        }
    }

    fn keyboard(
        &mut self,
        element: Option<&ElementDescriptor>,
        combo: &str,
    ) -> Result<String, InteractError> {
        let sequence = parse_key_sequence(combo)?;

        if let Some(element) = element {
            let target = self.locate(element)?;
            self.click_point(target)?;
            self.settle(80, 200);
        }

        for press in &sequence {
            if press.hold {
                self.driver.press_key_held(&press.key, &press.modifiers)?;
            } else {
                self.driver.press_key(&press.key, &press.modifiers)?;
            }
            self.settle(60, 160);
        }

        let described = sequence
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        info!(keys = %described, "pressed keys");
        self.settle(300, 600);
        Ok(format!("Pressed {}", described))
    }

    fn navigate(&mut self, url: &str) -> Result<String, InteractError> {
        let url = normalize_url(url)?;
        info!(%url, "navigating");
        let landed = self.driver.navigate(&url)?;
        if landed.starts_with("about:blank") && !url.starts_with("about:blank") {
            return Err(InteractError::Navigation(format!(
                "{} did not load (still on about:blank)",
                url
            )));
        }
        self.settle(500, 1000);
        Ok(format!("Navigated to {}", landed))
    }

    fn go_back(&mut self) -> Result<String, InteractError> {
        let landed = self.driver.go_back()?;
        info!(url = %landed, "went back");
        self.settle(300, 700);
        Ok(format!("Went back to {}", landed))
    }

    fn search(&mut self, query: &str) -> Result<String, InteractError> {
        let url = search_url(query)?;
        info!(%query, "searching");
        let landed = self.driver.navigate(&url)?;
        self.settle(500, 1000);
        Ok(format!("Searched for {:?}; now at {}", query.trim(), landed))
    }

    fn scroll(&mut self, direction: ScrollDirection) -> Result<String, InteractError> {
        let before = self.scroll_position(None, 0.0)?;
        if let Some(edge) = before.boundary(direction) {
            debug!(?direction, edge, "scroll boundary already reached");
            return Ok(format!("Already at the {} of the page (boundary={})", edge, edge));
        }

        let after = match direction {
            ScrollDirection::Top => self.scroll_position(Some("top"), 0.0)?,
            ScrollDirection::Bottom => self.scroll_position(Some("bottom"), 0.0)?,
            ScrollDirection::Up | ScrollDirection::Down => {
                let sign = if direction == ScrollDirection::Up { -1.0 } else { 1.0 };
                let step = sign * SCROLL_STEP_PX / f64::from(SCROLL_INCREMENTS);
                let mut position = before;
                for _ in 0..SCROLL_INCREMENTS {
                    position = self.scroll_position(None, step)?;
                    self.settle(30, 80);
                    if position.boundary(direction).is_some() {
                        break;
                    }
                }
                position
            }
        };

        let mut observation = format!(
            "Scrolled {:?} to y={:.0} of {:.0}",
            direction, after.y, after.max
        )
        .to_lowercase();
        if let Some(edge) = after.boundary(direction) {
            observation.push_str(&format!(" (boundary={})", edge));
        }
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Modifier;
    use crate::types::BoundingBox;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Eval(String),
        Navigate(String),
        Move(Point),
        Click(Point),
        Key(String, Vec<Modifier>),
        Held(String, Vec<Modifier>),
        Char(char),
    }

    /// Driver double answering scripts by their leading marker comment.
    struct FakeDriver {
        calls: Mutex<Vec<Call>>,
        replies: Vec<(&'static str, Value)>,
        landing: Option<String>,
    }

    impl FakeDriver {
        fn new(replies: Vec<(&'static str, Value)>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                replies,
                landing: None,
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl BrowserDriver for FakeDriver {
        fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
            let marker = script.split("*/").next().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(Call::Eval(marker));
            self.replies
                .iter()
                .find(|(prefix, _)| script.starts_with(prefix))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| DriverError::Script("unexpected script".to_string()))
        }

        fn navigate(&self, url: &str) -> Result<String, DriverError> {
            self.calls.lock().unwrap().push(Call::Navigate(url.to_string()));
            Ok(self.landing.clone().unwrap_or_else(|| url.to_string()))
        }

        fn go_back(&self) -> Result<String, DriverError> {
            Ok("https://example.com/".to_string())
        }

        fn current_url(&self) -> Result<String, DriverError> {
            Ok("https://example.com/".to_string())
        }

        fn mouse_move(&self, point: Point) -> Result<(), DriverError> {
            self.calls.lock().unwrap().push(Call::Move(point));
            Ok(())
        }

        fn mouse_click(&self, point: Point) -> Result<(), DriverError> {
            self.calls.lock().unwrap().push(Call::Click(point));
            Ok(())
        }

        fn press_key(&self, key: &str, modifiers: &[Modifier]) -> Result<(), DriverError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Key(key.to_string(), modifiers.to_vec()));
            Ok(())
        }

        fn press_key_held(&self, key: &str, held: &[Modifier]) -> Result<(), DriverError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Held(key.to_string(), held.to_vec()));
            Ok(())
        }

        fn send_char(&self, ch: char) -> Result<(), DriverError> {
            self.calls.lock().unwrap().push(Call::Char(ch));
            Ok(())
        }
    }

    fn button(id: u32, text: &str) -> ElementDescriptor {
        ElementDescriptor {
            id,
            kind: ElementKind::Button,
            visible_text: text.to_string(),
            attributes: BTreeMap::new(),
            bounding_box: BoundingBox {
                x: 400.0,
                y: 300.0,
                width: 80.0,
                height: 30.0,
            },
            is_visible: true,
            is_enabled: true,
            in_viewport: true,
            in_dialog: false,
            locator: ElementLocator {
                frames: vec![],
                selector: "html > body > button".to_string(),
            },
        }
    }

    fn simulator(driver: Arc<FakeDriver>) -> Simulator {
        let config = InteractionConfig {
            instant: true,
            ..Default::default()
        };
        Simulator::new(driver, config).with_sampler(|| 0.5)
    }

    #[test]
    fn click_moves_then_clicks_at_live_centre() {
        let driver = Arc::new(FakeDriver::new(vec![(
            "/* locate */",
            json!({"status": "ok", "x": 440.0, "y": 315.0, "text": "Submit"}),
        )]));
        let mut sim = simulator(driver.clone());
        let observation = sim.click(&button(2, "Submit")).unwrap();

        assert_eq!(observation, "Clicked [2][button]Submit");
        let calls = driver.calls();
        let moves = calls.iter().filter(|c| matches!(c, Call::Move(_))).count();
        assert!(moves >= 10);
        assert_eq!(calls.last(), Some(&Call::Click(Point::new(440.0, 315.0))));
        assert_eq!(sim.cursor(), Point::new(440.0, 315.0));
    }

    #[test]
    fn covered_element_is_not_interactable() {
        let driver = Arc::new(FakeDriver::new(vec![(
            "/* locate */",
            json!({"status": "covered", "by": "div", "text": "Submit"}),
        )]));
        let err = simulator(driver).click(&button(2, "Submit")).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn replaced_element_is_detached() {
        let driver = Arc::new(FakeDriver::new(vec![(
            "/* locate */",
            json!({"status": "ok", "x": 1.0, "y": 1.0, "text": "Delete account"}),
        )]));
        let err = simulator(driver).click(&button(2, "Submit")).unwrap_err();
        assert_eq!(err, InteractError::Detached { id: 2 });
    }

    #[test]
    fn type_clears_then_types_with_enter() {
        let driver = Arc::new(FakeDriver::new(vec![(
            "/* locate */",
            json!({"status": "ok", "x": 10.0, "y": 10.0, "text": ""}),
        )]));
        let mut input = button(3, "");
        input.kind = ElementKind::Input;
        let observation = simulator(driver.clone())
            .type_text(Some(&input), "hi\n")
            .unwrap();
        assert!(observation.starts_with("Typed 3 characters"));

        let keys: Vec<Call> = driver
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Key(..) | Call::Char(_)))
            .collect();
        assert_eq!(
            keys,
            vec![
                Call::Key("a".to_string(), vec![Modifier::Ctrl]),
                Call::Key("Backspace".to_string(), vec![]),
                Call::Char('h'),
                Call::Char('i'),
                Call::Key("Enter".to_string(), vec![]),
            ]
        );
    }

    #[test]
    fn native_select_reports_choice() {
        let driver = Arc::new(FakeDriver::new(vec![
            (
                "/* locate */",
                json!({"status": "ok", "x": 10.0, "y": 10.0, "text": ""}),
            ),
            (
                "/* select */",
                json!({"status": "ok", "text": "Canada", "via": "value"}),
            ),
        ]));
        let mut select = button(4, "");
        select.kind = ElementKind::Select;
        let observation = simulator(driver).select_option(&select, "ca").unwrap();
        assert_eq!(observation, "Selected \"Canada\" in [4][select]select");
    }

    #[test]
    fn custom_dropdown_is_opened_and_option_clicked() {
        let driver = Arc::new(FakeDriver::new(vec![
            (
                "/* locate */",
                json!({"status": "ok", "x": 10.0, "y": 10.0, "text": "Choose"}),
            ),
            ("/* select */", json!({"status": "custom"})),
            (
                "/* option */",
                json!({"status": "ok", "x": 12.0, "y": 60.0, "text": "Large"}),
            ),
        ]));
        let mut widget = button(5, "Choose");
        widget.kind = ElementKind::Other;
        let observation = simulator(driver.clone())
            .select_option(&widget, "large")
            .unwrap();
        assert!(observation.contains("Large"));

        let clicks: Vec<Call> = driver
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Click(_)))
            .collect();
        assert_eq!(
            clicks,
            vec![
                Call::Click(Point::new(10.0, 10.0)),
                Call::Click(Point::new(12.0, 60.0))
            ]
        );
    }

    #[test]
    fn keyboard_hold_uses_held_press() {
        let driver = Arc::new(FakeDriver::new(vec![]));
        let observation = simulator(driver.clone())
            .keyboard(None, "hold shift, press Tab")
            .unwrap();
        assert_eq!(observation, "Pressed hold shift+Tab");
        assert_eq!(
            driver.calls(),
            vec![Call::Held("Tab".to_string(), vec![Modifier::Shift])]
        );
    }

    #[test]
    fn unknown_key_is_rejected_before_any_input() {
        let driver = Arc::new(FakeDriver::new(vec![]));
        let err = simulator(driver.clone())
            .keyboard(None, "ctrl+nope")
            .unwrap_err();
        assert!(matches!(err, InteractError::Invalid(_)));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn navigate_normalises_and_rejects_blank_landing() {
        let driver = Arc::new(FakeDriver::new(vec![]));
        let observation = simulator(driver.clone())
            .navigate("`example.com/path`")
            .unwrap();
        assert_eq!(observation, "Navigated to https://example.com/path");

        let mut blank = FakeDriver::new(vec![]);
        blank.landing = Some("about:blank".to_string());
        let err = simulator(Arc::new(blank))
            .navigate("https://unreachable.test")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NavigationError);
    }

    #[test]
    fn url_normalisation() {
        assert_eq!(
            normalize_url("https://https://example.com").unwrap(),
            "https://example.com/"
        );
        assert_eq!(
            normalize_url("\"http://example.com/a?b=c\"").unwrap(),
            "http://example.com/a?b=c"
        );
        assert_eq!(normalize_url("about:blank").unwrap(), "about:blank");
        assert!(normalize_url("  ").is_err());
    }

    #[test]
    fn search_builds_encoded_query() {
        assert_eq!(
            search_url("rust async book").unwrap(),
            "https://www.google.com/search?q=rust+async+book"
        );
        assert!(search_url("").is_err());
    }

    #[test]
    fn scroll_at_top_is_boundary_noop() {
        let driver = Arc::new(FakeDriver::new(vec![(
            "/* scroll */",
            json!({"y": 0.0, "max": 2000.0}),
        )]));
        let observation = simulator(driver.clone())
            .scroll(ScrollDirection::Up)
            .unwrap();
        assert!(observation.contains("boundary=top"));
        assert_eq!(driver.calls().len(), 1);
    }

    #[test]
    fn unscrollable_page_reports_the_edge_in_the_scroll_direction() {
        let driver = Arc::new(FakeDriver::new(vec![(
            "/* scroll */",
            json!({"y": 0.0, "max": 0.0}),
        )]));
        let down = simulator(driver.clone())
            .scroll(ScrollDirection::Down)
            .unwrap();
        assert!(down.contains("boundary=bottom"), "{}", down);
        assert!(!down.contains("top"));

        let up = simulator(driver.clone()).scroll(ScrollDirection::Up).unwrap();
        assert!(up.contains("boundary=top"), "{}", up);
        assert_eq!(driver.calls().len(), 2);
    }

    #[test]
    fn scroll_down_takes_three_increments() {
        let driver = Arc::new(FakeDriver::new(vec![(
            "/* scroll */",
            json!({"y": 0.0, "max": 2000.0}),
        )]));
        simulator(driver.clone())
            .scroll(ScrollDirection::Down)
            .unwrap();
        assert_eq!(driver.calls().len(), 1 + 3);
    }
}
