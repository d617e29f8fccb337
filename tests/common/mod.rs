#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use webpilot::config::RecoveryConfig;
use webpilot::error::{DriverError, InteractError, OracleError};
use webpilot::{
    BoundingBox, Decision, ElementDescriptor, ElementKind, ElementLocator, ElementResolver,
    Executor, HistoryEntry, Interact, Oracle, PageSnapshot, RecoveryPolicy, ScrollDirection,
    SnapshotSource, Viewport,
};

pub fn element(id: u32, kind: ElementKind, text: &str) -> ElementDescriptor {
    ElementDescriptor {
        id,
        kind,
        visible_text: text.to_string(),
        attributes: BTreeMap::new(),
        bounding_box: BoundingBox {
            x: 10.0,
            y: 40.0 * id as f64,
            width: 120.0,
            height: 30.0,
        },
        is_visible: true,
        is_enabled: true,
        in_viewport: true,
        in_dialog: false,
        locator: ElementLocator {
            frames: vec![],
            selector: format!("html > body > :nth-child({})", id),
        },
    }
}

pub fn page(elements: Vec<ElementDescriptor>) -> PageSnapshot {
    PageSnapshot {
        url: "https://shop.example/login".to_string(),
        title: "Sign in".to_string(),
        viewport: Viewport {
            width: 1280.0,
            height: 720.0,
        },
        elements,
        page_text: vec!["Welcome back".to_string()],
    }
}

pub fn login_page() -> PageSnapshot {
    let mut email = element(1, ElementKind::Input, "");
    email
        .attributes
        .insert("placeholder".to_string(), "Email".to_string());
    let mut password = element(3, ElementKind::Input, "");
    password
        .attributes
        .insert("type".to_string(), "password".to_string());
    password
        .attributes
        .insert("placeholder".to_string(), "Password".to_string());
    page(vec![
        email,
        element(2, ElementKind::Button, "Sign in"),
        password,
    ])
}

/// Always returns the same page; counts rebuilds.
pub struct FixedSource {
    pub snapshot: PageSnapshot,
    pub builds: Arc<AtomicUsize>,
}

impl FixedSource {
    pub fn new(snapshot: PageSnapshot) -> Self {
        Self {
            snapshot,
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SnapshotSource for FixedSource {
    fn build_snapshot(&self) -> Result<PageSnapshot, DriverError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub verb: &'static str,
    pub element: Option<ElementDescriptor>,
    pub text: Option<String>,
}

/// Interaction double that records every call and always succeeds.
#[derive(Default, Clone)]
pub struct Recorder {
    pub calls: Arc<Mutex<Vec<Call>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, verb: &'static str, element: Option<&ElementDescriptor>, text: Option<&str>) {
        self.calls.lock().unwrap().push(Call {
            verb,
            element: element.cloned(),
            text: text.map(str::to_string),
        });
    }
}

impl Interact for Recorder {
    fn click(&mut self, element: &ElementDescriptor) -> Result<String, InteractError> {
        self.record("click", Some(element), None);
        Ok(format!("Clicked {}", element.map_line()))
    }

    fn type_text(
        &mut self,
        element: Option<&ElementDescriptor>,
        text: &str,
    ) -> Result<String, InteractError> {
        self.record("type", element, Some(text));
        Ok(format!("Typed {} characters", text.chars().count()))
    }

    fn select_option(
        &mut self,
        element: &ElementDescriptor,
        option: &str,
    ) -> Result<String, InteractError> {
        self.record("select", Some(element), Some(option));
        Ok(format!("Selected \"{}\"", option))
    }

    fn keyboard(
        &mut self,
        element: Option<&ElementDescriptor>,
        combo: &str,
    ) -> Result<String, InteractError> {
        self.record("keyboard", element, Some(combo));
        Ok(format!("Pressed {}", combo))
    }

    fn navigate(&mut self, url: &str) -> Result<String, InteractError> {
        self.record("navigate", None, Some(url));
        Ok(format!("Navigated to {}", url))
    }

    fn go_back(&mut self) -> Result<String, InteractError> {
        self.record("goBack", None, None);
        Ok("Went back".to_string())
    }

    fn search(&mut self, query: &str) -> Result<String, InteractError> {
        self.record("search", None, Some(query));
        Ok(format!("Searched for {}", query))
    }

    fn scroll(&mut self, direction: ScrollDirection) -> Result<String, InteractError> {
        self.record("scroll", None, Some(&format!("{:?}", direction)));
        Ok("Scrolled".to_string())
    }
}

pub fn fast_recovery() -> RecoveryPolicy {
    RecoveryPolicy::new(RecoveryConfig {
        max_attempts: 2,
        base_backoff_ms: 1,
        max_backoff_ms: 1,
    })
}

/// Executor over a fixed page and a recording simulator.
pub fn executor(snapshot: PageSnapshot, recorder: Recorder) -> Executor {
    Executor::new(
        Box::new(FixedSource::new(snapshot)),
        Box::new(ElementResolver::new()),
        Box::new(recorder),
        fast_recovery(),
    )
}

/// Oracle driven by a closure over the history it is shown.
pub struct FnOracle<F> {
    decide: F,
    pub calls: Arc<AtomicUsize>,
}

impl<F> FnOracle<F>
where
    F: Fn(&[HistoryEntry]) -> Result<Decision, OracleError> + Send + Sync,
{
    pub fn new(decide: F) -> Self {
        Self {
            decide,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl<F> Oracle for FnOracle<F>
where
    F: Fn(&[HistoryEntry]) -> Result<Decision, OracleError> + Send + Sync,
{
    async fn decide(
        &self,
        _instruction: &str,
        history: &[HistoryEntry],
    ) -> Result<Decision, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.decide)(history)
    }
}

/// Oracle that replays a fixed script, then declares the task done.
pub fn scripted(
    steps: Vec<Decision>,
) -> FnOracle<impl Fn(&[HistoryEntry]) -> Result<Decision, OracleError> + Send + Sync> {
    FnOracle::new(move |history: &[HistoryEntry]| {
        Ok(steps.get(history.len()).cloned().unwrap_or(Decision::Done {
            summary: "finished".to_string(),
        }))
    })
}

/// Oracle whose first `slow_calls` answers take `delay`; later calls finish
/// the task immediately.
pub struct SlowOracle {
    pub delay: std::time::Duration,
    pub slow_calls: usize,
    pub calls: Arc<AtomicUsize>,
}

impl SlowOracle {
    pub fn new(delay: std::time::Duration, slow_calls: usize) -> Self {
        Self {
            delay,
            slow_calls,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Oracle for SlowOracle {
    async fn decide(
        &self,
        _instruction: &str,
        _history: &[HistoryEntry],
    ) -> Result<Decision, OracleError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.slow_calls {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Decision::Done {
            summary: "finished".to_string(),
        })
    }
}

/// Recorder whose clicks block the calling thread for `delay` before
/// succeeding, like a browser stuck on a slow page.
#[derive(Clone)]
pub struct StuckClicks {
    pub inner: Recorder,
    pub delay: std::time::Duration,
    pub finished: Arc<AtomicUsize>,
}

impl StuckClicks {
    pub fn new(inner: Recorder, delay: std::time::Duration) -> Self {
        Self {
            inner,
            delay,
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Interact for StuckClicks {
    fn click(&mut self, element: &ElementDescriptor) -> Result<String, InteractError> {
        std::thread::sleep(self.delay);
        let observation = self.inner.click(element);
        self.finished.fetch_add(1, Ordering::SeqCst);
        observation
    }

    fn type_text(
        &mut self,
        element: Option<&ElementDescriptor>,
        text: &str,
    ) -> Result<String, InteractError> {
        self.inner.type_text(element, text)
    }

    fn select_option(
        &mut self,
        element: &ElementDescriptor,
        option: &str,
    ) -> Result<String, InteractError> {
        self.inner.select_option(element, option)
    }

    fn keyboard(
        &mut self,
        element: Option<&ElementDescriptor>,
        combo: &str,
    ) -> Result<String, InteractError> {
        self.inner.keyboard(element, combo)
    }

    fn navigate(&mut self, url: &str) -> Result<String, InteractError> {
        self.inner.navigate(url)
    }

    fn go_back(&mut self) -> Result<String, InteractError> {
        self.inner.go_back()
    }

    fn search(&mut self, query: &str) -> Result<String, InteractError> {
        self.inner.search(query)
    }

    fn scroll(&mut self, direction: ScrollDirection) -> Result<String, InteractError> {
        self.inner.scroll(direction)
    }
}
