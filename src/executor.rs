use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dom::{SnapshotBuilder, SnapshotSource, format_element_map};
use crate::driver::BrowserDriver;
use crate::error::{ErrorKind, InteractError};
use crate::recovery::{RecoveryError, RecoveryPolicy};
use crate::resolver::{ElementResolver, Resolve};
use crate::simulator::{Interact, Simulator};
use crate::types::{
    ActionRequest, ActionResult, ActionVerb, ElementDescriptor, PageSnapshot, ScrollDirection,
    TargetSpec,
};

/// Dispatches browser verbs: snapshot, resolution and interaction under the
/// recovery policy. Blocking; the control loop runs it off the async runtime.
pub struct Executor {
    source: Box<dyn SnapshotSource>,
    resolver: Box<dyn Resolve>,
    simulator: Box<dyn Interact>,
    recovery: RecoveryPolicy,
    driver: Option<Arc<dyn BrowserDriver>>,
}

impl Executor {
    pub fn new(
        source: Box<dyn SnapshotSource>,
        resolver: Box<dyn Resolve>,
        simulator: Box<dyn Interact>,
        recovery: RecoveryPolicy,
    ) -> Self {
        Self {
            source,
            resolver,
            simulator,
            recovery,
            driver: None,
        }
    }

    /// The production wiring over one live browser session.
    pub fn for_driver(driver: Arc<dyn BrowserDriver>, config: &Config) -> Self {
        let mut executor = Self::new(
            Box::new(SnapshotBuilder::new(
                driver.clone(),
                config.browser.max_elements,
            )),
            Box::new(ElementResolver::new()),
            Box::new(Simulator::new(driver.clone(), config.interaction.clone())),
            RecoveryPolicy::new(config.recovery.clone()),
        );
        executor.driver = Some(driver);
        executor
    }

    /// Where the browser is now, when a live session backs this executor.
    pub fn current_url(&self) -> Option<String> {
        let driver = self.driver.as_ref()?;
        match driver.current_url() {
            Ok(url) if !url.is_empty() => Some(url),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "could not read current url");
                None
            }
        }
    }

    /// Execute one request against the current snapshot.
    ///
    /// Returns the result and the snapshot the loop should keep: a fresh one
    /// after `analyzePage` or a recovery rebuild, `None` after navigation.
    pub fn execute(
        &mut self,
        request: &ActionRequest,
        snapshot: Option<PageSnapshot>,
    ) -> (ActionResult, Option<PageSnapshot>) {
        debug!(%request, "dispatching");
        match request.verb {
            ActionVerb::AnalyzePage => match self.source.build_snapshot() {
                Ok(fresh) => {
                    info!(elements = fresh.len(), url = %fresh.url, "page analyzed");
                    (
                        ActionResult::success(format_element_map(&fresh)),
                        Some(fresh),
                    )
                }
                Err(err) => (ActionResult::failure(err.kind(), err.to_string()), None),
            },
            ActionVerb::Navigate | ActionVerb::Search => {
                let Some(payload) = request.payload().filter(|p| !p.trim().is_empty()) else {
                    return (missing("payload", request), snapshot);
                };
                let outcome = if request.verb == ActionVerb::Navigate {
                    self.simulator.navigate(payload)
                } else {
                    self.simulator.search(payload)
                };
                (interact_result(outcome), None)
            }
            ActionVerb::GoBack => (interact_result(self.simulator.go_back()), None),
            ActionVerb::Scroll => {
                let direction = request
                    .payload()
                    .map(ScrollDirection::parse)
                    .unwrap_or(Some(ScrollDirection::Down));
                let Some(direction) = direction else {
                    return (
                        ActionResult::failure(
                            ErrorKind::InvalidRequest,
                            "direction must be one of up, down, top, bottom",
                        ),
                        snapshot,
                    );
                };
                (interact_result(self.simulator.scroll(direction)), snapshot)
            }
            ActionVerb::Click => {
                let Some(target) = request.target.as_ref() else {
                    return (missing("target", request), snapshot);
                };
                self.on_element(target, snapshot, |sim, el| sim.click(el))
            }
            ActionVerb::SelectOption => {
                let (Some(target), Some(option)) = (request.target.as_ref(), request.payload())
                else {
                    return (missing("target and value", request), snapshot);
                };
                self.on_element(target, snapshot, |sim, el| sim.select_option(el, option))
            }
            ActionVerb::Type => {
                let Some(text) = request.payload() else {
                    return (missing("value", request), snapshot);
                };
                match request.target.as_ref() {
                    Some(target) => {
                        self.on_element(target, snapshot, |sim, el| sim.type_text(Some(el), text))
                    }
                    None => {
                        let simulator = &mut self.simulator;
                        let outcome = self
                            .recovery
                            .with_backoff(|| simulator.type_text(None, text));
                        (interact_result(outcome), snapshot)
                    }
                }
            }
            ActionVerb::KeyboardAction => {
                let Some(combo) = request.payload() else {
                    return (missing("key combo", request), snapshot);
                };
                match request.target.as_ref() {
                    Some(target) => {
                        self.on_element(target, snapshot, |sim, el| sim.keyboard(Some(el), combo))
                    }
                    None => (
                        interact_result(self.simulator.keyboard(None, combo)),
                        snapshot,
                    ),
                }
            }
            ActionVerb::AskUser => (
                ActionResult::failure(
                    ErrorKind::InvalidRequest,
                    "askUser is answered by the control loop, not the browser",
                ),
                snapshot,
            ),
        }
    }

    /// Resolve `target` and run `act` on it under the recovery envelope.
    fn on_element<F>(
        &mut self,
        target: &TargetSpec,
        snapshot: Option<PageSnapshot>,
        mut act: F,
    ) -> (ActionResult, Option<PageSnapshot>)
    where
        F: FnMut(&mut dyn Interact, &ElementDescriptor) -> Result<String, InteractError>,
    {
        let Self {
            source,
            resolver,
            simulator,
            recovery,
            ..
        } = self;

        let mut snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => {
                debug!("no snapshot yet, building one before resolution");
                match source.build_snapshot() {
                    Ok(fresh) => fresh,
                    Err(err) => {
                        return (ActionResult::failure(err.kind(), err.to_string()), None);
                    }
                }
            }
        };

        let outcome = recovery.run(
            target,
            &**resolver,
            &**source,
            &mut snapshot,
            |el| act(&mut **simulator, el),
        );

        let result = match outcome {
            Ok(done) if done.refreshed => ActionResult::success(format!(
                "{} (the page had changed; element IDs were renumbered, call analyzePage before using IDs again)",
                done.value
            )),
            Ok(done) => ActionResult::success(done.value),
            Err(err) => recovery_failure(target, err),
        };
        (result, Some(snapshot))
    }
}

fn missing(what: &str, request: &ActionRequest) -> ActionResult {
    ActionResult::failure(
        ErrorKind::InvalidRequest,
        format!("{} requires {}", request.verb, what),
    )
}

fn interact_result(outcome: Result<String, InteractError>) -> ActionResult {
    match outcome {
        Ok(observation) => ActionResult::success(observation),
        Err(err) => {
            warn!(error = %err, "interaction failed");
            ActionResult::failure(err.kind(), err.to_string())
        }
    }
}

fn recovery_failure(target: &TargetSpec, err: RecoveryError) -> ActionResult {
    warn!(%target, error = %err, "action failed after recovery");
    ActionResult::failure(err.kind(), err.detail())
}
