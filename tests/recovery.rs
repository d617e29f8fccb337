mod common;

use common::{FixedSource, element, fast_recovery, login_page, page};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use webpilot::error::{InteractError, ResolveError};
use webpilot::recovery::RecoveryError;
use webpilot::{
    ElementDescriptor, ElementKind, ElementResolver, ErrorKind, PageSnapshot, Resolve, TargetSpec,
};

/// Fails the first `failures` resolutions, then defers to the real resolver.
struct FlakyResolver {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyResolver {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Resolve for FlakyResolver {
    fn resolve(
        &self,
        target: &TargetSpec,
        snapshot: &PageSnapshot,
    ) -> Result<ElementDescriptor, ResolveError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ResolveError::NotFound {
                target: target.to_string(),
            });
        }
        ElementResolver::new().resolve(target, snapshot)
    }
}

#[test]
fn resolution_gets_exactly_one_rebuild() {
    let resolver = FlakyResolver::new(2);
    let source = FixedSource::new(login_page());
    let mut snapshot = login_page();
    let acted = AtomicUsize::new(0);

    let outcome = fast_recovery().run(
        &TargetSpec::ById(2),
        &resolver,
        &source,
        &mut snapshot,
        |_| {
            acted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );

    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    assert_eq!(source.builds.load(Ordering::SeqCst), 1);
    assert_eq!(acted.load(Ordering::SeqCst), 0);
}

#[test]
fn resolution_succeeds_after_the_rebuild() {
    let resolver = FlakyResolver::new(1);
    let source = FixedSource::new(login_page());
    let mut snapshot = PageSnapshot::default();

    let done = fast_recovery()
        .run(
            &TargetSpec::ById(2),
            &resolver,
            &source,
            &mut snapshot,
            |el| Ok(el.id),
        )
        .unwrap();

    assert_eq!(done.value, 2);
    assert!(done.refreshed);
    // The caller keeps the rebuilt catalogue.
    assert_eq!(snapshot, login_page());
}

#[test]
fn stale_element_is_found_again_by_identity() {
    // After the rebuild the button moved to a different ID.
    let before = page(vec![
        element(1, ElementKind::Link, "Home"),
        element(2, ElementKind::Button, "Checkout"),
    ]);
    let after = page(vec![
        element(1, ElementKind::Link, "Home"),
        element(2, ElementKind::Link, "Cart"),
        element(3, ElementKind::Button, "Checkout"),
    ]);
    let source = FixedSource::new(after);
    let mut snapshot = before;
    let touched = Mutex::new(Vec::new());

    let done = fast_recovery()
        .run(
            &TargetSpec::ById(2),
            &ElementResolver::new(),
            &source,
            &mut snapshot,
            |el| {
                touched.lock().unwrap().push(el.id);
                if touched.lock().unwrap().len() == 1 {
                    Err(InteractError::Detached { id: el.id })
                } else {
                    Ok(el.label().to_string())
                }
            },
        )
        .unwrap();

    assert_eq!(done.value, "Checkout");
    assert_eq!(done.element.id, 3);
    assert_eq!(*touched.lock().unwrap(), vec![2, 3]);
    assert_eq!(source.builds.load(Ordering::SeqCst), 1);
}

#[test]
fn second_staleness_is_surfaced() {
    let source = FixedSource::new(login_page());
    let mut snapshot = login_page();

    let outcome: Result<_, RecoveryError> = fast_recovery().run(
        &TargetSpec::ById(2),
        &ElementResolver::new(),
        &source,
        &mut snapshot,
        |el| Err::<(), _>(InteractError::Detached { id: el.id }),
    );

    assert!(matches!(
        outcome,
        Err(RecoveryError::Interact(InteractError::Detached { .. }))
    ));
    assert_eq!(source.builds.load(Ordering::SeqCst), 1);
}

#[test]
fn not_interactable_backs_off_until_the_ceiling() {
    let source = FixedSource::new(login_page());
    let mut snapshot = login_page();
    let attempts = AtomicUsize::new(0);

    let outcome = fast_recovery().run(
        &TargetSpec::ById(2),
        &ElementResolver::new(),
        &source,
        &mut snapshot,
        |el| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(InteractError::NotInteractable {
                id: el.id,
                reason: "covered by overlay".to_string(),
            })
        },
    );

    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::NotInteractable);
    // fast_recovery allows two attempts in total; no rebuild for this class.
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(source.builds.load(Ordering::SeqCst), 0);
}
