//! Composite cancellation: one token derived from many.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::source::{CancellationSource, CancellationToken, Registration};

/// A cancellation token derived from a fixed set of inputs.
///
/// The composite cancels as soon as any input cancels. It never cancels its
/// inputs, and it cannot be canceled directly. Its listeners on the inputs
/// are released on the earliest of:
///
/// - the composite becoming canceled
/// - the composite being dropped (its execution finished)
///
/// Created by [`compose`].
pub struct CompositeCancellation {
    derived: CancellationSource,
    links: Arc<Links>,
}

#[derive(Default)]
struct Links {
    state: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    settled: bool,
    registrations: Vec<Registration>,
}

impl Links {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, registration: Registration) {
        let rejected = {
            let mut state = self.lock();
            if state.settled {
                Some(registration)
            } else {
                state.registrations.push(registration);
                None
            }
        };
        drop(rejected);
    }

    fn release(&self) {
        let released = {
            let mut state = self.lock();
            state.settled = true;
            std::mem::take(&mut state.registrations)
        };
        // Deregistration takes each input's lock; never while holding ours.
        drop(released);
    }

    fn live(&self) -> usize {
        self.lock().registrations.len()
    }
}

/// Combine `inputs` into a single [`CompositeCancellation`].
///
/// If any input is already canceled the composite starts canceled and no
/// listener is registered on any input. Otherwise exactly one listener is
/// registered per input.
///
/// # Examples
///
/// ```rust
/// use steadfast::cancel::{compose, CancellationSource};
///
/// let a = CancellationSource::new();
/// let b = CancellationSource::new();
///
/// let composite = compose([&a.token(), &b.token()]);
/// assert_eq!(a.token().listener_count(), 1);
///
/// b.cancel();
/// assert!(composite.is_canceled());
/// // Settling released the listener left on `a`.
/// assert_eq!(a.token().listener_count(), 0);
/// assert!(!a.is_canceled());
/// ```
pub fn compose<'a, I>(inputs: I) -> CompositeCancellation
where
    I: IntoIterator<Item = &'a CancellationToken>,
{
    let inputs: Vec<&CancellationToken> = inputs.into_iter().collect();
    let composite = CompositeCancellation {
        derived: CancellationSource::new(),
        links: Arc::new(Links::default()),
    };

    if inputs.iter().any(|input| input.is_canceled()) {
        composite.derived.cancel();
        composite.links.release();
        return composite;
    }

    for input in inputs {
        let registration = input.on_cancel(settle_on_fire(
            composite.derived.clone(),
            Arc::downgrade(&composite.links),
        ));
        // An input canceled concurrently settles the links, and every later
        // registration is then dropped on attach.
        composite.links.attach(registration);
    }

    composite
}

fn settle_on_fire(derived: CancellationSource, links: Weak<Links>) -> impl FnOnce() + Send {
    move || {
        derived.cancel();
        if let Some(links) = links.upgrade() {
            links.release();
        }
    }
}

impl CompositeCancellation {
    /// The derived token, to be handed to the guarded execution.
    pub fn token(&self) -> CancellationToken {
        self.derived.token()
    }

    /// Whether any input has canceled.
    pub fn is_canceled(&self) -> bool {
        self.derived.is_canceled()
    }

    /// Number of listeners this composite still holds on its inputs.
    pub fn live_links(&self) -> usize {
        self.links.live()
    }
}

impl Drop for CompositeCancellation {
    fn drop(&mut self) {
        self.links.release();
    }
}

impl fmt::Debug for CompositeCancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeCancellation")
            .field("canceled", &self.is_canceled())
            .field("live_links", &self.live_links())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn any_input_cancels_composite() {
        let a = CancellationSource::new();
        let b = CancellationSource::new();
        let c = CancellationSource::new();
        let composite = compose([&a.token(), &b.token(), &c.token()]);

        assert!(!composite.is_canceled());
        assert_eq!(composite.live_links(), 3);

        c.cancel();
        assert!(composite.is_canceled());
        assert!(composite.token().is_canceled());
    }

    #[test]
    fn propagation_is_inward_only() {
        let a = CancellationSource::new();
        let composite = compose([&a.token()]);

        drop(composite);
        assert!(!a.is_canceled());
    }

    #[test]
    fn pre_canceled_input_registers_nothing() {
        let a = CancellationSource::new();
        let b = CancellationSource::new();
        b.cancel();

        let composite = compose([&a.token(), &b.token()]);

        assert!(composite.is_canceled());
        assert_eq!(composite.live_links(), 0);
        assert_eq!(a.token().listener_count(), 0);
    }

    #[test]
    fn settling_releases_every_input() {
        let a = CancellationSource::new();
        let b = CancellationSource::new();
        let composite = compose([&a.token(), &b.token()]);

        a.cancel();

        assert_eq!(composite.live_links(), 0);
        assert_eq!(a.token().listener_count(), 0);
        assert_eq!(b.token().listener_count(), 0);
    }

    #[test]
    fn drop_releases_every_input() {
        let a = CancellationSource::new();
        let b = CancellationSource::new();
        let composite = compose([&a.token(), &b.token()]);
        assert_eq!(a.token().listener_count(), 1);

        drop(composite);

        assert_eq!(a.token().listener_count(), 0);
        assert_eq!(b.token().listener_count(), 0);
    }

    #[test]
    fn finished_composite_ignores_later_cancels() {
        let a = CancellationSource::new();
        let fired = Arc::new(AtomicU32::new(0));

        let first = compose([&a.token()]);
        let _observer = first.token().on_cancel({
            let fired = fired.clone();
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(first);

        let second = compose([&a.token()]);
        a.cancel();

        assert!(second.is_canceled());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_composite_never_cancels() {
        let composite = compose(std::iter::empty());
        assert!(!composite.is_canceled());
        assert_eq!(composite.live_links(), 0);
    }

    #[test]
    fn duplicate_inputs_are_handled() {
        let a = CancellationSource::new();
        let token = a.token();
        let composite = compose([&token, &token]);
        assert_eq!(token.listener_count(), 2);

        a.cancel();
        assert!(composite.is_canceled());
        assert_eq!(token.listener_count(), 0);
    }

    #[test]
    fn composites_nest() {
        let a = CancellationSource::new();
        let b = CancellationSource::new();
        let inner = compose([&a.token()]);
        let outer = compose([&inner.token(), &b.token()]);

        a.cancel();
        assert!(inner.is_canceled());
        assert!(outer.is_canceled());
        assert_eq!(b.token().listener_count(), 0);
    }
}
