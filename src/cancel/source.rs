//! Cancellation sources, tokens and listener registrations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken as Signal;

type Listener = Box<dyn FnOnce() + Send>;

/// State shared by a source and its tokens.
///
/// `signal` carries the canceled flag and wakes async waiters; `listeners`
/// holds the synchronous `on_cancel` callbacks.
struct Shared {
    signal: Signal,
    listeners: Mutex<Listeners>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            signal: Signal::new(),
            listeners: Mutex::new(Listeners::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_canceled(&self) -> bool {
        self.signal.is_cancelled()
    }

    fn cancel(&self) -> bool {
        // The signal flips under the lock: a racing `register` either lands
        // in the drained map or sees the flag and runs its listener inline.
        let drained = {
            let mut listeners = self.lock();
            if self.signal.is_cancelled() {
                return false;
            }
            self.signal.cancel();
            std::mem::take(&mut listeners.entries)
        };

        // Listeners run without the lock so they may touch other tokens.
        for (_, listener) in drained {
            listener();
        }
        true
    }

    fn register(self: &Arc<Self>, listener: Listener) -> Registration {
        let mut listeners = self.lock();
        if self.is_canceled() {
            drop(listeners);
            listener();
            return Registration::inert();
        }

        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, listener);

        Registration {
            shared: Arc::downgrade(self),
            id: Some(id),
        }
    }

    fn deregister(&self, id: u64) {
        // Dropped outside the lock: a listener's captures may own other
        // registrations on this same token.
        let removed = { self.lock().entries.remove(&id) };
        drop(removed);
    }

    fn listener_count(&self) -> usize {
        self.lock().entries.len()
    }
}

/// The owning side of a cancellation signal.
///
/// A source transitions exactly once from "live" to "canceled" and never
/// back. Clones share the same state, so any clone can cancel.
///
/// # Examples
///
/// ```rust
/// use steadfast::cancel::CancellationSource;
///
/// let source = CancellationSource::new();
/// let token = source.token();
///
/// assert!(source.cancel());
/// assert!(!source.cancel()); // already canceled
/// assert!(token.is_canceled());
/// ```
#[derive(Clone)]
pub struct CancellationSource {
    shared: Arc<Shared>,
}

impl CancellationSource {
    /// Create a live source.
    pub fn new() -> Self {
        Self {
            shared: Shared::new(),
        }
    }

    /// Cancel the source, running every registered listener once.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// source was already canceled.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Whether the source has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.shared.is_canceled()
    }

    /// A read-only view of this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancel this source once `delay` elapses.
    ///
    /// This turns a deadline into a cancellation input that can be composed
    /// with others. Dropping the returned [`CancelTimer`] disarms the timer.
    /// Must be called from within a tokio runtime.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use steadfast::cancel::CancellationSource;
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let deadline = CancellationSource::new();
    /// let _timer = deadline.cancel_after(Duration::from_millis(5));
    ///
    /// deadline.token().cancelled().await;
    /// assert!(deadline.is_canceled());
    /// # });
    /// ```
    pub fn cancel_after(&self, delay: Duration) -> CancelTimer {
        let source = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            source.cancel();
        });
        CancelTimer { handle }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("canceled", &self.is_canceled())
            .field("listeners", &self.shared.listener_count())
            .finish()
    }
}

/// A read-only handle on a cancellation signal.
///
/// Tokens can be polled with [`is_canceled`](Self::is_canceled), awaited with
/// [`cancelled`](Self::cancelled), or observed with
/// [`on_cancel`](Self::on_cancel). They cannot cancel anything themselves.
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    /// A token that never cancels.
    pub fn never() -> Self {
        Self {
            shared: Shared::new(),
        }
    }

    /// Whether the underlying source has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.shared.is_canceled()
    }

    /// Run `listener` once when the token cancels.
    ///
    /// If the token is already canceled the listener runs immediately, on the
    /// calling thread, and the returned registration is inert. Otherwise the
    /// listener stays registered until it fires or the [`Registration`] is
    /// dropped or [unregistered](Registration::unregister).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use steadfast::cancel::CancellationSource;
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    ///
    /// let source = CancellationSource::new();
    /// let fired = Arc::new(AtomicBool::new(false));
    ///
    /// let registration = source.token().on_cancel({
    ///     let fired = fired.clone();
    ///     move || fired.store(true, Ordering::SeqCst)
    /// });
    /// registration.unregister();
    ///
    /// source.cancel();
    /// assert!(!fired.load(Ordering::SeqCst));
    /// ```
    pub fn on_cancel<F>(&self, listener: F) -> Registration
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.register(Box::new(listener))
    }

    /// Wait until the token cancels.
    ///
    /// Waiting registers no `on_cancel` listener.
    pub async fn cancelled(&self) {
        self.shared.signal.cancelled().await
    }

    /// Number of listeners currently registered on the token.
    ///
    /// Mostly useful for checking that composites clean up after themselves.
    pub fn listener_count(&self) -> usize {
        self.shared.listener_count()
    }

    /// Whether two tokens observe the same source.
    pub fn same_source(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("canceled", &self.is_canceled())
            .field("listeners", &self.shared.listener_count())
            .finish()
    }
}

/// A listener registration returned by [`CancellationToken::on_cancel`].
///
/// Dropping the registration deregisters the listener.
#[must_use = "dropping a Registration deregisters its listener"]
pub struct Registration {
    shared: Weak<Shared>,
    id: Option<u64>,
}

impl Registration {
    fn inert() -> Self {
        Self {
            shared: Weak::new(),
            id: None,
        }
    }

    /// Deregister the listener now.
    ///
    /// A no-op if the listener already fired.
    pub fn unregister(mut self) {
        self.release();
    }

    /// Whether the listener is still waiting on its token.
    pub fn is_active(&self) -> bool {
        match (self.id, self.shared.upgrade()) {
            (Some(id), Some(shared)) => shared.lock().entries.contains_key(&id),
            _ => false,
        }
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(shared) = self.shared.upgrade() {
                shared.deregister(id);
            }
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .finish()
    }
}

/// A pending deadline created by [`CancellationSource::cancel_after`].
///
/// Dropping the timer aborts it; the source is left untouched.
#[must_use = "dropping a CancelTimer disarms it"]
#[derive(Debug)]
pub struct CancelTimer {
    handle: JoinHandle<()>,
}

impl CancelTimer {
    /// Whether the timer has already fired (or been aborted).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CancelTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
