use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between an operation and its workers.
///
/// Cloning the token is cheap and every clone observes the same flag. Workers
/// poll [`is_cancelled`](Self::is_cancelled) at block boundaries and bail out
/// with [`CrimpError::Cancelled`](crate::CrimpError::Cancelled); nothing is
/// ever interrupted mid-block.
///
/// All accesses are lock-free and allocation-free, so the token is safe to
/// trip from a signal-handler thread.
///
/// # Example
///
/// ```
/// use crimp_core::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(token.cancel());
/// assert!(!token.cancel()); // already cancelled
/// assert!(token.is_cancelled());
/// token.reset();
/// assert!(!token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug)]
struct TokenInner {
    cancelled: AtomicBool,
    // Microseconds since `epoch`, stored with +1 so zero means "not cancelled".
    cancelled_at_us: AtomicU64,
    epoch: Instant,
    parent: Option<Arc<TokenInner>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                cancelled_at_us: AtomicU64::new(0),
                epoch: Instant::now(),
                parent: None,
            }),
        }
    }

    /// Creates a linked child token.
    ///
    /// The child reports cancelled when either it or any ancestor is
    /// cancelled. Cancelling the child never propagates upward, which lets a
    /// supervisor stop an abandoned worker without disturbing the caller.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                cancelled_at_us: AtomicU64::new(0),
                epoch: Instant::now(),
                parent: Some(Arc::clone(&self.inner)),
            }),
        }
    }

    /// Trips the flag and returns `true` only for the call that performed the
    /// transition. Repeat calls are no-ops returning `false`, letting callers
    /// surface an "already cancelling" notice instead of re-running teardown.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            let offset_us = self.inner.epoch.elapsed().as_micros().min(u64::MAX as u128) as u64;
            self.inner
                .cancelled_at_us
                .store(offset_us.saturating_add(1), Ordering::Release);
        }
        first
    }

    /// Checks this token and every ancestor.
    pub fn is_cancelled(&self) -> bool {
        let mut inner: &TokenInner = &self.inner;
        loop {
            if inner.cancelled.load(Ordering::SeqCst) {
                return true;
            }
            match &inner.parent {
                Some(parent) => inner = parent,
                None => return false,
            }
        }
    }

    /// Clears this token's own flag so it can be reused across sequential
    /// operations. A cancelled ancestor is not affected and still shows
    /// through [`is_cancelled`](Self::is_cancelled).
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
        self.inner.cancelled_at_us.store(0, Ordering::Release);
    }

    /// Time elapsed since this token was cancelled, for latency diagnostics.
    /// `None` when the token itself was never cancelled.
    pub fn time_since_cancel(&self) -> Option<Duration> {
        let raw = self.inner.cancelled_at_us.load(Ordering::Acquire);
        if raw == 0 {
            return None;
        }
        let offset = Duration::from_micros(raw - 1);
        Some(self.inner.epoch.elapsed().saturating_sub(offset))
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a single engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationState {
    Running = 0,
    Cancelling = 1,
    Cancelled = 2,
    Completed = 3,
}

/// Atomic cell holding an [`OperationState`].
///
/// The only legal transitions are `Running -> Cancelling -> Cancelled` and
/// `Running -> Completed`; everything else is rejected. `Cancelled` is entered
/// only after cleanup has finished, `Completed` only after the output is
/// fully written.
#[derive(Debug)]
pub struct OperationStateCell(AtomicU8);

impl OperationStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(OperationState::Running as u8))
    }

    pub fn load(&self) -> OperationState {
        decode(self.0.load(Ordering::SeqCst))
    }

    /// Attempts the `from -> to` transition, returning whether it took
    /// effect. Illegal pairs and lost races both return `false`.
    pub fn try_transition(&self, from: OperationState, to: OperationState) -> bool {
        if !legal_transition(from, to) {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.load(),
            OperationState::Cancelled | OperationState::Completed
        )
    }
}

impl Default for OperationStateCell {
    fn default() -> Self {
        Self::new()
    }
}

fn legal_transition(from: OperationState, to: OperationState) -> bool {
    matches!(
        (from, to),
        (OperationState::Running, OperationState::Cancelling)
            | (OperationState::Cancelling, OperationState::Cancelled)
            | (OperationState::Running, OperationState::Completed)
    )
}

fn decode(raw: u8) -> OperationState {
    match raw {
        0 => OperationState::Running,
        1 => OperationState::Cancelling,
        2 => OperationState::Cancelled,
        _ => OperationState::Completed,
    }
}
