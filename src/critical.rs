//! Interrupt / task context sharing
//
// Structural updates to state reachable from both an interrupt handler and
// the cooperative worker run inside `CriticalSection::atomic`.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Platform hook for executing a closure with interrupts disabled.
///
/// Implementations must re-enable interrupts (or restore the previous
/// state) on return and must keep the disabled window short.
pub trait CriticalSection {
    fn atomic<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

/// Critical section for hosted builds and tests where nothing preempts
/// the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoInterrupts;

impl CriticalSection for NoInterrupts {
    fn atomic<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        f()
    }
}

/// State shared between interrupt and task context.
///
/// Every access runs inside the critical section. A nested access from
/// within `lock` is refused rather than aliased.
pub struct Shared<CS, T> {
    cs: CS,
    inner: RefCell<T>,
}

impl <CS: CriticalSection, T> Shared<CS, T> {
    pub fn new(cs: CS, value: T) -> Self {
        Self {
            cs,
            inner: RefCell::new(value),
        }
    }

    /// Run `f` with exclusive access, returns `None` if already locked
    pub fn lock<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        self.cs.atomic(|| {
            let mut v = self.inner.try_borrow_mut().ok()?;
            Some(f(&mut v))
        })
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Work flag raised from interrupt context and drained by the worker task
#[derive(Debug, Default)]
pub struct PendingFlag(AtomicBool);

impl PendingFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_lock_refused() {
        let s = Shared::new(NoInterrupts, 5u32);

        let r = s.lock(|v| {
            *v += 1;
            s.lock(|_| ()).is_none()
        });

        assert_eq!(r, Some(true));
        assert_eq!(s.into_inner(), 6);
    }

    #[test]
    fn flag_take_clears() {
        let f = PendingFlag::new();
        assert!(!f.take());

        f.raise();
        assert!(f.is_raised());
        assert!(f.take());
        assert!(!f.is_raised());
    }
}
