//! Node time base
//
// Wrapping millisecond tick counter shared by the alarm scheduler and
// the MAC protocols.

/// Millisecond ticks since boot, wrapping at 2^32
pub type Jiffies = u32;

/// Timer trait provides access to the monotonic (wrapping) tick counter
/// used to drive alarms and protocol timeouts.
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn jiffies(&self) -> Jiffies;
}

/// Check whether `a` is strictly after `b`, accounting for wraparound.
///
/// Valid while the two values are less than 2^31 ticks apart.
#[inline]
pub fn time_after(a: Jiffies, b: Jiffies) -> bool {
    (b.wrapping_sub(a) as i32) < 0
}

/// Check whether `deadline` has been reached at `now`
#[inline]
pub fn expired(deadline: Jiffies, now: Jiffies) -> bool {
    !time_after(deadline, now)
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use super::Jiffies;

    /// Mock timer implementation to assist with testing
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<Jiffies>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_ms(&mut self, val: Jiffies) {
            *self.0.lock().unwrap() = val;
        }

        pub fn inc(&mut self) {
            self.advance(1);
        }

        pub fn advance(&mut self, ms: Jiffies) {
            let mut v = self.0.lock().unwrap();
            *v = v.wrapping_add(ms);
        }

        pub fn val(&self) -> Jiffies {
            *self.0.lock().unwrap()
        }
    }

    impl super::Timer for MockTimer {
        fn jiffies(&self) -> Jiffies {
            *self.0.lock().unwrap()
        }
    }
}
