//! Monotonic completion counters.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One of the two independent execution domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Ray tracing, packing, compositing
    Graphics,
    /// Neural inference
    Accelerator,
}

impl Domain {
    pub fn name(&self) -> &'static str {
        match self {
            Domain::Graphics => "graphics",
            Domain::Accelerator => "accelerator",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fence value that certifies all work of `domain` submitted before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceToken {
    pub domain: Domain,
    pub value: u64,
}

impl fmt::Display for FenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fence #{}", self.domain, self.value)
    }
}

#[derive(Debug, Default)]
struct FenceState {
    /// Highest value reserved by a submitter
    reserved: u64,
    /// Highest value signalled by the owning queue
    completed: u64,
    closed: bool,
}

/// Completion counter of one domain.
///
/// Values are reserved at submission and signalled in order by the owning
/// queue; waiters block on the condvar until their value is reached.
#[derive(Debug)]
pub struct Fence {
    domain: Domain,
    state: Mutex<FenceState>,
    cv: Condvar,
}

impl Fence {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            state: Mutex::new(FenceState::default()),
            cv: Condvar::new(),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Next value to be signalled.
    pub(crate) fn reserve(&self) -> FenceToken {
        let mut s = self.state.lock();
        s.reserved += 1;
        FenceToken {
            domain: self.domain,
            value: s.reserved,
        }
    }

    pub(crate) fn signal(&self, value: u64) {
        let mut s = self.state.lock();
        if value > s.completed {
            s.completed = value;
            self.cv.notify_all();
        }
    }

    /// Wake every waiter permanently; used at teardown.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.cv.notify_all();
    }

    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// Token of this domain whose value has been signalled.
    pub fn is_reached(&self, token: FenceToken) -> bool {
        token.domain == self.domain && self.completed() >= token.value
    }

    /// Block until `token` is reached. Returns false if the fence was closed
    /// first or the token belongs to another domain.
    pub fn wait(&self, token: FenceToken) -> bool {
        if token.domain != self.domain {
            return false;
        }
        let mut s = self.state.lock();
        while s.completed < token.value {
            if s.closed {
                return false;
            }
            self.cv.wait(&mut s);
        }
        true
    }

    /// [`wait`](Self::wait) with an upper bound.
    pub fn wait_timeout(&self, token: FenceToken, timeout: Duration) -> bool {
        if token.domain != self.domain {
            return false;
        }
        let deadline = Instant::now() + timeout;
        let mut s = self.state.lock();
        while s.completed < token.value {
            if s.closed || self.cv.wait_until(&mut s, deadline).timed_out() {
                return s.completed >= token.value;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reserve_is_monotonic() {
        let f = Fence::new(Domain::Graphics);
        let a = f.reserve();
        let b = f.reserve();
        assert!(b.value > a.value);
        assert!(!f.is_reached(a));
        f.signal(a.value);
        assert!(f.is_reached(a));
        assert!(!f.is_reached(b));
        // Signals never go backwards
        f.signal(b.value);
        f.signal(a.value);
        assert_eq!(f.completed(), b.value);
    }

    #[test]
    fn test_cross_thread_wait() {
        let f = Arc::new(Fence::new(Domain::Accelerator));
        let t = f.reserve();
        let f2 = f.clone();
        let h = std::thread::spawn(move || f2.wait(t));
        std::thread::sleep(Duration::from_millis(10));
        f.signal(t.value);
        assert!(h.join().unwrap());
    }

    #[test]
    fn test_wrong_domain_and_timeout() {
        let f = Fence::new(Domain::Graphics);
        let foreign = FenceToken { domain: Domain::Accelerator, value: 0 };
        assert!(!f.is_reached(foreign));
        assert!(!f.wait(foreign));

        let t = f.reserve();
        assert!(!f.wait_timeout(t, Duration::from_millis(5)));
    }

    #[test]
    fn test_close_releases_waiters() {
        let f = Arc::new(Fence::new(Domain::Graphics));
        let t = f.reserve();
        let f2 = f.clone();
        let h = std::thread::spawn(move || f2.wait(t));
        std::thread::sleep(Duration::from_millis(10));
        f.close();
        assert!(!h.join().unwrap());
    }

    #[test]
    fn test_token_display() {
        let t = FenceToken { domain: Domain::Graphics, value: 7 };
        assert_eq!(t.to_string(), "graphics fence #7");
    }
}
