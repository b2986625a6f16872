//! Cross-domain synchronization.
//!
//! Two execution domains run independently: the graphics queue (tracing,
//! packing, compositing) and the accelerator queue (inference). Neither can
//! see the other's work except through fence tokens.
//!
//! ## Per-frame ordering
//! ```text
//! graphics:    trace → pack → signal(t1)            wait(t2) → composite → signal(t3)
//! accelerator:                 wait(t1) → infer → signal(t2)
//! host:                                                                   wait_for(t3)
//! ```

mod buffer;
mod domain;
mod fence;
mod timing;

pub use buffer::{expect_len, SharedBuffer};
pub use domain::ExecutionQueue;
pub use fence::{Domain, Fence, FenceToken};
pub use timing::{InferenceTimer, TimingSnapshot};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::util::Result;

/// Both execution queues, their fences and the inference timer.
pub struct CrossDomainSync {
    graphics: ExecutionQueue,
    accelerator: ExecutionQueue,
    timer: Arc<Mutex<InferenceTimer>>,
}

impl CrossDomainSync {
    pub fn new() -> Result<Self> {
        Ok(Self {
            graphics: ExecutionQueue::spawn(Domain::Graphics)?,
            accelerator: ExecutionQueue::spawn(Domain::Accelerator)?,
            timer: Arc::new(Mutex::new(InferenceTimer::default())),
        })
    }

    pub fn graphics(&self) -> &ExecutionQueue {
        &self.graphics
    }

    pub fn accelerator(&self) -> &ExecutionQueue {
        &self.accelerator
    }

    pub fn queue(&self, domain: Domain) -> &ExecutionQueue {
        match domain {
            Domain::Graphics => &self.graphics,
            Domain::Accelerator => &self.accelerator,
        }
    }

    pub fn fence(&self, domain: Domain) -> &Arc<Fence> {
        self.queue(domain).fence()
    }

    /// Token certifying all graphics work submitted so far.
    pub fn record_graphics_complete(&self) -> Result<FenceToken> {
        self.graphics.signal()
    }

    /// Token certifying all accelerator work submitted so far.
    pub fn record_accelerator_complete(&self) -> Result<FenceToken> {
        self.accelerator.signal()
    }

    /// Accelerator work submitted after this call starts only once `token` is reached.
    pub fn accelerator_wait(&self, token: FenceToken) -> Result<()> {
        self.accelerator.wait_on(self.fence(token.domain).clone(), token)
    }

    /// Graphics work submitted after this call starts only once `token` is reached.
    pub fn graphics_wait(&self, token: FenceToken) -> Result<()> {
        self.graphics.wait_on(self.fence(token.domain).clone(), token)
    }

    /// Host-side blocking wait. False if the pipeline was torn down first.
    pub fn wait_for(&self, token: FenceToken) -> bool {
        self.fence(token.domain).wait(token)
    }

    pub fn wait_for_timeout(&self, token: FenceToken, timeout: Duration) -> bool {
        self.fence(token.domain).wait_timeout(token, timeout)
    }

    pub fn is_reached(&self, token: FenceToken) -> bool {
        self.fence(token.domain).is_reached(token)
    }

    /// Block until both queues have retired everything submitted so far.
    pub fn drain(&self) -> Result<()> {
        let g = self.record_graphics_complete()?;
        let a = self.record_accelerator_complete()?;
        self.wait_for(g);
        self.wait_for(a);
        Ok(())
    }

    pub fn timer(&self) -> &Arc<Mutex<InferenceTimer>> {
        &self.timer
    }
}

impl Drop for CrossDomainSync {
    fn drop(&mut self) {
        // Release cross-queue waits before the workers are joined
        self.graphics.fence().close();
        self.accelerator.fence().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_retires_everything() {
        let sync = CrossDomainSync::new().unwrap();
        let flag = Arc::new(Mutex::new(false));
        let f = flag.clone();
        sync.accelerator()
            .submit(move || {
                std::thread::sleep(Duration::from_millis(20));
                *f.lock() = true;
            })
            .unwrap();
        sync.drain().unwrap();
        assert!(*flag.lock());
    }

    #[test]
    fn test_drop_with_blocked_wait() {
        // Accelerator waits on a graphics token that is never signalled
        let sync = CrossDomainSync::new().unwrap();
        let never = FenceToken { domain: Domain::Graphics, value: 1_000 };
        sync.accelerator_wait(never).unwrap();
        drop(sync);
    }
}
