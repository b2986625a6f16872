//! Per-frame phase machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::util::{Error, Result};

/// `Idle → Tracing → Packing → Inferring → Compositing → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FramePhase {
    Idle = 0,
    Tracing = 1,
    Packing = 2,
    Inferring = 3,
    Compositing = 4,
}

impl FramePhase {
    pub fn name(&self) -> &'static str {
        match self {
            FramePhase::Idle => "idle",
            FramePhase::Tracing => "tracing",
            FramePhase::Packing => "packing",
            FramePhase::Inferring => "inferring",
            FramePhase::Compositing => "compositing",
        }
    }

    /// The only phase allowed to follow this one.
    pub fn next(&self) -> FramePhase {
        match self {
            FramePhase::Idle => FramePhase::Tracing,
            FramePhase::Tracing => FramePhase::Packing,
            FramePhase::Packing => FramePhase::Inferring,
            FramePhase::Inferring => FramePhase::Compositing,
            FramePhase::Compositing => FramePhase::Idle,
        }
    }

    fn from_u8(v: u8) -> FramePhase {
        match v {
            1 => FramePhase::Tracing,
            2 => FramePhase::Packing,
            3 => FramePhase::Inferring,
            4 => FramePhase::Compositing,
            _ => FramePhase::Idle,
        }
    }
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phase shared between the host and the queue jobs of the current frame.
#[derive(Debug, Default)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn get(&self) -> FramePhase {
        FramePhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to`, which must be the successor of the current phase.
    pub fn advance(&self, to: FramePhase) -> Result<()> {
        let from = self.get();
        if from.next() != to {
            return Err(Error::InvalidPhase { from: from.name(), to: to.name() });
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| Error::InvalidPhase {
                from: FramePhase::from_u8(actual).name(),
                to: to.name(),
            })
    }

    /// Back to idle after a torn-down or failed submission.
    pub fn reset(&self) {
        self.0.store(FramePhase::Idle as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let p = PhaseCell::default();
        assert_eq!(p.get(), FramePhase::Idle);
        for to in [
            FramePhase::Tracing,
            FramePhase::Packing,
            FramePhase::Inferring,
            FramePhase::Compositing,
            FramePhase::Idle,
        ] {
            p.advance(to).unwrap();
            assert_eq!(p.get(), to);
        }
    }

    #[test]
    fn test_skipping_is_rejected() {
        let p = PhaseCell::default();
        let err = p.advance(FramePhase::Inferring).unwrap_err();
        assert!(matches!(err, Error::InvalidPhase { from: "idle", to: "inferring" }));
        assert_eq!(p.get(), FramePhase::Idle);

        p.advance(FramePhase::Tracing).unwrap();
        p.reset();
        assert_eq!(p.get(), FramePhase::Idle);
    }
}
