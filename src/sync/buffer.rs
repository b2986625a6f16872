//! Buffers handed between execution domains.

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use super::fence::{Domain, Fence, FenceToken};
use crate::util::{Error, Result};

struct Inner<T> {
    data: Vec<T>,
    generation: u64,
    writer: Option<Domain>,
}

/// Single-writer-then-single-reader buffer.
///
/// The lock only guarantees memory safety. Ordering between the writing and
/// reading domain comes from fence tokens: [`read_certified`](Self::read_certified)
/// refuses to hand out data until the token that covers the write is reached.
/// Every write bumps a generation counter so a premature read is detectable.
pub struct SharedBuffer<T> {
    name: &'static str,
    inner: RwLock<Inner<T>>,
}

impl<T> SharedBuffer<T> {
    pub fn from_vec(name: &'static str, data: Vec<T>) -> Self {
        Self {
            name,
            inner: RwLock::new(Inner {
                data,
                generation: 0,
                writer: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed writes.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Domain that performed the last write.
    pub fn last_writer(&self) -> Option<Domain> {
        self.inner.read().writer
    }

    /// Exclusive write from `domain`; bumps the generation.
    pub fn write<R>(&self, domain: Domain, f: impl FnOnce(&mut [T]) -> R) -> R {
        let mut inner = self.inner.write();
        let r = f(&mut inner.data);
        inner.generation += 1;
        inner.writer = Some(domain);
        r
    }

    /// Read once `token` is certified reached on `fence`.
    pub fn read_certified(&self, token: FenceToken, fence: &Fence) -> Result<MappedRwLockReadGuard<'_, [T]>> {
        if !fence.is_reached(token) {
            return Err(Error::Uncertified {
                buffer: self.name,
                token,
            });
        }
        Ok(RwLockReadGuard::map(self.inner.read(), |i| i.data.as_slice()))
    }

    /// Read without any ordering check.
    ///
    /// Only sound for the writing domain itself (program order) or for the
    /// host after a drain. Anything else may observe the previous frame.
    pub fn read_unchecked(&self) -> MappedRwLockReadGuard<'_, [T]> {
        RwLockReadGuard::map(self.inner.read(), |i| i.data.as_slice())
    }

    /// Generation together with a copy of the contents, taken atomically.
    pub fn snapshot(&self) -> (u64, Vec<T>)
    where
        T: Clone,
    {
        let inner = self.inner.read();
        (inner.generation, inner.data.clone())
    }
}

impl<T: Clone + Default> SharedBuffer<T> {
    pub fn new(name: &'static str, len: usize) -> Self {
        Self::from_vec(name, vec![T::default(); len])
    }

    /// Reallocate to `len` default elements. Resets the generation.
    pub fn resize(&self, len: usize) {
        let mut inner = self.inner.write();
        inner.data = vec![T::default(); len];
        inner.generation = 0;
        inner.writer = None;
    }
}

/// Check a stage's buffer against the current pixel count.
pub fn expect_len(buffer: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::BufferSize {
            buffer,
            expected,
            actual,
        })
    }
}
