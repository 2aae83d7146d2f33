//! Per-pool reentrancy guard
//!
//! `Guarded<T>` serializes calls from different threads on a reentrant mutex
//! and rejects nested calls from the thread that already holds it. A flash
//! loan receiver or event sink calling back into the pool it is being served
//! by gets [`PoolError::ReentrantCall`] instead of a deadlock or a view of
//! half-applied state.

use crate::errors::PoolError;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use tracing::warn;

pub struct Guarded<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(value)),
        }
    }

    /// Shared access; fails while a mutating call on this thread is in flight
    pub fn read<R>(&self, f: impl FnOnce(&T) -> Result<R, PoolError>) -> Result<R, PoolError> {
        let guard = self.inner.lock();
        let value = guard.try_borrow().map_err(|_| {
            warn!("rejected read during an in-flight pool operation");
            PoolError::ReentrantCall
        })?;
        f(&value)
    }

    /// Exclusive access; fails on any nested call from the same thread
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> Result<R, PoolError>) -> Result<R, PoolError> {
        let guard = self.inner.lock();
        let mut value = guard.try_borrow_mut().map_err(|_| {
            warn!("rejected reentrant pool call");
            PoolError::ReentrantCall
        })?;
        f(&mut value)
    }

    /// Hold the lock across several calls; used by composite meta operations
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<T>> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().into_inner()
    }
}
