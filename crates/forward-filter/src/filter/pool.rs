//! Reusable shadow request structures.
//!
//! Each inbound request borrows one [`ShadowRequest`] for the duration of its
//! flow through the filter. The guard returned by [`RequestPool::acquire`]
//! resets the structure and hands it back when dropped, on every exit path.
//! Header maps keep their allocation across uses.

use std::ops::{Deref, DerefMut};

use crossbeam::queue::ArrayQueue;

use super::shadow::ShadowRequest;

/// Lock-free, bounded pool of shadow request structures.
pub struct RequestPool {
    slots: ArrayQueue<ShadowRequest>,
}

impl RequestPool {
    /// A pool retaining at most `capacity` idle structures (minimum one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Take an idle structure, or a fresh one when none is idle.
    pub fn acquire(&self) -> PooledRequest<'_> {
        PooledRequest {
            request: self.slots.pop().unwrap_or_default(),
            pool: self,
        }
    }

    /// Number of idle structures waiting for reuse.
    pub fn idle(&self) -> usize {
        self.slots.len()
    }

    fn release(&self, mut request: ShadowRequest) {
        request.reset();
        // A full pool simply lets the structure go.
        let _ = self.slots.push(request);
    }
}

/// Exclusive handle on a pooled [`ShadowRequest`].
pub struct PooledRequest<'a> {
    request: ShadowRequest,
    pool: &'a RequestPool,
}

impl Deref for PooledRequest<'_> {
    type Target = ShadowRequest;

    fn deref(&self) -> &ShadowRequest {
        &self.request
    }
}

impl DerefMut for PooledRequest<'_> {
    fn deref_mut(&mut self) -> &mut ShadowRequest {
        &mut self.request
    }
}

impl Drop for PooledRequest<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.request));
    }
}
