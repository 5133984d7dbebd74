//! Scratch buffer accounting.
//!
//! Schedules own temporary buffers ("partial accumulator", "incoming",
//! "relay"). This module sizes them ([`ScratchLayout`]) and hands out leases
//! from a [`ScratchPool`]. A [`ScratchLease`] releases its bytes exactly once,
//! when it is dropped, so a schedule that is reaped on a construction failure
//! and a schedule that finished executing give their scratch back the same way.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::datatype::Datatype;
use crate::error::{Error, Result};

/// Size and base adjustment of one scratch allocation.
///
/// A buffer of `count` elements needs `count * max(extent, true_extent)` bytes.
/// When the datatype has a non-zero true lower bound the usable base sits
/// `-true_lb` bytes away from the start of the allocation, so element data
/// (which begins at `base + true_lb`) starts exactly at the allocation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchLayout {
    count: usize,
    bytes: usize,
    usable_offset: isize,
}

impl ScratchLayout {
    /// Compute the layout for `count` elements of `datatype`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the size overflows `usize`.
    pub fn new(count: usize, datatype: &Datatype) -> Result<Self> {
        let stride = datatype.extent().max(datatype.true_extent()).max(0) as usize;
        let bytes = count
            .checked_mul(stride)
            .ok_or_else(|| Error::AllocationFailure {
                requested: usize::MAX,
                reason: format!("{count} elements of {stride} bytes overflow the address space"),
            })?;
        Ok(ScratchLayout {
            count,
            bytes,
            usable_offset: -datatype.true_lb(),
        })
    }

    /// Number of elements the buffer holds.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Bytes to allocate.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Offset of the usable base pointer from the start of the allocation.
    pub fn usable_offset(&self) -> isize {
        self.usable_offset
    }
}

#[derive(Debug, Default)]
struct PoolState {
    live_buffers: usize,
    live_bytes: usize,
    granted: usize,
    fail_after: Option<usize>,
}

#[derive(Debug)]
struct PoolInner {
    limit: Option<usize>,
    state: Mutex<PoolState>,
}

/// Source of scratch leases, shared by every schedule built against it.
///
/// The pool tracks live buffers and bytes so callers can verify that nothing
/// leaks, and it can refuse allocations: either beyond a byte limit or, for
/// fault injection, after a fixed number of successful grants.
#[derive(Debug, Clone)]
pub struct ScratchPool {
    inner: Arc<PoolInner>,
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl ScratchPool {
    /// A pool with no byte limit.
    pub fn unbounded() -> Self {
        Self::build(None)
    }

    /// A pool that refuses to keep more than `limit` bytes live at once.
    pub fn with_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(limit: Option<usize>) -> Self {
        ScratchPool {
            inner: Arc::new(PoolInner {
                limit,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Make every allocation after the next `successes` grants fail.
    pub fn fail_after(&self, successes: usize) {
        let mut state = self.inner.state.lock();
        state.fail_after = Some(state.granted + successes);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.inner.state.lock().fail_after = None;
    }

    /// Number of leases currently alive.
    pub fn live_buffers(&self) -> usize {
        self.inner.state.lock().live_buffers
    }

    /// Bytes currently leased.
    pub fn live_bytes(&self) -> usize {
        self.inner.state.lock().live_bytes
    }

    /// Lease a buffer for `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the byte limit would be exceeded
    /// or an injected failure is armed.
    pub fn allocate(&self, layout: ScratchLayout) -> Result<ScratchLease> {
        let mut state = self.inner.state.lock();
        if let Some(fail_after) = state.fail_after {
            if state.granted >= fail_after {
                return Err(Error::AllocationFailure {
                    requested: layout.bytes(),
                    reason: "injected allocation failure".into(),
                });
            }
        }
        if let Some(limit) = self.inner.limit {
            if state.live_bytes.saturating_add(layout.bytes()) > limit {
                return Err(Error::AllocationFailure {
                    requested: layout.bytes(),
                    reason: format!(
                        "scratch limit of {limit} bytes reached ({} live)",
                        state.live_bytes
                    ),
                });
            }
        }
        state.granted += 1;
        state.live_buffers += 1;
        state.live_bytes += layout.bytes();
        Ok(ScratchLease {
            pool: Arc::clone(&self.inner),
            layout,
        })
    }
}

/// A live scratch allocation. Dropping it returns the bytes to the pool.
#[derive(Debug)]
pub struct ScratchLease {
    pool: Arc<PoolInner>,
    layout: ScratchLayout,
}

impl ScratchLease {
    /// The layout this lease was granted for.
    pub fn layout(&self) -> ScratchLayout {
        self.layout
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.live_buffers -= 1;
        state.live_bytes -= self.layout.bytes();
    }
}
