//! Deferred execution plans.
//!
//! A [`Schedule`] is an ordered list of [`Round`]s. Steps inside a round have no
//! declared dependency on each other and may run in any order or concurrently;
//! the boundary between two rounds is a barrier: every step before it completes
//! before any step after it begins.
//!
//! Schedules are built synchronously by the collective builders in
//! [`coll`](crate::coll) and then handed, once, to an
//! [`Engine`](crate::Engine). After hand-off they are shared behind an `Arc`
//! and never mutated.
//!
//! # Scratch transactions
//!
//! Builders allocate scratch through [`Schedule::alloc_scratch`] inside
//! [`Schedule::transaction`]. If the closure fails, every scratch buffer and
//! every step recorded inside it is dropped again, so a failing builder never
//! leaves a partial plan or a leaked lease behind.
//!
//! ```
//! use ferroscan::{BufferRef, Datatype, Schedule, ScratchPool};
//!
//! let pool = ScratchPool::unbounded();
//! let mut sched = Schedule::new(pool.clone());
//! let dt = Datatype::of::<f64>();
//!
//! sched
//!     .transaction(|s| {
//!         let tmp = s.alloc_scratch(&dt, 4)?;
//!         s.copy(BufferRef::Send, tmp, 4, dt)?;
//!         s.barrier();
//!         s.copy(tmp, BufferRef::Recv, 4, dt)
//!     })
//!     .unwrap();
//!
//! assert_eq!(sched.num_rounds(), 2);
//! assert_eq!(pool.live_buffers(), 1);
//! drop(sched);
//! assert_eq!(pool.live_buffers(), 0);
//! ```

use std::sync::Arc;

use crate::comm::ContextId;
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::scratch::{ScratchLayout, ScratchLease, ScratchPool};

/// Tag distinguishing the messages of one collective from concurrent ones.
pub type Tag = u32;

/// Index of a scratch buffer inside its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScratchId(pub(crate) usize);

impl ScratchId {
    /// Position of the buffer in allocation order.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A buffer a step reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRef {
    /// The caller's send buffer
    Send,
    /// The caller's receive buffer
    Recv,
    /// A buffer owned by the schedule
    Scratch(ScratchId),
}

/// The remote side of a send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    /// Context of the group the step was recorded against
    pub context: ContextId,
    /// Rank within that group
    pub rank: usize,
    /// Fabric process the rank maps to
    pub process: usize,
}

/// One communication or computation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `dst := src`
    Copy {
        /// Source buffer
        src: BufferRef,
        /// Destination buffer
        dst: BufferRef,
        /// Number of elements
        count: usize,
        /// Element layout
        datatype: Datatype,
    },
    /// Send `count` elements of `buf` to `peer`
    Send {
        /// Buffer to send
        buf: BufferRef,
        /// Number of elements
        count: usize,
        /// Element layout
        datatype: Datatype,
        /// Destination
        peer: Peer,
    },
    /// Receive `count` elements from `peer` into `buf`
    Recv {
        /// Buffer to fill
        buf: BufferRef,
        /// Number of elements
        count: usize,
        /// Element layout
        datatype: Datatype,
        /// Source
        peer: Peer,
    },
    /// `dst := combine(src, dst)`, with `src` as the earlier operand
    ReduceInto {
        /// Earlier operand
        src: BufferRef,
        /// Later operand and destination
        dst: BufferRef,
        /// Number of elements
        count: usize,
        /// Element layout
        datatype: Datatype,
    },
}

impl Step {
    /// Whether the step moves data between processes.
    pub fn is_communication(&self) -> bool {
        matches!(self, Step::Send { .. } | Step::Recv { .. })
    }

    fn buffers(&self) -> [Option<BufferRef>; 2] {
        match *self {
            Step::Copy { src, dst, .. } | Step::ReduceInto { src, dst, .. } => {
                [Some(src), Some(dst)]
            }
            Step::Send { buf, .. } | Step::Recv { buf, .. } => [Some(buf), None],
        }
    }
}

/// A set of steps with no ordering among them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Round {
    steps: Vec<Step>,
}

impl Round {
    /// Steps in recording order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the round holds no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug)]
struct ScratchBuffer {
    layout: ScratchLayout,
    _lease: ScratchLease,
}

struct Savepoint {
    rounds: usize,
    open_steps: usize,
    scratch: usize,
}

/// An ordered, barrier-partitioned plan of steps.
#[derive(Debug)]
pub struct Schedule {
    pool: ScratchPool,
    rounds: Vec<Round>,
    open: Round,
    scratch: Vec<ScratchBuffer>,
}

impl Schedule {
    /// Create an empty schedule drawing scratch from `pool`.
    pub fn new(pool: ScratchPool) -> Self {
        Schedule {
            pool,
            rounds: Vec::new(),
            open: Round::default(),
            scratch: Vec::new(),
        }
    }

    /// The pool scratch is drawn from.
    pub fn pool(&self) -> &ScratchPool {
        &self.pool
    }

    // ========================================================================
    // Scratch
    // ========================================================================

    /// Allocate a scratch buffer for `count` elements of `datatype`.
    ///
    /// The buffer lives as long as the schedule. Allocate inside
    /// [`transaction`](Self::transaction) so a later failure releases it.
    pub fn alloc_scratch(&mut self, datatype: &Datatype, count: usize) -> Result<BufferRef> {
        let layout = datatype.scratch_layout(count)?;
        let lease = self.pool.allocate(layout)?;
        let id = ScratchId(self.scratch.len());
        self.scratch.push(ScratchBuffer {
            layout,
            _lease: lease,
        });
        Ok(BufferRef::Scratch(id))
    }

    /// Number of scratch buffers owned by the schedule.
    pub fn scratch_count(&self) -> usize {
        self.scratch.len()
    }

    /// Layout of a scratch buffer.
    pub fn scratch_layout(&self, id: ScratchId) -> Option<ScratchLayout> {
        self.scratch.get(id.0).map(|s| s.layout)
    }

    /// Run `build` as one construction transaction.
    ///
    /// On `Ok` the scratch and steps recorded by `build` are committed to the
    /// schedule. On `Err` they are reaped: the schedule is restored to the
    /// state it had before the call and every lease taken inside is released.
    pub fn transaction<R>(&mut self, build: impl FnOnce(&mut Schedule) -> Result<R>) -> Result<R> {
        let save = Savepoint {
            rounds: self.rounds.len(),
            open_steps: self.open.steps.len(),
            scratch: self.scratch.len(),
        };
        match build(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                let reaped = self.scratch.len() - save.scratch;
                self.rollback(save);
                tracing::debug!(reaped, error = %err, "schedule construction failed, scratch reaped");
                Err(err)
            }
        }
    }

    fn rollback(&mut self, save: Savepoint) {
        self.scratch.truncate(save.scratch);
        if self.rounds.len() > save.rounds {
            let mut reopened = self.rounds.drain(save.rounds..);
            self.open = reopened.next().unwrap_or_default();
        }
        self.open.steps.truncate(save.open_steps);
    }

    // ========================================================================
    // Step recorders
    // ========================================================================

    fn check(&self, step: &Step) -> Result<()> {
        for buf in step.buffers().into_iter().flatten() {
            if let BufferRef::Scratch(id) = buf {
                if id.0 >= self.scratch.len() {
                    return Err(Error::Internal(format!(
                        "step references unknown scratch buffer {}",
                        id.0
                    )));
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, step: Step) -> Result<()> {
        self.check(&step)?;
        self.open.steps.push(step);
        Ok(())
    }

    /// Record `dst := src`.
    pub fn copy(
        &mut self,
        src: BufferRef,
        dst: BufferRef,
        count: usize,
        datatype: Datatype,
    ) -> Result<()> {
        self.record(Step::Copy {
            src,
            dst,
            count,
            datatype,
        })
    }

    /// Record a send of `buf` to `peer`.
    pub fn send(
        &mut self,
        buf: BufferRef,
        count: usize,
        datatype: Datatype,
        peer: Peer,
    ) -> Result<()> {
        self.record(Step::Send {
            buf,
            count,
            datatype,
            peer,
        })
    }

    /// Record a receive from `peer` into `buf`.
    pub fn recv(
        &mut self,
        buf: BufferRef,
        count: usize,
        datatype: Datatype,
        peer: Peer,
    ) -> Result<()> {
        self.record(Step::Recv {
            buf,
            count,
            datatype,
            peer,
        })
    }

    /// Record `dst := combine(src, dst)`.
    pub fn reduce_into(
        &mut self,
        src: BufferRef,
        dst: BufferRef,
        count: usize,
        datatype: Datatype,
    ) -> Result<()> {
        self.record(Step::ReduceInto {
            src,
            dst,
            count,
            datatype,
        })
    }

    /// Close the current round. A barrier after an empty round is a no-op.
    pub fn barrier(&mut self) {
        if !self.open.is_empty() {
            self.rounds.push(std::mem::take(&mut self.open));
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Rounds in execution order, including the round still being recorded.
    pub fn rounds(&self) -> impl Iterator<Item = &Round> {
        self.rounds
            .iter()
            .chain(Some(&self.open).filter(|r| !r.is_empty()))
    }

    /// Number of non-empty rounds.
    pub fn num_rounds(&self) -> usize {
        self.rounds.len() + usize::from(!self.open.is_empty())
    }

    /// All steps in round-major order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.rounds().flat_map(|r| r.steps.iter())
    }

    /// Whether no step has been recorded.
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty() && self.open.is_empty()
    }

    /// Seal the schedule for hand-off to an engine.
    pub fn into_shared(mut self) -> Arc<Schedule> {
        self.barrier();
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(rank: usize) -> Peer {
        Peer {
            context: ContextId::WORLD,
            rank,
            process: rank,
        }
    }

    #[test]
    fn barriers_split_rounds() {
        let dt = Datatype::of::<i32>();
        let mut s = Schedule::new(ScratchPool::unbounded());
        s.send(BufferRef::Send, 1, dt, peer(1)).unwrap();
        s.recv(BufferRef::Recv, 1, dt, peer(1)).unwrap();
        s.barrier();
        s.barrier();
        s.copy(BufferRef::Recv, BufferRef::Send, 1, dt).unwrap();

        let sizes: Vec<usize> = s.rounds().map(Round::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(s.num_rounds(), 2);
        assert_eq!(s.steps().filter(|st| st.is_communication()).count(), 2);
    }

    #[test]
    fn unknown_scratch_is_rejected() {
        let dt = Datatype::of::<i32>();
        let mut s = Schedule::new(ScratchPool::unbounded());
        let bogus = BufferRef::Scratch(ScratchId(3));
        assert!(s.copy(BufferRef::Send, bogus, 1, dt).is_err());
        assert!(s.is_empty());
    }

    #[test]
    fn failed_transaction_reaps_scratch_and_steps() {
        let pool = ScratchPool::unbounded();
        let dt = Datatype::of::<f64>();
        let mut s = Schedule::new(pool.clone());
        s.copy(BufferRef::Send, BufferRef::Recv, 2, dt).unwrap();

        let result: Result<()> = s.transaction(|s| {
            let a = s.alloc_scratch(&dt, 2)?;
            s.copy(BufferRef::Send, a, 2, dt)?;
            s.barrier();
            s.alloc_scratch(&dt, 2)?;
            s.reduce_into(a, BufferRef::Recv, 2, dt)?;
            Err(Error::Internal("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(pool.live_buffers(), 0);
        assert_eq!(s.scratch_count(), 0);
        assert_eq!(s.num_rounds(), 1);
        assert_eq!(s.steps().count(), 1);
    }

    #[test]
    fn nested_transaction_failure_only_reaps_inner() {
        let pool = ScratchPool::unbounded();
        let dt = Datatype::of::<u8>();
        let mut s = Schedule::new(pool.clone());

        let outer = s.transaction(|s| {
            s.alloc_scratch(&dt, 8)?;
            let inner: Result<()> = s.transaction(|s| {
                s.alloc_scratch(&dt, 8)?;
                Err(Error::Internal("inner".into()))
            });
            assert!(inner.is_err());
            Ok(())
        });

        assert!(outer.is_ok());
        assert_eq!(pool.live_buffers(), 1);
        assert_eq!(s.scratch_count(), 1);
    }

    #[test]
    fn shared_schedule_keeps_scratch_until_dropped() {
        let pool = ScratchPool::unbounded();
        let dt = Datatype::of::<u64>();
        let mut s = Schedule::new(pool.clone());
        let tmp = s.alloc_scratch(&dt, 3).unwrap();
        s.copy(BufferRef::Send, tmp, 3, dt).unwrap();

        let shared = s.into_shared();
        let clone = Arc::clone(&shared);
        drop(shared);
        assert_eq!(pool.live_buffers(), 1);
        drop(clone);
        assert_eq!(pool.live_buffers(), 0);
    }
}
