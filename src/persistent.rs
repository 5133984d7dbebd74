//! Persistent scans.
//!
//! A persistent scan builds its schedule once and then runs it any number of
//! times. This amortizes schedule construction and scratch allocation across
//! iterations, which pays off for iterative algorithms that scan a buffer of
//! the same shape every step.
//!
//! # Example
//!
//! ```
//! use ferroscan::{local::Fabric, Operator, ReduceOp};
//!
//! let fabric = Fabric::new(3);
//! let results = fabric
//!     .run(|world, engine| {
//!         let op = Operator::builtin(ReduceOp::Sum);
//!         let mut scan = world.scan_init::<u64>(2, &op).unwrap();
//!         let mut last = Vec::new();
//!         for iter in 0..4u64 {
//!             let data = vec![iter; 2];
//!             scan.start(&engine, &data, vec![0; 2]).unwrap();
//!             // Optionally do other work here...
//!             last = scan.wait().unwrap();
//!         }
//!         last
//!     })
//!     .unwrap();
//! assert_eq!(results[2], vec![9, 9]);
//! ```

use std::sync::Arc;

use crate::comm::Communicator;
use crate::datatype::Element;
use crate::engine::{Engine, UserBuffers};
use crate::error::{Error, Result};
use crate::iscan;
use crate::op::Operator;
use crate::request::Request;
use crate::schedule::{Schedule, Tag};

/// An inclusive scan that has been built but not necessarily started.
///
/// # Lifecycle
///
/// 1. Create with [`Communicator::scan_init`]
/// 2. Start with [`start()`](Self::start)
/// 3. Wait for completion with [`wait()`](Self::wait)
/// 4. Repeat steps 2-3 as needed
///
/// Every member of the group must start its persistent scans in the same order.
/// The schedule and its scratch are released on drop.
pub struct PersistentScan<T> {
    schedule: Arc<Schedule>,
    tag: Tag,
    op: Operator<T>,
    count: usize,
    inflight: Option<Request<T>>,
}

impl<T: Element> PersistentScan<T> {
    pub(crate) fn init(comm: &Communicator, count: usize, op: &Operator<T>) -> Result<Self> {
        let schedule = iscan::build_schedule(comm, false, count, op)?;
        let tag = comm.next_tag();
        tracing::debug!(
            context = %comm.context(),
            rank = comm.rank(),
            tag,
            count,
            rounds = schedule.num_rounds(),
            "persistent scan initialized"
        );
        Ok(PersistentScan {
            schedule: schedule.into_shared(),
            tag,
            op: op.clone(),
            count,
            inflight: None,
        })
    }

    /// Number of elements every start must provide.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Tag the scan's messages carry.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The reusable schedule.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Check if this scan is currently active (started but not waited).
    pub fn is_active(&self) -> bool {
        self.inflight.is_some()
    }

    /// Start the scan with a fresh contribution.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan is already active, or
    /// [`Error::InvalidBuffer`] if either buffer does not hold
    /// [`count()`](Self::count) elements.
    pub fn start<E>(&mut self, engine: &E, send: &[T], recv: Vec<T>) -> Result<()>
    where
        E: Engine<T> + ?Sized,
    {
        if self.inflight.is_some() {
            return Err(Error::Internal("persistent scan is already active".into()));
        }
        if send.len() != self.count || recv.len() != self.count {
            return Err(Error::InvalidBuffer(format!(
                "persistent scan expects {} elements, got send {} and receive {}",
                self.count,
                send.len(),
                recv.len()
            )));
        }
        let buffers = UserBuffers {
            send: Some(send.to_vec()),
            recv,
        };
        let request = engine.start(Arc::clone(&self.schedule), self.tag, self.op.clone(), buffers)?;
        self.inflight = Some(request);
        Ok(())
    }

    /// Wait for the running scan and return its receive buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan was not started, or whatever error ended
    /// the run.
    pub fn wait(&mut self) -> Result<Vec<T>> {
        self.inflight
            .take()
            .ok_or_else(|| Error::Internal("persistent scan was not started".into()))?
            .wait()
    }

    /// Test if the running scan has completed without blocking.
    ///
    /// Returns `true` if it is not active.
    pub fn test(&mut self) -> bool {
        self.inflight.as_mut().map_or(true, Request::test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ContextId;
    use crate::op::ReduceOp;

    struct Echo;

    impl Engine<i64> for Echo {
        fn start(
            &self,
            _schedule: Arc<Schedule>,
            tag: Tag,
            _op: Operator<i64>,
            buffers: UserBuffers<i64>,
        ) -> Result<Request<i64>> {
            let (completion, request) = Request::pending(tag);
            completion.complete(Ok(buffers.send.unwrap_or(buffers.recv)));
            Ok(request)
        }
    }

    fn single() -> Communicator {
        Communicator::new(ContextId::WORLD, 0, vec![0]).unwrap()
    }

    #[test]
    fn lifecycle() {
        let comm = single();
        let mut scan = comm.scan_init::<i64>(2, &ReduceOp::Sum.into()).unwrap();
        assert_eq!(scan.tag(), 0);
        assert!(!scan.is_active());
        assert!(scan.test());

        scan.start(&Echo, &[4, 5], vec![0, 0]).unwrap();
        assert!(scan.is_active());
        assert!(scan.start(&Echo, &[4, 5], vec![0, 0]).is_err());
        assert_eq!(scan.wait().unwrap(), vec![4, 5]);
        assert!(!scan.is_active());

        scan.start(&Echo, &[6, 7], vec![0, 0]).unwrap();
        assert_eq!(scan.wait().unwrap(), vec![6, 7]);
        // the next collective on the group gets a fresh tag
        assert_eq!(comm.next_tag(), 1);
    }

    #[test]
    fn wait_without_start_fails() {
        let mut scan = single().scan_init::<i64>(1, &ReduceOp::Max.into()).unwrap();
        assert!(matches!(scan.wait(), Err(Error::Internal(_))));
    }

    #[test]
    fn buffers_must_match_count() {
        let mut scan = single().scan_init::<i64>(3, &ReduceOp::Sum.into()).unwrap();
        let err = scan.start(&Echo, &[1, 2], vec![0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::InvalidBuffer(_)));
        assert!(!scan.is_active());
    }

    #[test]
    fn scratch_lives_with_the_scan() {
        let comm = Communicator::new(ContextId::WORLD, 0, vec![0, 1]).unwrap();
        let pool = comm.pool().clone();
        let scan = comm.scan_init::<i64>(4, &ReduceOp::Sum.into()).unwrap();
        assert_eq!(pool.live_buffers(), 2);
        drop(scan);
        assert_eq!(pool.live_buffers(), 0);
    }
}
