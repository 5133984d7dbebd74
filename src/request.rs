//! Request handles for nonblocking scans.

use std::fmt;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::error::{Error, Result};
use crate::schedule::Tag;

/// The engine side of a [`Request`]: reports the terminal outcome, once.
#[derive(Debug)]
pub struct Completion<T> {
    tx: Sender<Result<Vec<T>>>,
}

impl<T> Completion<T> {
    /// Report the outcome of the operation.
    ///
    /// `Ok` carries the caller's receive buffer holding the result. If the
    /// request was already dropped the outcome is discarded.
    pub fn complete(self, outcome: Result<Vec<T>>) {
        let _ = self.tx.send(outcome);
    }
}

/// A handle to a nonblocking scan.
///
/// The engine owns the caller's buffers while the schedule runs; the receive
/// buffer comes back from [`wait()`](Self::wait) once every step has finished.
/// There is no partial result: the request yields either the complete prefix
/// or the single error that stopped the schedule.
///
/// # Example
///
/// ```
/// use ferroscan::{local::Fabric, Operator, ReduceOp};
///
/// let fabric = Fabric::new(2);
/// let results = fabric
///     .run(|world, engine| {
///         let send = vec![world.rank() as i64 + 1; 3];
///         let request = world
///             .iscan(&engine, &send, vec![0; 3], &Operator::builtin(ReduceOp::Sum))
///             .unwrap();
///         // Do other work while the schedule runs...
///         request.wait().unwrap()
///     })
///     .unwrap();
/// assert_eq!(results, vec![vec![1, 1, 1], vec![3, 3, 3]]);
/// ```
pub struct Request<T> {
    tag: Tag,
    rx: Receiver<Result<Vec<T>>>,
    outcome: Option<Result<Vec<T>>>,
    completed: bool,
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("tag", &self.tag)
            .field("completed", &self.completed)
            .finish()
    }
}

impl<T> Request<T> {
    /// Create a pending request and the completion its engine reports through.
    pub fn pending(tag: Tag) -> (Completion<T>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            Completion { tx },
            Request {
                tag,
                rx,
                outcome: None,
                completed: false,
            },
        )
    }

    /// Tag the operation's messages carry.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Check if this request has been completed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn settle(&mut self, outcome: Result<Vec<T>>) {
        self.outcome = Some(outcome);
        self.completed = true;
    }

    fn abandoned() -> Error {
        Error::Internal("engine dropped the request without completing it".into())
    }

    /// Wait for the operation to complete and return the receive buffer.
    ///
    /// # Errors
    ///
    /// Returns the [`Error::StepFailure`] (or other error) that ended the
    /// schedule.
    pub fn wait(mut self) -> Result<Vec<T>> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        let outcome = self.rx.recv().unwrap_or_else(|_| Err(Self::abandoned()));
        self.completed = true;
        outcome
    }

    /// Test if this operation has completed without blocking.
    ///
    /// Returns `true` once the outcome is available; collect it with
    /// [`wait()`](Self::wait), which then returns immediately.
    pub fn test(&mut self) -> bool {
        if self.completed {
            return true;
        }
        match self.rx.try_recv() {
            Ok(outcome) => self.settle(outcome),
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => self.settle(Err(Self::abandoned())),
        }
        true
    }

    /// Wait for all requests, returning their buffers in order.
    ///
    /// Every request is waited on even if an earlier one failed; the first
    /// error is returned.
    pub fn wait_all(requests: Vec<Request<T>>) -> Result<Vec<Vec<T>>> {
        let outcomes: Vec<_> = requests.into_iter().map(Request::wait).collect();
        outcomes.into_iter().collect()
    }
}

impl<T> Drop for Request<T> {
    fn drop(&mut self) {
        if !self.completed {
            // Let the schedule finish so its buffers are not torn down mid-flight.
            let _ = self.rx.recv();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_request_returns_buffer() {
        let (completion, request) = Request::<i32>::pending(4);
        assert_eq!(request.tag(), 4);
        completion.complete(Ok(vec![1, 2]));
        assert_eq!(request.wait().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_then_wait() {
        let (completion, mut request) = Request::<i32>::pending(0);
        assert!(!request.test());
        assert!(!request.is_completed());
        completion.complete(Err(Error::step(3, "boom")));
        assert!(request.test());
        assert!(request.is_completed());
        assert_eq!(request.wait(), Err(Error::step(3, "boom")));
    }

    #[test]
    fn dropped_completion_is_an_error() {
        let (completion, request) = Request::<u8>::pending(0);
        drop(completion);
        assert!(matches!(request.wait(), Err(Error::Internal(_))));
    }

    #[test]
    fn wait_all_reports_first_error() {
        let (c0, r0) = Request::<u8>::pending(0);
        let (c1, r1) = Request::<u8>::pending(1);
        c0.complete(Ok(vec![1]));
        c1.complete(Err(Error::step(0, "lost")));
        let err = Request::wait_all(vec![r0, r1]).unwrap_err();
        assert_eq!(err, Error::step(0, "lost"));
    }

    #[test]
    fn debug_shows_tag_and_state() {
        // no Debug bound on the element type
        struct Opaque;
        let (completion, mut request) = Request::<Opaque>::pending(9);
        assert_eq!(format!("{request:?}"), "Request { tag: 9, completed: false }");
        completion.complete(Ok(Vec::new()));
        assert!(request.test());
        assert_eq!(format!("{request:?}"), "Request { tag: 9, completed: true }");
        let err: Result<Request<Opaque>> = Err(Error::InvalidBuffer("short".into()));
        assert!(matches!(err.unwrap_err(), Error::InvalidBuffer(_)));
    }

    #[test]
    fn wait_all_empty() {
        assert!(Request::<f64>::wait_all(Vec::new()).unwrap().is_empty());
    }
}
