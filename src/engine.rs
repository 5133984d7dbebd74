//! Execution engines.
//!
//! A schedule only describes what to do. An [`Engine`] takes ownership of a
//! sealed schedule together with the caller's buffers, runs the rounds in
//! order and reports the outcome through the [`Request`] it returns. The
//! in-process engine lives in [`local`](crate::local).

use std::sync::Arc;

use crate::datatype::Element;
use crate::error::Result;
use crate::op::Operator;
use crate::request::Request;
use crate::schedule::{Schedule, Tag};

/// The caller's buffers for one run of a schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct UserBuffers<T> {
    /// Contribution, `None` for in-place runs
    pub send: Option<Vec<T>>,
    /// Output storage; holds the contribution for in-place runs
    pub recv: Vec<T>,
}

impl<T> UserBuffers<T> {
    /// Number of elements per buffer.
    pub fn len(&self) -> usize {
        self.recv.len()
    }

    /// Whether the buffers hold no elements.
    pub fn is_empty(&self) -> bool {
        self.recv.is_empty()
    }
}

/// Runs schedules.
///
/// `start` must not block on communication: it hands the schedule off and
/// returns. Steps of one round may run in any order, but no step of a round
/// may begin before every step of the previous round has finished. The first
/// failing step ends the run; the request then reports that error and the
/// receive buffer is not returned.
///
/// The engine keeps the schedule alive while it runs, and releases it (and with
/// it every scratch lease) before the request completes.
pub trait Engine<T: Element> {
    /// Begin executing `schedule`. Messages are matched on `tag`, and
    /// `ReduceInto` steps apply `op`.
    fn start(
        &self,
        schedule: Arc<Schedule>,
        tag: Tag,
        op: Operator<T>,
        buffers: UserBuffers<T>,
    ) -> Result<Request<T>>;
}

impl<T: Element, E: Engine<T> + ?Sized> Engine<T> for &E {
    fn start(
        &self,
        schedule: Arc<Schedule>,
        tag: Tag,
        op: Operator<T>,
        buffers: UserBuffers<T>,
    ) -> Result<Request<T>> {
        (**self).start(schedule, tag, op, buffers)
    }
}
