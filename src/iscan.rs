//! Nonblocking scan entry point.
//!
//! Validates the caller's buffers, builds the schedule through the group's
//! [`Collectives`](crate::Collectives) and hands it to the engine. A failure
//! while building releases everything and creates no request.

use crate::coll::{Collectives, ScanArgs};
use crate::comm::Communicator;
use crate::datatype::{Datatype, Element};
use crate::engine::{Engine, UserBuffers};
use crate::error::{Error, Result};
use crate::op::Operator;
use crate::request::Request;
use crate::schedule::{BufferRef, Schedule};

/// Build the scan schedule for `comm` without starting it.
pub(crate) fn build_schedule<T: Element>(
    comm: &Communicator,
    in_place: bool,
    count: usize,
    op: &Operator<T>,
) -> Result<Schedule> {
    let args = ScanArgs {
        send: (!in_place).then_some(BufferRef::Send),
        recv: BufferRef::Recv,
        count,
        datatype: Datatype::of::<T>(),
        commutative: op.is_commutative(),
    };
    let mut schedule = Schedule::new(comm.pool().clone());
    schedule.transaction(|s| comm.collectives().scan(&args, comm, s))?;
    Ok(schedule)
}

pub(crate) fn check_lengths<T>(send: Option<&[T]>, recv: &[T]) -> Result<()> {
    match send {
        Some(send) if send.len() != recv.len() => Err(Error::InvalidBuffer(format!(
            "send buffer has {} elements, receive buffer {}",
            send.len(),
            recv.len()
        ))),
        _ => Ok(()),
    }
}

/// Start an inclusive scan on `comm`.
///
/// With `send == None` the contribution is taken from `recv`.
pub fn start<T, E>(
    engine: &E,
    comm: &Communicator,
    send: Option<Vec<T>>,
    recv: Vec<T>,
    op: &Operator<T>,
) -> Result<Request<T>>
where
    T: Element,
    E: Engine<T> + ?Sized,
{
    check_lengths(send.as_deref(), &recv)?;
    let count = recv.len();
    let schedule = build_schedule(comm, send.is_none(), count, op)?;
    let tag = comm.next_tag();
    tracing::debug!(
        context = %comm.context(),
        rank = comm.rank(),
        tag,
        count,
        op = op.name(),
        rounds = schedule.num_rounds(),
        scratch = schedule.scratch_count(),
        "starting scan"
    );
    engine.start(schedule.into_shared(), tag, op.clone(), UserBuffers { send, recv })
}
