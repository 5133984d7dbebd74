//! Binomial-tree broadcast.
//!
//! Ranks are renumbered relative to the root. A rank receives once, from the
//! rank that differs in its lowest set bit, then forwards to every rank that
//! differs in a lower bit. The tree has depth `ceil(log2(size))`.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::schedule::Schedule;

use super::BcastArgs;

/// Append a binomial broadcast from `args.root` to `schedule`.
///
/// The root only sends; every other rank receives in one round and then
/// forwards to its children in the next.
pub fn broadcast(args: &BcastArgs, comm: &Communicator, schedule: &mut Schedule) -> Result<()> {
    let size = comm.size();
    Error::check_rank(args.root, size)?;
    if args.count == 0 || size == 1 {
        return Ok(());
    }

    let rank = comm.rank();
    let relative = (rank + size - args.root) % size;
    let (buf, count, dt) = (args.buf, args.count, args.datatype);

    schedule.transaction(|s| {
        let mut mask = 1usize;
        while mask < size {
            if relative & mask != 0 {
                let parent = (rank + size - mask) % size;
                s.recv(buf, count, dt, comm.peer(parent)?)?;
                s.barrier();
                break;
            }
            mask <<= 1;
        }

        mask >>= 1;
        while mask > 0 {
            if relative + mask < size {
                let child = (rank + mask) % size;
                s.send(buf, count, dt, comm.peer(child)?)?;
            }
            mask >>= 1;
        }
        s.barrier();
        Ok(())
    })
}
