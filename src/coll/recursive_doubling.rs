//! Flat inclusive scan by recursive doubling.
//!
//! ```text
//! recv    = contribution
//! partial = contribution
//! for mask in 1, 2, 4, ... while mask < size:
//!     partner = rank ^ mask
//!     if partner < size:
//!         exchange partial with partner, receiving into incoming
//!         if rank > partner:
//!             partial = incoming + partial
//!             recv    = incoming + recv
//!         else if commutative:
//!             partial = incoming + partial
//!         else:
//!             incoming = partial + incoming
//!             partial  = incoming
//! ```
//!
//! `ceil(log2(size))` exchange rounds. The partner of a lower rank holds a
//! window of higher ranks, so it only ever feeds the running accumulator,
//! never `recv`.

use crate::comm::Communicator;
use crate::error::Result;
use crate::schedule::Schedule;

use super::ScanArgs;

/// Append a recursive-doubling inclusive scan to `schedule`.
///
/// Allocates two scratch buffers of `count` elements (the running
/// accumulator and the exchange buffer). `count == 0` records nothing.
pub fn scan(args: &ScanArgs, comm: &Communicator, schedule: &mut Schedule) -> Result<()> {
    if args.count == 0 {
        return Ok(());
    }

    let rank = comm.rank();
    let size = comm.size();
    let count = args.count;
    let dt = args.datatype;

    schedule.transaction(|s| {
        let partial = s.alloc_scratch(&dt, count)?;
        let incoming = s.alloc_scratch(&dt, count)?;

        if let Some(send) = args.send {
            s.copy(send, args.recv, count, dt)?;
        }
        s.copy(args.contribution(), partial, count, dt)?;
        s.barrier();

        let mut mask = 1usize;
        while mask < size {
            let partner = rank ^ mask;
            if partner < size {
                let peer = comm.peer(partner)?;
                s.send(partial, count, dt, peer)?;
                s.recv(incoming, count, dt, peer)?;
                s.barrier();

                if rank > partner {
                    s.reduce_into(incoming, partial, count, dt)?;
                    s.reduce_into(incoming, args.recv, count, dt)?;
                } else if args.commutative {
                    s.reduce_into(incoming, partial, count, dt)?;
                } else {
                    s.reduce_into(partial, incoming, count, dt)?;
                    s.barrier();
                    s.copy(incoming, partial, count, dt)?;
                }
                s.barrier();
            }
            mask <<= 1;
        }
        Ok(())
    })
}
