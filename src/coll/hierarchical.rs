//! Node-aware inclusive scan.
//!
//! On a node-consecutive group the scan splits into five phases:
//!
//! 1. scan within each node into `recv`;
//! 2. the last rank of each node holds the node total and hands it to the
//!    node's representative (`local_total`);
//! 3. representatives scan the node totals (`pre_total`);
//! 4. representative `i` relays `pre_total` to `i + 1`, which stores it as
//!    `cross_node_prefix`: the combination of every earlier node;
//! 5. outside node 0, `cross_node_prefix` is broadcast within the node and
//!    folded in front of `recv`.
//!
//! Synchronisation grows with `log(nodes) + log(ranks per node)` and only one
//! value per node crosses node boundaries. Node and representative scans and
//! the node broadcast go through the sub-groups' own [`Collectives`], so they
//! may use a different strategy.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::schedule::Schedule;

use super::{hierarchy_usable, recursive_doubling, BcastArgs, Collectives, ScanArgs};

/// Append a hierarchical inclusive scan to `schedule`.
///
/// Groups without a usable node-consecutive layout get a recursive-doubling
/// scan instead; that is not an error.
pub fn scan(args: &ScanArgs, comm: &Communicator, schedule: &mut Schedule) -> Result<()> {
    if !hierarchy_usable(comm) {
        tracing::debug!(
            context = %comm.context(),
            "group is not node-consecutive, falling back to recursive doubling"
        );
        return recursive_doubling::scan(args, comm, schedule);
    }
    if args.count == 0 {
        return Ok(());
    }

    let count = args.count;
    let dt = args.datatype;
    let node = comm.node();
    let roots = comm.roots();
    let node_index = comm
        .node_index()
        .ok_or_else(|| Error::Internal("node-consecutive group without node index".into()))?;

    schedule.transaction(|s| {
        let cross_node_prefix = s.alloc_scratch(&dt, count)?;
        let mut pre_total = None;
        let mut local_total = None;
        if roots.is_some() {
            pre_total = Some(s.alloc_scratch(&dt, count)?);
            if node.is_some() {
                local_total = Some(s.alloc_scratch(&dt, count)?);
            }
        }

        // Intra-node scan. A node of one just keeps its contribution.
        match node {
            Some(node) => node.collectives().scan(args, node, s)?,
            None => {
                if let Some(send) = args.send {
                    s.copy(send, args.recv, count, dt)?;
                }
            }
        }
        s.barrier();

        // The last rank of the node holds the node total.
        match (roots, node) {
            (Some(_), Some(node)) => {
                let buf = local_total
                    .ok_or_else(|| Error::Internal("representative without node total".into()))?;
                s.recv(buf, count, dt, node.peer(node.size() - 1)?)?;
            }
            (None, Some(node)) if node.rank() == node.size() - 1 => {
                s.send(args.recv, count, dt, node.peer(0)?)?;
            }
            (Some(_), None) => local_total = Some(args.recv),
            _ => {}
        }
        s.barrier();

        if let (Some(roots), Some(local_total), Some(pre_total)) = (roots, local_total, pre_total) {
            let totals = ScanArgs {
                send: Some(local_total),
                recv: pre_total,
                ..*args
            };
            roots.collectives().scan(&totals, roots, s)?;
            s.barrier();

            let me = roots.rank();
            if me + 1 < roots.size() {
                s.send(pre_total, count, dt, roots.peer(me + 1)?)?;
                s.barrier();
            }
            if me > 0 {
                s.recv(cross_node_prefix, count, dt, roots.peer(me - 1)?)?;
                s.barrier();
            }
        }

        if node_index != 0 {
            if let Some(node) = node {
                let bcast = BcastArgs {
                    buf: cross_node_prefix,
                    count,
                    datatype: dt,
                    root: 0,
                };
                node.collectives().broadcast(&bcast, node, s)?;
                s.barrier();
            }
            s.reduce_into(cross_node_prefix, args.recv, count, dt)?;
        }
        Ok(())
    })
}
