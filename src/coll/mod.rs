//! Collective schedule builders.
//!
//! Every builder appends steps to a [`Schedule`] for the calling rank only;
//! the collective works because every rank of the group runs the same builder
//! with the same arguments.
//!
//! - [`recursive_doubling`]: flat inclusive scan, valid for any group.
//! - [`hierarchical`]: node-aware inclusive scan built from sub-group scans and
//!   broadcasts.
//! - [`binomial`]: binomial-tree broadcast.
//!
//! Which builder a group uses is decided by its [`CollectiveSet`]. The common
//! variants dispatch statically; [`CollectiveSet::Custom`] plugs in any
//! [`Collectives`] implementation, which is how sub-groups can be given their
//! own strategy.

pub mod binomial;
pub mod hierarchical;
pub mod recursive_doubling;

use std::fmt;
use std::sync::Arc;

use crate::comm::Communicator;
use crate::config::AlgorithmChoice;
use crate::datatype::Datatype;
use crate::error::Result;
use crate::schedule::{BufferRef, Schedule};

/// Arguments of a scan builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanArgs {
    /// Contribution, or `None` when it already sits in `recv`
    pub send: Option<BufferRef>,
    /// Where the prefix ends up
    pub recv: BufferRef,
    /// Number of elements
    pub count: usize,
    /// Element layout
    pub datatype: Datatype,
    /// Whether the operator may see its operands swapped
    pub commutative: bool,
}

impl ScanArgs {
    /// The buffer holding this rank's contribution before the scan starts.
    pub fn contribution(&self) -> BufferRef {
        self.send.unwrap_or(self.recv)
    }
}

/// Arguments of a broadcast builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcastArgs {
    /// Source at the root, destination elsewhere
    pub buf: BufferRef,
    /// Number of elements
    pub count: usize,
    /// Element layout
    pub datatype: Datatype,
    /// Rank holding the data
    pub root: usize,
}

/// Schedule builders a group exposes to the algorithms layered on top of it.
pub trait Collectives: fmt::Debug + Send + Sync {
    /// Append an inclusive scan to `schedule`.
    fn scan(&self, args: &ScanArgs, comm: &Communicator, schedule: &mut Schedule) -> Result<()>;

    /// Append a broadcast to `schedule`. Binomial tree unless overridden.
    fn broadcast(
        &self,
        args: &BcastArgs,
        comm: &Communicator,
        schedule: &mut Schedule,
    ) -> Result<()> {
        binomial::broadcast(args, comm, schedule)
    }
}

/// The scan builder chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// [`recursive_doubling::scan`]
    RecursiveDoubling,
    /// [`hierarchical::scan`]
    Hierarchical,
}

/// Whether `comm` carries a node-consecutive layout and exactly the
/// sub-groups this rank needs for the hierarchical scan.
pub fn hierarchy_usable(comm: &Communicator) -> bool {
    let Some(nodes) = comm.nodes() else {
        return false;
    };
    if !nodes.is_node_consecutive() {
        return false;
    }
    let (Ok(members), Ok(representative)) = (
        nodes.members(comm.rank()),
        nodes.is_representative(comm.rank()),
    ) else {
        return false;
    };
    comm.node().is_some() == (members.len() > 1) && comm.roots().is_some() == representative
}

/// Pick the scan builder for `comm`.
///
/// Only depends on the node map and the configuration, both of which every
/// rank shares, so all ranks pick the same builder.
pub fn select(comm: &Communicator) -> Algorithm {
    let choice = comm.config().algorithm;
    if choice == AlgorithmChoice::Flat {
        return Algorithm::RecursiveDoubling;
    }
    if hierarchy_usable(comm) {
        Algorithm::Hierarchical
    } else {
        if choice == AlgorithmChoice::Hierarchical {
            tracing::warn!(
                context = %comm.context(),
                "hierarchical scan requested but the group is not node-consecutive, using recursive doubling"
            );
        }
        Algorithm::RecursiveDoubling
    }
}

/// Capability table of a group.
#[derive(Clone, Default)]
pub enum CollectiveSet {
    /// Choose per request with [`select`]
    #[default]
    Auto,
    /// Always [`recursive_doubling::scan`]
    RecursiveDoubling,
    /// Always [`hierarchical::scan`] (which still falls back on unsuitable groups)
    Hierarchical,
    /// Caller-provided builders
    Custom(Arc<dyn Collectives>),
}

impl fmt::Debug for CollectiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveSet::Auto => f.write_str("Auto"),
            CollectiveSet::RecursiveDoubling => f.write_str("RecursiveDoubling"),
            CollectiveSet::Hierarchical => f.write_str("Hierarchical"),
            CollectiveSet::Custom(c) => f.debug_tuple("Custom").field(c).finish(),
        }
    }
}

impl Collectives for CollectiveSet {
    fn scan(&self, args: &ScanArgs, comm: &Communicator, schedule: &mut Schedule) -> Result<()> {
        let algorithm = match self {
            CollectiveSet::Custom(custom) => return custom.scan(args, comm, schedule),
            CollectiveSet::Auto => select(comm),
            CollectiveSet::RecursiveDoubling => Algorithm::RecursiveDoubling,
            CollectiveSet::Hierarchical => Algorithm::Hierarchical,
        };
        tracing::debug!(
            context = %comm.context(),
            rank = comm.rank(),
            size = comm.size(),
            count = args.count,
            ?algorithm,
            "building scan"
        );
        match algorithm {
            Algorithm::RecursiveDoubling => recursive_doubling::scan(args, comm, schedule),
            Algorithm::Hierarchical => hierarchical::scan(args, comm, schedule),
        }
    }

    fn broadcast(
        &self,
        args: &BcastArgs,
        comm: &Communicator,
        schedule: &mut Schedule,
    ) -> Result<()> {
        match self {
            CollectiveSet::Custom(custom) => custom.broadcast(args, comm, schedule),
            _ => binomial::broadcast(args, comm, schedule),
        }
    }
}
