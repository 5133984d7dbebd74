//! # ferroscan
//!
//! Nonblocking inclusive scans over process groups, built as deferred
//! schedules.
//!
//! An inclusive scan leaves on rank `r` the combination of the contributions
//! of ranks `0..=r`, in rank order. This crate does not move data itself when
//! a scan is requested: it builds a [`Schedule`] of copies, sends, receives
//! and local reductions separated by barriers, and hands it to an [`Engine`]
//! that executes it in the background. The caller gets a [`Request`] back
//! immediately.
//!
//! Two schedule builders are provided:
//!
//! - **Recursive doubling** ([`coll::recursive_doubling`]): `ceil(log2(p))`
//!   exchange rounds, valid for any group and any operator.
//! - **Hierarchical** ([`coll::hierarchical`]): for groups whose ranks are laid
//!   out node by node, a scan within each node, a scan over one representative
//!   per node, and a fix-up that folds the prefix of all earlier nodes in.
//!   Only one value per node crosses node boundaries.
//!
//! The group's [`CollectiveSet`] picks between them per request. Non-commutative
//! operators are supported throughout: the earlier operand is always the one
//! from lower ranks.
//!
//! ## Quick Start
//!
//! ```
//! use ferroscan::{local::Fabric, NodeMap, Operator, ReduceOp};
//!
//! fn main() -> Result<(), ferroscan::Error> {
//!     // Four processes on two nodes, in one OS process.
//!     let fabric = Fabric::with_nodes(NodeMap::uniform(2, 2)?);
//!
//!     let prefixes = fabric.run(|world, engine| -> Result<Vec<f64>, ferroscan::Error> {
//!         let data = vec![world.rank() as f64 + 1.0; 8];
//!         let request = world.iscan(&engine, &data, vec![0.0; 8], &ReduceOp::Sum.into())?;
//!         // Overlap other work with the scan here.
//!         request.wait()
//!     })?;
//!
//!     for (rank, prefix) in prefixes.into_iter().enumerate() {
//!         let expected = ((rank + 1) * (rank + 2) / 2) as f64;
//!         assert!(prefix?.iter().all(|&x| x == expected));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description                                   | Dependencies |
//! |---------|-----------------------------------------------|--------------|
//! | `slurm` | Node layout from SLURM environment variables  | none         |
//!
//! ## Capabilities
//!
//! - **Generic API**: scans over any [`Element`] type with built-in
//!   ([`ReduceOp`]) or user-defined [`Operator`]s
//! - **Nonblocking and blocking scans**: [`Communicator::iscan`],
//!   [`Communicator::scan`], [`Communicator::scan_scalar`]
//! - **Persistent scans**: [`Communicator::scan_init`] builds once and runs many
//!   times
//! - **Transactional construction**: a failed build releases every scratch
//!   buffer and creates no request
//! - **Configuration** through [`Info`] hints or `FERROSCAN_*` environment
//!   variables ([`ScanConfig`])

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow certain pedantic lints for existing code
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::similar_names)]

pub mod coll;
mod comm;
mod config;
mod datatype;
mod engine;
mod error;
mod info;
mod iscan;
pub mod local;
mod op;
mod persistent;
mod request;
mod schedule;
mod scratch;
#[cfg(feature = "slurm")]
pub mod slurm;
mod topology;

pub use coll::{Algorithm, BcastArgs, CollectiveSet, Collectives, ScanArgs};
pub use comm::{Communicator, ContextId};
pub use config::{
    AlgorithmChoice, ScanConfig, ENV_RECV_TIMEOUT_MS, ENV_SCAN_ALGORITHM, ENV_SCRATCH_LIMIT,
};
pub use datatype::{Datatype, DatatypeTag, Element};
pub use engine::{Engine, UserBuffers};
pub use error::{Error, Result};
pub use info::{Info, INFO_KEY_MAX_LEN, INFO_VALUE_MAX_LEN};
pub use op::{Operator, ReduceOp};
pub use persistent::PersistentScan;
pub use request::{Completion, Request};
pub use schedule::{BufferRef, Peer, Round, Schedule, ScratchId, Step, Tag};
pub use scratch::{ScratchLayout, ScratchLease, ScratchPool};
pub use topology::NodeMap;
