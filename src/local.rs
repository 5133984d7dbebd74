//! In-process fabric and engine.
//!
//! A [`Fabric`] connects a fixed number of processes living in one OS process.
//! Each process owns a mailbox; messages are matched on context, tag and
//! source process, first-in first-out. A [`LocalEngine`] executes schedules
//! for one process on a dedicated thread.
//!
//! # Example
//!
//! ```
//! use ferroscan::{local::Fabric, NodeMap, Operator};
//!
//! let fabric = Fabric::with_nodes(NodeMap::uniform(2, 2).unwrap());
//! let results = fabric
//!     .run(|world, engine| {
//!         let letter = char::from(b'A' + world.rank() as u8).to_string();
//!         world.scan_scalar(&engine, letter, &Operator::concat()).unwrap()
//!     })
//!     .unwrap();
//! assert_eq!(results, ["A", "AB", "ABC", "ABCD"]);
//! ```

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::comm::{Communicator, ContextId};
use crate::config::ScanConfig;
use crate::datatype::Element;
use crate::engine::{Engine, UserBuffers};
use crate::error::{Error, Result};
use crate::op::Operator;
use crate::request::Request;
use crate::schedule::{BufferRef, Schedule, Step, Tag};
use crate::topology::NodeMap;

type Payload = Box<dyn Any + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MatchKey {
    context: ContextId,
    tag: Tag,
    source: usize,
}

#[derive(Default)]
struct Mailbox {
    queues: Mutex<HashMap<MatchKey, VecDeque<Payload>>>,
    arrived: Condvar,
}

fn pop(queues: &mut HashMap<MatchKey, VecDeque<Payload>>, key: &MatchKey) -> Option<Payload> {
    let queue = queues.get_mut(key)?;
    let msg = queue.pop_front();
    if queue.is_empty() {
        queues.remove(key);
    }
    msg
}

struct Mailboxes {
    boxes: Vec<Mailbox>,
}

impl Mailboxes {
    fn mailbox(&self, process: usize) -> Result<&Mailbox> {
        self.boxes.get(process).ok_or(Error::InvalidRank(process))
    }

    fn deliver(&self, to: usize, key: MatchKey, msg: Payload) -> Result<()> {
        let mailbox = self.mailbox(to)?;
        mailbox.queues.lock().entry(key).or_default().push_back(msg);
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn take(&self, at: usize, key: MatchKey, timeout: Duration) -> Result<Option<Payload>> {
        let mailbox = self.mailbox(at)?;
        let deadline = Instant::now() + timeout;
        let mut queues = mailbox.queues.lock();
        loop {
            if let Some(msg) = pop(&mut queues, &key) {
                return Ok(Some(msg));
            }
            if mailbox.arrived.wait_until(&mut queues, deadline).timed_out() {
                return Ok(pop(&mut queues, &key));
            }
        }
    }

    fn pending(&self) -> usize {
        self.boxes
            .iter()
            .map(|m| m.queues.lock().values().map(VecDeque::len).sum::<usize>())
            .sum()
    }
}

/// A set of processes connected by in-memory mailboxes.
#[derive(Clone)]
pub struct Fabric {
    mailboxes: Arc<Mailboxes>,
    nodes: Option<NodeMap>,
    config: ScanConfig,
}

impl fmt::Debug for Fabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fabric")
            .field("size", &self.size())
            .field("nodes", &self.nodes.as_ref().map(NodeMap::num_nodes))
            .field("config", &self.config)
            .finish()
    }
}

impl Fabric {
    /// A fabric of `size` processes with no node layout.
    pub fn new(size: usize) -> Self {
        Fabric {
            mailboxes: Arc::new(Mailboxes {
                boxes: (0..size).map(|_| Mailbox::default()).collect(),
            }),
            nodes: None,
            config: ScanConfig::default(),
        }
    }

    /// A fabric with one process per entry of `nodes`, spread as it says.
    pub fn with_nodes(nodes: NodeMap) -> Self {
        let mut fabric = Self::new(nodes.len());
        fabric.nodes = Some(nodes);
        fabric
    }

    /// Use `config` for every communicator and engine created afterwards.
    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of processes.
    pub fn size(&self) -> usize {
        self.mailboxes.boxes.len()
    }

    /// The world communicator as seen from `process`.
    ///
    /// Each call creates a fresh communicator with its own tag counter and
    /// scratch pool.
    pub fn communicator(&self, process: usize) -> Result<Communicator> {
        let processes = (0..self.size()).collect();
        let comm = match &self.nodes {
            Some(nodes) => {
                Communicator::with_nodes(ContextId::WORLD, process, processes, nodes.clone())?
            }
            None => Communicator::new(ContextId::WORLD, process, processes)?,
        };
        Ok(comm.with_config(self.config.clone()))
    }

    /// An engine executing schedules on behalf of `process`.
    pub fn engine(&self, process: usize) -> LocalEngine {
        LocalEngine {
            mailboxes: Arc::clone(&self.mailboxes),
            process,
            recv_timeout: self.config.recv_timeout,
        }
    }

    /// Run `body` once per process, each on its own thread, and collect the
    /// results in process order.
    ///
    /// # Errors
    ///
    /// Returns an error if a communicator cannot be built or a process panics.
    pub fn run<R, F>(&self, body: F) -> Result<Vec<R>>
    where
        F: Fn(Communicator, LocalEngine) -> R + Sync,
        R: Send,
    {
        let body = &body;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.size())
                .map(|process| {
                    let engine = self.engine(process);
                    scope.spawn(move || -> Result<R> {
                        let comm = self.communicator(process)?;
                        Ok(body(comm, engine))
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(process, handle)| {
                    handle
                        .join()
                        .map_err(|_| Error::Internal(format!("process {process} panicked")))?
                })
                .collect()
        })
    }

    /// Messages delivered but not yet received, across all mailboxes.
    pub fn pending_messages(&self) -> usize {
        self.mailboxes.pending()
    }
}

/// Executes schedules for one fabric process.
///
/// Each started schedule runs on its own thread. Within a round all sends are
/// posted before any other step, so two processes exchanging in the same
/// round never wait on each other. A receive that sees no matching message
/// within the timeout fails its step.
#[derive(Clone)]
pub struct LocalEngine {
    mailboxes: Arc<Mailboxes>,
    process: usize,
    recv_timeout: Duration,
}

impl fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEngine")
            .field("process", &self.process)
            .field("recv_timeout", &self.recv_timeout)
            .finish()
    }
}

impl LocalEngine {
    /// Fabric process this engine acts for.
    pub fn process(&self) -> usize {
        self.process
    }

    /// Fail receives that wait longer than `timeout`.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }
}

impl<T: Element> Engine<T> for LocalEngine {
    fn start(
        &self,
        schedule: Arc<Schedule>,
        tag: Tag,
        op: Operator<T>,
        buffers: UserBuffers<T>,
    ) -> Result<Request<T>> {
        let (completion, request) = Request::pending(tag);
        let engine = self.clone();
        thread::Builder::new()
            .name(format!("ferroscan-p{}-t{tag}", self.process))
            .spawn(move || {
                let outcome = Run::new(&engine, tag, &op, &schedule, buffers).execute(&schedule);
                // Scratch leases go back to the pool before the caller can observe completion.
                drop(schedule);
                completion.complete(outcome);
            })
            .map_err(|e| Error::Internal(format!("failed to spawn engine thread: {e}")))?;
        Ok(request)
    }
}

/// Buffers and context of one schedule execution.
struct Run<'a, T> {
    engine: &'a LocalEngine,
    tag: Tag,
    op: &'a Operator<T>,
    send: Option<Vec<T>>,
    recv: Vec<T>,
    scratch: Vec<Vec<T>>,
}

type StepResult<T> = std::result::Result<T, String>;

impl<'a, T: Element> Run<'a, T> {
    fn new(
        engine: &'a LocalEngine,
        tag: Tag,
        op: &'a Operator<T>,
        schedule: &Schedule,
        buffers: UserBuffers<T>,
    ) -> Self {
        let scratch = (0..schedule.scratch_count())
            .map(|i| {
                let capacity = schedule
                    .scratch_layout(crate::schedule::ScratchId(i))
                    .map_or(0, |l| l.count());
                Vec::with_capacity(capacity)
            })
            .collect();
        Run {
            engine,
            tag,
            op,
            send: buffers.send,
            recv: buffers.recv,
            scratch,
        }
    }

    fn execute(mut self, schedule: &Schedule) -> Result<Vec<T>> {
        let mut index = 0;
        for round in schedule.rounds() {
            let first = index;
            index += round.len();
            let (sends, rest): (Vec<_>, Vec<_>) = round
                .steps()
                .iter()
                .enumerate()
                .map(|(i, s)| (first + i, s))
                .partition(|(_, s)| matches!(s, Step::Send { .. }));
            for (i, step) in sends.into_iter().chain(rest) {
                tracing::trace!(process = self.engine.process, tag = self.tag, step = i, ?step);
                if let Err(reason) = self.step(step) {
                    tracing::warn!(
                        process = self.engine.process,
                        tag = self.tag,
                        step = i,
                        %reason,
                        "schedule step failed"
                    );
                    return Err(Error::step(i, reason));
                }
            }
        }
        tracing::debug!(
            process = self.engine.process,
            tag = self.tag,
            steps = index,
            "schedule complete"
        );
        Ok(self.recv)
    }

    fn step(&mut self, step: &Step) -> StepResult<()> {
        match *step {
            Step::Copy { src, dst, count, .. } => {
                let data = self.prefix(src, count)?.to_vec();
                self.store(dst, data)
            }
            Step::ReduceInto { src, dst, count, .. } => {
                let earlier = self.prefix(src, count)?.to_vec();
                let op = self.op;
                let later = self.write(dst)?;
                let available = later.len();
                let later = later
                    .get_mut(..count)
                    .ok_or_else(|| format!("{dst:?} holds {available} elements, step needs {count}"))?;
                op.reduce_into(&earlier, later);
                Ok(())
            }
            Step::Send { buf, count, peer, .. } => {
                let payload = self.prefix(buf, count)?.to_vec();
                let key = MatchKey {
                    context: peer.context,
                    tag: self.tag,
                    source: self.engine.process,
                };
                self.engine
                    .mailboxes
                    .deliver(peer.process, key, Box::new(payload))
                    .map_err(|e| e.to_string())
            }
            Step::Recv { buf, count, peer, .. } => {
                let key = MatchKey {
                    context: peer.context,
                    tag: self.tag,
                    source: peer.process,
                };
                let msg = self
                    .engine
                    .mailboxes
                    .take(self.engine.process, key, self.engine.recv_timeout)
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| {
                        format!(
                            "no message from process {} on {} within {:?}",
                            peer.process, peer.context, self.engine.recv_timeout
                        )
                    })?;
                let data = msg
                    .downcast::<Vec<T>>()
                    .map_err(|_| "message carries a different element type".to_string())?;
                if data.len() != count {
                    return Err(format!(
                        "received {} elements from process {}, expected {count}",
                        data.len(),
                        peer.process
                    ));
                }
                self.store(buf, *data)
            }
        }
    }

    fn read(&self, buf: BufferRef) -> StepResult<&[T]> {
        match buf {
            BufferRef::Send => self
                .send
                .as_deref()
                .ok_or_else(|| "in-place scan has no send buffer".to_string()),
            BufferRef::Recv => Ok(&self.recv),
            BufferRef::Scratch(id) => self
                .scratch
                .get(id.index())
                .map(Vec::as_slice)
                .ok_or_else(|| format!("unknown scratch buffer {}", id.index())),
        }
    }

    fn prefix(&self, buf: BufferRef, count: usize) -> StepResult<&[T]> {
        let data = self.read(buf)?;
        data.get(..count)
            .ok_or_else(|| format!("{buf:?} holds {} elements, step needs {count}", data.len()))
    }

    fn write(&mut self, buf: BufferRef) -> StepResult<&mut Vec<T>> {
        match buf {
            BufferRef::Send => Err("send buffer is read-only".to_string()),
            BufferRef::Recv => Ok(&mut self.recv),
            BufferRef::Scratch(id) => self
                .scratch
                .get_mut(id.index())
                .ok_or_else(|| format!("unknown scratch buffer {}", id.index())),
        }
    }

    fn store(&mut self, buf: BufferRef, data: Vec<T>) -> StepResult<()> {
        let target = self.write(buf)?;
        if target.len() >= data.len() {
            target[..data.len()].clone_from_slice(&data);
        } else {
            *target = data;
        }
        Ok(())
    }
}
