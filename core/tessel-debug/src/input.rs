//!
//! RouterInput - Fan-out Node
//!
//! A `RouterInput` accepts bytes from any thread and forwards them to every
//! attached output. Attached outputs may themselves be `RouterInput`s, which
//! is how chains and fan-out trees are built.
//!
//! ## Delivery Paths
//!
//! - **Synchronous**: bytes are pushed to the output on the caller's thread
//!   while holding the output-list lock. Used for outputs that refuse
//!   buffering, and for every output while the input is not threaded.
//! - **Buffered**: bytes are appended to a fixed-capacity buffer under a
//!   spin lock. A background mover swaps that buffer with its own empty one
//!   (a pointer swap, not a copy) and delivers the swapped-out bytes to
//!   every buffering output. Calls are appended whole: a producer whose
//!   call does not fit wakes the mover and sleeps until a pass has made
//!   room. A call larger than the capacity waits for an empty buffer and
//!   grows it for that one pass.
//!
//! A panic in an output is caught and reported to the sink; the other
//! outputs still get the bytes and the mover keeps running.
//!
//! ## Threaded Mode
//!
//! An input starts threaded when the process lifecycle is initialized, and
//! can be promoted (`start_threaded`) or demoted (`demote`) later. Demotion
//! waits for in-flight producers, stops the mover, and lets it deliver what
//! is left before it exits. Dropping an input demotes it and then removes
//! every edge it takes part in.
//!
//! ## Recursion
//!
//! Each thread keeps a stack of the inputs it is currently delivering for.
//! Bytes sent to an input already on that stack are dropped: an output that
//! reports its own failure back into the input driving it would otherwise
//! recurse or wait on itself.
//!

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tessel_core::config::DEFAULT_BUFFER_CAPACITY;
use tessel_core::lifecycle;
use tessel_sync::{BlockingObject, MutexLock, RwSleepLock, SpinLock, Thread, ThreadContext};

use crate::output::{
    Attachable, Feeds, NodeId, NodeRef, Target, detach_from_feeds, flush_upstream, next_node_id,
};
use crate::sink::{panic_message, report_error};

const MOVER_POLL: Duration = Duration::from_millis(100);
const DRAIN_POLL: Duration = Duration::from_millis(10);

static DEFAULT_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_BUFFER_CAPACITY);

/// Buffer capacity used by `RouterInput::new`
pub fn set_default_capacity(capacity: usize) {
    DEFAULT_CAPACITY.store(capacity.max(1), Ordering::Relaxed);
}

pub fn default_capacity() -> usize {
    DEFAULT_CAPACITY.load(Ordering::Relaxed)
}

thread_local! {
    static DELIVERING: RefCell<Vec<NodeId>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as delivering for one input
struct Delivering {
    id: NodeId,
}

impl Delivering {
    fn enter(id: NodeId) -> Option<Self> {
        DELIVERING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&id) {
                None
            } else {
                stack.push(id);
                Some(Self { id })
            }
        })
    }

    fn is_active(id: NodeId) -> bool {
        DELIVERING.with(|stack| stack.borrow().contains(&id))
    }
}

impl Drop for Delivering {
    fn drop(&mut self) {
        DELIVERING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == self.id) {
                stack.remove(pos);
            }
        });
    }
}

struct Edge {
    id: NodeId,
    target: Weak<dyn Target>,
}

type EdgeList = MutexLock<RefCell<Vec<Edge>>>;

/// Live targets of an edge list the caller has locked; dead edges are pruned
fn live_targets(edges: &RefCell<Vec<Edge>>) -> Vec<Arc<dyn Target>> {
    let mut edges = edges.borrow_mut();
    edges.retain(|edge| edge.target.strong_count() > 0);
    edges.iter().filter_map(|edge| edge.target.upgrade()).collect()
}

pub(crate) struct InputShared {
    id: NodeId,
    capacity: usize,
    outputs: EdgeList,
    feeds: Feeds,
    /// Live buffer producers append to
    buffer: SpinLock<Vec<u8>>,
    /// Serializes buffered appends and flushes
    gate: MutexLock,
    /// Set while the mover sleeps; cleared to wake it
    wake: BlockingObject,
    /// Set by a producer waiting for room; cleared after each mover pass
    drained: BlockingObject,
    /// Completed mover passes
    passes: AtomicU64,
    /// Producers hold it shared; promotion and demotion hold it exclusively
    mode: RwSleepLock,
    threaded: AtomicBool,
    mover: SpinLock<Option<Thread>>,
}

impl InputShared {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id: next_node_id(),
            capacity,
            outputs: MutexLock::new(RefCell::new(Vec::new())),
            feeds: Feeds::default(),
            buffer: SpinLock::new(Vec::with_capacity(capacity)),
            gate: MutexLock::default(),
            wake: BlockingObject::new_set(),
            drained: BlockingObject::new(),
            passes: AtomicU64::new(0),
            mode: RwSleepLock::new(),
            threaded: AtomicBool::new(false),
            mover: SpinLock::new(None),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn feeds(&self) -> &Feeds {
        &self.feeds
    }

    fn output(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let Some(_delivering) = Delivering::enter(self.id) else {
            return;
        };

        let _mode = self.mode.read();
        let threaded = self.threaded.load(Ordering::SeqCst);
        let mut buffered = false;
        {
            let outputs = self.outputs.lock();
            for target in live_targets(&outputs) {
                if threaded && target.is_buffer_processing() {
                    buffered = true;
                } else {
                    self.deliver_to(target.as_ref(), data);
                }
            }
        }

        if buffered {
            self.append(data);
        }
    }

    fn deliver_to(&self, target: &dyn Target, data: &[u8]) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| target.deliver(data))) {
            report_error(format_args!(
                "router input {}: output {} panicked: {}",
                self.id,
                target.node_id(),
                panic_message(payload.as_ref())
            ));
        }
    }

    fn append(&self, data: &[u8]) {
        let _gate = self.gate.lock();
        loop {
            {
                let mut buffer = self.buffer.lock();
                if buffer.is_empty() || buffer.len() + data.len() <= self.capacity {
                    buffer.extend_from_slice(data);
                    break;
                }
            }

            // no room for the whole call: hand the buffer over and wait
            self.drained.set();
            self.wake.clear();
            self.drained.wait_until_clear(false, Some(DRAIN_POLL));
        }
        self.wake.clear();
    }

    /// One mover pass: swap the live buffer out and deliver it
    fn move_buffer(&self, working: &mut Vec<u8>) {
        {
            let mut live = self.buffer.lock();
            std::mem::swap(&mut *live, working);
        }

        if !working.is_empty() {
            let outputs = self.outputs.lock();
            for target in live_targets(&outputs) {
                if target.is_buffer_processing() {
                    self.deliver_to(target.as_ref(), working);
                }
            }
            working.clear();
            working.shrink_to(self.capacity);
        }

        self.passes.fetch_add(1, Ordering::SeqCst);
        self.drained.clear();
    }

    /// Block until every byte buffered before the call has been delivered
    pub(crate) fn flush_buffer(&self) {
        if Delivering::is_active(self.id) {
            return;
        }
        let _mode = self.mode.read();
        if !self.threaded.load(Ordering::SeqCst) {
            return;
        }

        let _gate = self.gate.lock();
        // a pass already running may have swapped before our bytes landed;
        // the one after it cannot have
        let target = self.passes.load(Ordering::SeqCst) + 2;
        while self.passes.load(Ordering::SeqCst) < target {
            self.drained.set();
            self.wake.clear();
            self.drained.wait_until_clear(false, Some(DRAIN_POLL));
        }
    }

    fn start_threaded(self: &Arc<Self>) -> bool {
        let _mode = self.mode.write();
        if self.threaded.load(Ordering::SeqCst) {
            return true;
        }

        let shared = Arc::clone(self);
        match Thread::spawn(format!("router-{}", self.id), move |ctx| run_mover(shared, ctx)) {
            Ok(thread) => {
                *self.mover.lock() = Some(thread);
                self.threaded.store(true, Ordering::SeqCst);
                tracing::debug!(input = self.id, "router input promoted to threaded mode");
                true
            }
            Err(err) => {
                report_error(format_args!("router input {} stays synchronous: {}", self.id, err));
                false
            }
        }
    }

    fn demote(&self) {
        let _mode = self.mode.write();
        if !self.threaded.swap(false, Ordering::SeqCst) {
            return;
        }

        let mover = self.mover.lock().take();
        if let Some(mover) = mover {
            mover.request_end();
            self.wake.clear();
            mover.join();
        }
        tracing::debug!(input = self.id, "router input demoted to synchronous mode");
    }

    fn link_output(self: &Arc<Self>, node: &NodeRef) -> bool {
        let id = node.id();
        if id == self.id {
            return false;
        }
        {
            let outputs = self.outputs.lock();
            let mut edges = outputs.borrow_mut();
            if edges.iter().any(|edge| edge.id == id) {
                return false;
            }
            edges.insert(0, Edge {
                id,
                target: Arc::downgrade(&node.target),
            });
        }
        node.target.feeds().link(self.id, Arc::downgrade(self));
        true
    }

    /// Drop the edge to `id` from this side only
    pub(crate) fn unlink_output(&self, id: NodeId) -> bool {
        let outputs = self.outputs.lock();
        let mut edges = outputs.borrow_mut();
        let before = edges.len();
        edges.retain(|edge| edge.id != id);
        edges.len() != before
    }

    fn unlink_all_outputs(&self) {
        let targets = {
            let outputs = self.outputs.lock();
            let targets = live_targets(&outputs);
            outputs.borrow_mut().clear();
            targets
        };
        for target in targets {
            target.feeds().unlink(self.id);
        }
    }

    fn has_output(&self, id: NodeId) -> bool {
        let outputs = self.outputs.lock();
        let found = outputs.borrow().iter().any(|edge| edge.id == id && edge.target.strong_count() > 0);
        found
    }

    fn output_count(&self) -> usize {
        let outputs = self.outputs.lock();
        live_targets(&outputs).len()
    }
}

impl Target for InputShared {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn deliver(&self, data: &[u8]) {
        self.output(data);
    }

    fn is_buffer_processing(&self) -> bool {
        true
    }

    fn feeds(&self) -> &Feeds {
        &self.feeds
    }
}

fn run_mover(shared: Arc<InputShared>, ctx: &ThreadContext) {
    let _delivering = Delivering::enter(shared.id);
    let mut working = Vec::with_capacity(shared.capacity);
    loop {
        shared.wake.wait_until_clear(true, Some(MOVER_POLL));
        shared.move_buffer(&mut working);
        if ctx.is_ending() {
            shared.move_buffer(&mut working);
            break;
        }
    }
}

/// Owning handle to a fan-out node.
///
/// Not `Clone`: the handle's owner decides when the node goes away. Other
/// inputs that feed this one only hold weak edges to it.
pub struct RouterInput {
    shared: Arc<InputShared>,
}

impl RouterInput {
    /// A new input with the default capacity, threaded if the process
    /// lifecycle is initialized
    pub fn new() -> Self {
        Self::with_capacity(default_capacity())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let input = Self::synchronous(capacity);
        if lifecycle::is_initialized() {
            input.start_threaded();
        }
        input
    }

    /// A new input that stays synchronous until `start_threaded`
    pub fn synchronous(capacity: usize) -> Self {
        Self {
            shared: Arc::new(InputShared::new(capacity)),
        }
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_threaded(&self) -> bool {
        self.shared.threaded.load(Ordering::SeqCst)
    }

    /// Send bytes to every attached output
    pub fn output(&self, data: &[u8]) {
        self.shared.output(data);
    }

    pub fn output_str(&self, text: &str) {
        self.shared.output(text.as_bytes());
    }

    pub fn output_fmt(&self, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(text) => self.output_str(text),
            None => self.output_str(&args.to_string()),
        }
    }

    /// Start the background mover. Returns false if it could not be spawned;
    /// the input then keeps delivering synchronously.
    pub fn start_threaded(&self) -> bool {
        self.shared.start_threaded()
    }

    /// Stop the background mover after it has delivered everything buffered
    pub fn demote(&self) {
        self.shared.demote();
    }

    /// Attach `target` at the front of the output list.
    ///
    /// Returns false if it is already attached or is this input itself.
    pub fn add_output(&self, target: &impl Attachable) -> bool {
        self.shared.link_output(&target.node_ref())
    }

    /// Detach `target`, delivering buffered bytes to it first when `flush`
    pub fn remove_output(&self, target: &impl Attachable, flush: bool) -> bool {
        if flush {
            self.shared.flush_buffer();
        }
        let node = target.node_ref();
        let removed = self.shared.unlink_output(node.id());
        node.target.feeds().unlink(self.shared.id);
        removed
    }

    pub fn remove_all_outputs(&self, flush: bool) {
        if flush {
            self.shared.flush_buffer();
        }
        self.shared.unlink_all_outputs();
    }

    pub fn has_output(&self, target: &impl Attachable) -> bool {
        self.shared.has_output(target.node_ref().id())
    }

    pub fn output_count(&self) -> usize {
        self.shared.output_count()
    }

    /// Number of inputs this one is attached to as an output
    pub fn feed_count(&self) -> usize {
        self.shared.feeds.len()
    }

    /// Deliver everything buffered in this input
    pub fn flush(&self) {
        self.shared.flush_buffer();
    }

    /// Flush every input upstream of this one, then this one
    pub fn flush_input_sources(&self) {
        let mut visited = vec![self.shared.id];
        flush_upstream(&self.shared.feeds, &mut visited);
        self.shared.flush_buffer();
    }
}

impl Default for RouterInput {
    fn default() -> Self {
        Self::new()
    }
}

impl Attachable for RouterInput {
    fn node_ref(&self) -> NodeRef {
        NodeRef {
            target: self.shared.clone(),
        }
    }
}

impl Drop for RouterInput {
    fn drop(&mut self) {
        self.shared.demote();
        self.shared.unlink_all_outputs();
        detach_from_feeds(self.shared.id, &self.shared.feeds);
    }
}

impl fmt::Debug for RouterInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterInput")
            .field("id", &self.id())
            .field("capacity", &self.capacity())
            .field("threaded", &self.is_threaded())
            .field("outputs", &self.output_count())
            .finish()
    }
}

impl io::Write for &RouterInput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        RouterInput::flush(*self);
        Ok(())
    }
}

impl fmt::Write for &RouterInput {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        self.output_str(text);
        Ok(())
    }
}

impl io::Write for RouterInput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        RouterInput::flush(self);
        Ok(())
    }
}
