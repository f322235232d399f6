//!
//! Router Outputs and Graph Edges
//!
//! A `RouterOutput` is anything that accepts bytes. To take part in the
//! graph it is wrapped in an `OutputNode`, which gives it a node id and a
//! feed list: the inputs currently delivering to it.
//!
//! ## Edges
//!
//! Every edge is recorded on both ends by node id:
//! - the input keeps `(target id, Weak<target>)` in its output list
//! - the target keeps `(input id, Weak<input>)` in its feed list
//!
//! Neither side owns the other. When a node goes away it walks its own
//! lists and removes every edge that mentions its id from the other side.
//! An edge whose far end has already been dropped fails to upgrade and is
//! skipped (and pruned) on the next pass, so delivery to a destroyed
//! output is impossible.
//!
//! The two ends of an edge are updated one after the other, never under
//! both locks at once, which keeps attach and teardown free of lock-order
//! inversions.
//!

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tessel_sync::SpinLock;

use crate::input::InputShared;

pub type NodeId = u64;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A consumer of routed bytes.
///
/// `output` may be called concurrently by several feeding inputs (their
/// movers and producers), so implementations that touch shared state must
/// serialize internally.
pub trait RouterOutput: Send + Sync + 'static {
    fn output(&self, data: &[u8]);

    /// False asks every feeding input to deliver synchronously on the
    /// producer's thread instead of through its background mover.
    fn is_buffer_processing(&self) -> bool {
        true
    }
}

impl<O: RouterOutput + ?Sized> RouterOutput for Arc<O> {
    fn output(&self, data: &[u8]) {
        (**self).output(data)
    }

    fn is_buffer_processing(&self) -> bool {
        (**self).is_buffer_processing()
    }
}

impl RouterOutput for Box<dyn RouterOutput> {
    fn output(&self, data: &[u8]) {
        (**self).output(data)
    }

    fn is_buffer_processing(&self) -> bool {
        (**self).is_buffer_processing()
    }
}

/// A graph node that inputs can deliver to
pub(crate) trait Target: Send + Sync {
    fn node_id(&self) -> NodeId;
    fn deliver(&self, data: &[u8]);
    fn is_buffer_processing(&self) -> bool;
    fn feeds(&self) -> &Feeds;
}

/// Inputs feeding one node
#[derive(Default)]
pub(crate) struct Feeds {
    list: SpinLock<Vec<(NodeId, Weak<InputShared>)>>,
}

impl Feeds {
    pub(crate) fn link(&self, id: NodeId, input: Weak<InputShared>) {
        let mut list = self.list.lock();
        if !list.iter().any(|(existing, _)| *existing == id) {
            list.push((id, input));
        }
    }

    pub(crate) fn unlink(&self, id: NodeId) {
        self.list.lock().retain(|(existing, _)| *existing != id);
    }

    /// Live feeding inputs; dead entries are pruned
    pub(crate) fn snapshot(&self) -> Vec<Arc<InputShared>> {
        let mut list = self.list.lock();
        list.retain(|(_, input)| input.strong_count() > 0);
        list.iter().filter_map(|(_, input)| input.upgrade()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }
}

/// Flush every input upstream of `feeds`, farthest first.
///
/// `visited` guards against cycles in a misbuilt graph.
pub(crate) fn flush_upstream(feeds: &Feeds, visited: &mut Vec<NodeId>) {
    for input in feeds.snapshot() {
        if visited.contains(&input.id()) {
            continue;
        }
        visited.push(input.id());
        flush_upstream(input.feeds(), visited);
        input.flush_buffer();
    }
}

/// Remove every edge into the node `id` from the inputs that feed it
pub(crate) fn detach_from_feeds(id: NodeId, feeds: &Feeds) {
    for input in feeds.snapshot() {
        input.unlink_output(id);
    }
    feeds.list.lock().clear();
}

/// Opaque reference used to attach a node to an input
pub struct NodeRef {
    pub(crate) target: Arc<dyn Target>,
}

impl NodeRef {
    pub fn id(&self) -> NodeId {
        self.target.node_id()
    }
}

/// Anything that can be attached as an output of a `RouterInput`
pub trait Attachable {
    fn node_ref(&self) -> NodeRef;
}

struct LeafShared<O: RouterOutput> {
    id: NodeId,
    output: O,
    feeds: Feeds,
}

impl<O: RouterOutput> Target for LeafShared<O> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn deliver(&self, data: &[u8]) {
        self.output.output(data);
    }

    fn is_buffer_processing(&self) -> bool {
        self.output.is_buffer_processing()
    }

    fn feeds(&self) -> &Feeds {
        &self.feeds
    }
}

impl<O: RouterOutput> Drop for LeafShared<O> {
    fn drop(&mut self) {
        detach_from_feeds(self.id, &self.feeds);
    }
}

/// Owning graph handle for a `RouterOutput`.
///
/// Dropping the node detaches it from every input feeding it; those inputs
/// silently skip it from then on.
pub struct OutputNode<O: RouterOutput> {
    shared: Arc<LeafShared<O>>,
}

impl<O: RouterOutput> OutputNode<O> {
    pub fn new(output: O) -> Self {
        Self {
            shared: Arc::new(LeafShared {
                id: next_node_id(),
                output,
                feeds: Feeds::default(),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn get(&self) -> &O {
        &self.shared.output
    }

    /// Number of inputs currently feeding this node
    pub fn feed_count(&self) -> usize {
        self.shared.feeds.len()
    }

    /// Push everything buffered upstream of this node through to it
    pub fn flush_input_sources(&self) {
        flush_upstream(&self.shared.feeds, &mut Vec::new());
    }
}

impl<O: RouterOutput> Attachable for OutputNode<O> {
    fn node_ref(&self) -> NodeRef {
        NodeRef {
            target: self.shared.clone(),
        }
    }
}

impl<O: RouterOutput> std::ops::Deref for OutputNode<O> {
    type Target = O;

    fn deref(&self) -> &O {
        &self.shared.output
    }
}
