//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory address space, session, and connector for tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! In-memory stand-ins for a server. Sessions record every browse, write, and
//! disconnect so tests can assert on the exact protocol traffic.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::session::{ChildRef, NodeId, SessionConnector, SessionError, UaSession};

const MOCK_NAMESPACE: u16 = 1;
const FIRST_MOCK_ID: u32 = 80_000;

/// A tree of named nodes keyed by parent.
#[derive(Debug, Clone)]
pub struct MockAddressSpace {
    children: HashMap<NodeId, Vec<ChildRef>>,
    next_id: u32,
}

impl Default for MockAddressSpace {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            next_id: FIRST_MOCK_ID,
        }
    }
}

impl MockAddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root, then one folder per path segment, then the variables under the last folder.
    pub fn machine(root: &NodeId, path: &[&str], variables: &[&str]) -> Self {
        let mut space = Self::new();
        let mut parent = root.clone();
        for segment in path {
            parent = space.add_child(&parent, segment);
        }
        for variable in variables {
            space.add_child(&parent, variable);
        }
        space
    }

    /// Add a child with a fresh numeric id and return that id.
    pub fn add_child(&mut self, parent: &NodeId, browse_name: &str) -> NodeId {
        let id = NodeId::new(MOCK_NAMESPACE, self.next_id);
        self.next_id += 1;
        self.children
            .entry(parent.clone())
            .or_default()
            .push(ChildRef::new(browse_name, id.clone()));
        id
    }

    pub fn children_of(&self, parent: &NodeId) -> Vec<ChildRef> {
        self.children.get(parent).cloned().unwrap_or_default()
    }

    pub fn child_named(&self, parent: &NodeId, browse_name: &str) -> Option<NodeId> {
        self.children
            .get(parent)?
            .iter()
            .find(|child| child.browse_name == browse_name)
            .map(|child| child.node_id.clone())
    }
}

/// Session over a [`MockAddressSpace`].
#[derive(Debug)]
pub struct MockSession {
    space: Arc<MockAddressSpace>,
    rejected: Mutex<HashSet<NodeId>>,
    writes: Mutex<Vec<(NodeId, f64)>>,
    browse_calls: AtomicUsize,
    disconnects: AtomicUsize,
    alive: AtomicBool,
    stall_browses: AtomicBool,
    stall_writes: AtomicBool,
    stalled: AtomicUsize,
}

impl MockSession {
    pub fn new(space: Arc<MockAddressSpace>) -> Self {
        Self {
            space,
            rejected: Mutex::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
            browse_calls: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            stall_browses: AtomicBool::new(false),
            stall_writes: AtomicBool::new(false),
            stalled: AtomicUsize::new(0),
        }
    }

    /// Browses never complete from now on.
    pub fn stall_browses(&self) {
        self.stall_browses.store(true, Ordering::SeqCst);
    }

    /// Writes never complete from now on.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Calls currently or previously parked by a stall.
    pub fn stalled_calls(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }

    async fn park(&self) {
        self.stalled.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
    }

    pub fn reject_writes_to(&self, node: NodeId) {
        self.rejected.lock().insert(node);
    }

    /// Drop the session as the transport would, without a client disconnect.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(NodeId, f64)> {
        self.writes.lock().clone()
    }

    pub fn browse_calls(&self) -> usize {
        self.browse_calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UaSession for MockSession {
    async fn browse_children(&self, node: &NodeId) -> Result<Vec<ChildRef>, SessionError> {
        self.browse_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_alive() {
            return Err(SessionError::Closed);
        }
        if self.stall_browses.load(Ordering::SeqCst) {
            self.park().await;
        }
        Ok(self.space.children_of(node))
    }

    async fn write_double(&self, node: &NodeId, value: f64) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::Closed);
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            self.park().await;
        }
        if self.rejected.lock().contains(node) {
            return Err(SessionError::Write("BadNotWritable".to_owned()));
        }
        self.writes.lock().push((node.clone(), value));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Connector handing out a fresh [`MockSession`] per successful attempt.
#[derive(Debug)]
pub struct MockConnector {
    endpoint: String,
    space: Arc<MockAddressSpace>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    stall_browses: bool,
    stall_writes: bool,
}

impl MockConnector {
    pub fn new(space: MockAddressSpace) -> Self {
        Self {
            endpoint: "opc.tcp://mock:4840".to_owned(),
            space: Arc::new(space),
            failures_left: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
            stall_browses: false,
            stall_writes: false,
        }
    }

    /// Sessions handed out from now on hang in every browse.
    pub fn stalling_browses(mut self) -> Self {
        self.stall_browses = true;
        self
    }

    /// Sessions handed out from now on hang in every write.
    pub fn stalling_writes(mut self) -> Self {
        self.stall_writes = true;
        self
    }

    /// Fail the next `count` connects. `usize::MAX` never connects.
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn total_disconnects(&self) -> usize {
        self.sessions.lock().iter().map(|s| s.disconnects()).sum()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn UaSession>, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err(SessionError::Connect("connection refused".to_owned()));
        }
        let session = Arc::new(MockSession::new(self.space.clone()));
        if self.stall_browses {
            session.stall_browses();
        }
        if self.stall_writes {
            session.stall_writes();
        }
        self.sessions.lock().push(session.clone());
        let session: Arc<dyn UaSession> = session;
        Ok(session)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
