use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiError;
use crate::error::LeaderHint;
use crate::store::StateMachineStore;
use crate::NodeId;
use crate::Raft;

// Representation of an application state. This struct can be shared around to share
// instances of raft, store and more.
pub struct App {
    pub id: NodeId,
    pub addr: String,
    pub raft: Raft,
    pub state_machine_store: Arc<StateMachineStore>,

    /// Upper bound on waiting for a client write to be applied.
    pub write_timeout: Duration,
}

impl App {
    /// The leader as currently known by this node, with its address when it is a known member.
    pub fn current_leader(&self) -> Option<LeaderHint> {
        let metrics = self.raft.metrics();
        let metrics = metrics.borrow();

        let id = metrics.current_leader?;
        let addr = metrics.membership_config.nodes().find(|(nid, _)| **nid == id).map(|(_, node)| node.addr.clone());
        Some(LeaderHint { id, addr })
    }

    /// Fail with [`ApiError::NotLeader`] unless this node is the leader.
    ///
    /// Leadership may still be lost before a proposal is committed; `client_write` then reports
    /// `ForwardToLeader`, which is mapped to the same error.
    pub fn ensure_leader(&self) -> Result<(), ApiError> {
        match self.current_leader() {
            Some(leader) if leader.id == self.id => Ok(()),
            leader => Err(ApiError::NotLeader { leader }),
        }
    }
}
