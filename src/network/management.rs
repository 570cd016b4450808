use std::collections::BTreeMap;
use std::collections::BTreeSet;

use actix_web::get;
use actix_web::post;
use actix_web::web::Data;
use actix_web::web::Json;
use actix_web::Responder;
use openraft::error::ClientWriteError;
use openraft::error::Infallible;
use openraft::error::RaftError;
use openraft::BasicNode;
use openraft::ChangeMembers;
use openraft::LogId;
use serde::Deserialize;
use serde::Serialize;

use crate::app::App;
use crate::error::ApiError;
use crate::typ;
use crate::NodeId;

/// Body of `POST /join`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub id: NodeId,
    pub address: String,
}

/// Body of `GET /status`: how this node sees itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node: NodeId,
    pub state: String,
    pub current_leader: Option<NodeId>,
    pub current_term: u64,
    pub last_applied: Option<LogId<NodeId>>,
}

// --- Cluster management

/// Add a node as **Learner**.
///
/// A Learner receives log replication from the leader but does not vote.
/// This should be done before adding a node as a member into the cluster
/// (by calling `change-membership`)
#[post("/add-learner")]
pub async fn add_learner(app: Data<App>, req: Json<(NodeId, String)>) -> actix_web::Result<impl Responder> {
    let node_id = req.0 .0;
    let node = BasicNode { addr: req.0 .1.clone() };
    let res = app.raft.add_learner(node_id, node, true).await;
    Ok(Json(res))
}

/// Changes specified learners to members, or remove members.
#[post("/change-membership")]
pub async fn change_membership(app: Data<App>, req: Json<BTreeSet<NodeId>>) -> actix_web::Result<impl Responder> {
    let res = app.raft.change_membership(req.0, false).await;
    Ok(Json(res))
}

/// Add a node to the cluster as a voter.
///
/// The node is first added as a learner, blocking until it has caught up with the log, and then
/// promoted to voter. Only the leader accepts this request.
#[post("/join")]
pub async fn join(app: Data<App>, req: Json<JoinRequest>) -> Result<Json<typ::ClientWriteResponse>, ApiError> {
    if app.ensure_leader().is_err() {
        return Err(ApiError::JoinNotLeader {
            leader: app.current_leader(),
        });
    }

    let JoinRequest { id, address } = req.0;
    if address.is_empty() {
        return Err(ApiError::Validation("missing required field: address".to_string()));
    }

    tracing::info!(id, %address, "join: add learner");
    app.raft.add_learner(id, BasicNode::new(&address), true).await.map_err(|e| membership_error(&app, e))?;

    tracing::info!(id, "join: promote to voter");
    let res = app
        .raft
        .change_membership(ChangeMembers::AddVoterIds(BTreeSet::from([id])), false)
        .await
        .map_err(|e| membership_error(&app, e))?;

    Ok(Json(res))
}

fn membership_error(app: &App, e: RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>) -> ApiError {
    match e {
        RaftError::APIError(ClientWriteError::ForwardToLeader(_)) => ApiError::JoinNotLeader {
            leader: app.current_leader(),
        },
        e => ApiError::Raft(e.to_string()),
    }
}

/// Initialize a single-node cluster if the `req` is empty vec.
/// Otherwise initialize a cluster with the `req` specified vec of node-id and node-address
#[post("/init")]
pub async fn init(app: Data<App>, req: Json<Vec<(NodeId, String)>>) -> actix_web::Result<impl Responder> {
    let mut nodes = BTreeMap::new();
    if req.0.is_empty() {
        nodes.insert(app.id, BasicNode { addr: app.addr.clone() });
    } else {
        for (id, addr) in req.0.into_iter() {
            nodes.insert(id, BasicNode { addr });
        }
    };
    let res = app.raft.initialize(nodes).await;
    Ok(Json(res))
}

/// Get the latest metrics of the cluster
#[get("/metrics")]
pub async fn metrics(app: Data<App>) -> actix_web::Result<impl Responder> {
    let m = app.raft.metrics().borrow().clone();

    let res: Result<typ::RaftMetrics, Infallible> = Ok(m);
    Ok(Json(res))
}

/// Report the role of this node in the cluster.
#[get("/status")]
pub async fn status(app: Data<App>) -> actix_web::Result<impl Responder> {
    let m = app.raft.metrics().borrow().clone();

    Ok(Json(NodeStatus {
        node: app.id,
        state: format!("{:?}", m.state),
        current_leader: m.current_leader,
        current_term: m.current_term,
        last_applied: m.last_applied,
    }))
}
