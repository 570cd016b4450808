use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use openraft::error::NetworkError;
use openraft::error::RemoteError;
use reqwest::Method;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use crate::error::ErrorBody;
use crate::models::Filament;
use crate::models::PrintJob;
use crate::models::PrintJobStatus;
use crate::models::Printer;
use crate::network::api::NewFilament;
use crate::network::api::NewPrintJob;
use crate::network::api::NewPrinter;
use crate::network::api::StatusChanged;
use crate::network::management::JoinRequest;
use crate::network::management::NodeStatus;
use crate::typ;
use crate::NodeId;

const RPC_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Failure of a call to the print farm API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("server responded {status}: {}", .body.message)]
    Api { status: u16, body: ErrorBody },
}

impl ClientError {
    /// The HTTP status code of an error response, if the server responded.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The `error` field of an error response, such as `insufficient-filament`.
    pub fn kind(&self) -> Option<&str> {
        match self {
            ClientError::Api { body, .. } => Some(&body.error),
            _ => None,
        }
    }
}

pub struct Raft3dClient {
    /// The leader node to send request to.
    ///
    /// All writes must reach the leader; a node that is not the leader replies with a hint of
    /// where the leader is, which is followed.
    pub leader: Arc<Mutex<(NodeId, String)>>,

    pub inner: reqwest::Client,
}

impl Raft3dClient {
    /// Create a client that first contacts node `leader_id` at `leader_addr`.
    pub fn new(leader_id: NodeId, leader_addr: String) -> Self {
        Self {
            leader: Arc::new(Mutex::new((leader_id, leader_addr))),
            inner: reqwest::Client::new(),
        }
    }

    fn target(&self) -> MutexGuard<'_, (NodeId, String)> {
        self.leader.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Application API

    pub async fn create_printer(&self, req: &NewPrinter) -> Result<Printer, ClientError> {
        self.send_to_leader(Method::POST, "printers", Some(req)).await
    }

    pub async fn list_printers(&self) -> Result<Vec<Printer>, ClientError> {
        self.send_to_leader(Method::GET, "printers", None::<&()>).await
    }

    pub async fn create_filament(&self, req: &NewFilament) -> Result<Filament, ClientError> {
        self.send_to_leader(Method::POST, "filaments", Some(req)).await
    }

    pub async fn list_filaments(&self) -> Result<Vec<Filament>, ClientError> {
        self.send_to_leader(Method::GET, "filaments", None::<&()>).await
    }

    pub async fn get_filament(&self, id: &str) -> Result<Filament, ClientError> {
        self.send_to_leader(Method::GET, &format!("filaments/{}", id), None::<&()>).await
    }

    pub async fn create_print_job(&self, req: &NewPrintJob) -> Result<PrintJob, ClientError> {
        self.send_to_leader(Method::POST, "print-jobs", Some(req)).await
    }

    pub async fn list_print_jobs(&self) -> Result<Vec<PrintJob>, ClientError> {
        self.send_to_leader(Method::GET, "print-jobs", None::<&()>).await
    }

    /// Move a print job to `status`. Only `Running`, `Done` and `Canceled` can be requested.
    pub async fn update_job_status(&self, job_id: &str, status: PrintJobStatus) -> Result<StatusChanged, ClientError> {
        let uri = format!("print-jobs/{}/status?status={}", job_id, status.to_string().to_lowercase());
        self.send_to_leader(Method::POST, &uri, None::<&()>).await
    }

    // --- Cluster management API

    /// Add a node to the cluster as a voter, via `/join` on the leader.
    pub async fn join(&self, id: NodeId, address: String) -> Result<typ::ClientWriteResponse, ClientError> {
        self.send_to_leader(Method::POST, "join", Some(&JoinRequest { id, address })).await
    }

    /// How the target node sees itself in the cluster.
    pub async fn status(&self) -> Result<NodeStatus, ClientError> {
        self.send_to_leader(Method::GET, "status", None::<&()>).await
    }

    /// Initialize a cluster of only the node that receives this request.
    ///
    /// This is the first step to initialize a cluster.
    /// With a initialized cluster, new node can be added with [`Self::add_learner`],
    /// and then made a member with [`Self::change_membership`], or both at once with
    /// [`Self::join`].
    pub async fn init(&self) -> Result<(), typ::RPCError<typ::InitializeError>> {
        self.do_send_rpc_to_leader("init", Some(&Vec::<(NodeId, String)>::new())).await
    }

    /// Add a node as learner.
    pub async fn add_learner(
        &self,
        req: (NodeId, String),
    ) -> Result<typ::ClientWriteResponse, typ::RPCError<typ::ClientWriteError>> {
        self.do_send_rpc_to_leader("add-learner", Some(&req)).await
    }

    /// Change membership to the specified set of nodes.
    ///
    /// All nodes in `req` have to be already added as learner with [`Self::add_learner`].
    pub async fn change_membership(
        &self,
        req: &BTreeSet<NodeId>,
    ) -> Result<typ::ClientWriteResponse, typ::RPCError<typ::ClientWriteError>> {
        self.do_send_rpc_to_leader("change-membership", Some(req)).await
    }

    /// Get the metrics about the cluster.
    ///
    /// Metrics contains various information about the cluster, such as current leader,
    /// membership config, replication status etc.
    pub async fn metrics(&self) -> Result<typ::RaftMetrics, typ::RPCError> {
        self.do_send_rpc_to_leader("metrics", None::<&()>).await
    }

    // --- Internal methods

    /// Send an application request, following leader hints at most 3 times.
    ///
    /// `req`, if any, is sent as the JSON body. A 2xx reply is decoded as `Resp`, any other reply
    /// as an [`ErrorBody`].
    async fn send_to_leader<Req, Resp>(&self, method: Method, uri: &str, req: Option<&Req>) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut n_retry = 3;

        loop {
            let url = format!("http://{}/{}", self.target().1, uri);

            let builder = self.inner.request(method.clone(), url.clone());
            let builder = match req {
                Some(r) => builder.json(r),
                None => builder,
            };

            tracing::debug!(">>> client send request to {}", url);
            let resp = match timeout(RPC_TIMEOUT, builder.send()).await {
                Ok(x) => x?,
                Err(_) => {
                    tracing::error!("timeout to url: {}", url);
                    return Err(ClientError::Timeout { url });
                }
            };

            let status = resp.status();
            if status.is_success() {
                return Ok(resp.json().await?);
            }

            let body: ErrorBody = resp.json().await?;
            tracing::debug!("<<< client recv error from {}: {} {:?}", url, status, body);

            if status == StatusCode::SERVICE_UNAVAILABLE {
                if let Some(leader) = &body.leader {
                    if let Some(addr) = &leader.addr {
                        {
                            let mut t = self.target();
                            *t = (leader.id, addr.clone());
                        }

                        n_retry -= 1;
                        if n_retry > 0 {
                            continue;
                        }
                    }
                }
            }

            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
    }

    /// Send a management RPC to the current target node.
    ///
    /// It sends out a POST request if `req` is Some. Otherwise a GET request.
    /// The remote endpoint must respond a reply in form of `Result<T, E>`.
    /// An `Err` happened on remote will be wrapped in an
    /// [`openraft::error::RPCError::RemoteError`].
    async fn do_send_rpc_to_leader<Req, Resp, Err>(
        &self,
        uri: &str,
        req: Option<&Req>,
    ) -> Result<Resp, typ::RPCError<Err>>
    where
        Req: Serialize + 'static,
        Resp: Serialize + DeserializeOwned,
        Err: std::error::Error + Serialize + DeserializeOwned,
    {
        let (leader_id, url) = {
            let t = self.target();
            (t.0, format!("http://{}/{}", t.1, uri))
        };

        let fu = if let Some(r) = req {
            tracing::debug!(">>> client send request to {}", url);
            self.inner.post(url.clone()).json(r)
        } else {
            tracing::debug!(">>> client send request to {}", url);
            self.inner.get(url.clone())
        }
        .send();

        let res = timeout(RPC_TIMEOUT, fu).await;
        let resp = match res {
            Ok(x) => x.map_err(|e| typ::RPCError::Network(NetworkError::new(&e)))?,
            Err(timeout_err) => {
                tracing::error!("timeout {} to url: {}", timeout_err, url);
                return Err(typ::RPCError::Network(NetworkError::new(&timeout_err)));
            }
        };

        let res: Result<Resp, typ::RaftError<Err>> =
            resp.json().await.map_err(|e| typ::RPCError::Network(NetworkError::new(&e)))?;

        res.map_err(|e| typ::RPCError::RemoteError(RemoteError::new(leader_id, e)))
    }
}
