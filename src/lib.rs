#![allow(clippy::uninlined_format_args)]
#![deny(unused_qualifications)]

use std::io;
use std::io::Cursor;
use std::sync::Arc;

use actix_web::middleware;
use actix_web::middleware::Logger;
use actix_web::web;
use actix_web::web::Data;
use actix_web::HttpServer;
use openraft::BasicNode;

use crate::app::App;
use crate::codec::Request;
use crate::config::NodeConfig;
use crate::error::ApiError;
use crate::network::api;
use crate::network::management;
use crate::network::raft;
use crate::network::Network;
use crate::store::LogStore;
use crate::store::Response;
use crate::store::StateMachineStore;

pub mod app;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod fsm;
pub mod models;
pub mod network;
pub mod store;


pub type NodeId = u64;

openraft::declare_raft_types!(
    /// Declare the type configuration for the print farm state machine.
    pub TypeConfig:
        D = Request,
        R = Response,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime
);

pub type Raft = openraft::Raft<TypeConfig>;

pub mod typ {
    use openraft::BasicNode;

    use crate::NodeId;
    use crate::TypeConfig;

    pub type RaftError<E = openraft::error::Infallible> = openraft::error::RaftError<NodeId, E>;
    pub type RPCError<E = openraft::error::Infallible> = openraft::error::RPCError<NodeId, BasicNode, RaftError<E>>;

    pub type ClientWriteError = openraft::error::ClientWriteError<NodeId, BasicNode>;
    pub type InitializeError = openraft::error::InitializeError<NodeId, BasicNode>;

    pub type ClientWriteResponse = openraft::raft::ClientWriteResponse<TypeConfig>;
    pub type RaftMetrics = openraft::RaftMetrics<NodeId, BasicNode>;
}

/// Start a node serving the raft RPC, the cluster management API and the print farm API on
/// `http_addr`.
///
/// The future resolves when the HTTP server stops.
pub async fn start_raft_node(node_id: NodeId, http_addr: String, node_config: NodeConfig) -> io::Result<()> {
    // Create a configuration for the raft instance.
    let config = Arc::new(node_config.raft_config().map_err(io::Error::other)?);

    // Create a instance of where the Raft data will be stored.
    let log_store = LogStore::default();
    let state_machine_store = Arc::new(StateMachineStore::default());

    // Create the network layer that will connect and communicate the raft instances and
    // will be used in conjunction with the store created above.
    let network = Network {};

    // Create a local raft instance.
    let raft = openraft::Raft::new(
        node_id,
        config,
        network,
        log_store,
        state_machine_store.clone(),
    )
    .await
    .map_err(io::Error::other)?;

    tracing::info!(node_id, %http_addr, "raft node created");

    // Create an application that will store all the instances created above, this will
    // later be used on the actix-web services.
    let app_data = Data::new(App {
        id: node_id,
        addr: http_addr.clone(),
        raft,
        state_machine_store,
        write_timeout: node_config.write_timeout,
    });

    // Start the actix-web server.
    let server = HttpServer::new(move || {
        actix_web::App::new()
            .wrap(Logger::default())
            .wrap(Logger::new("%a %{User-Agent}i"))
            .wrap(middleware::Compress::default())
            .app_data(app_data.clone())
            .app_data(
                web::JsonConfig::default().error_handler(|err, _req| ApiError::InvalidJson(err.to_string()).into()),
            )
            .app_data(
                web::QueryConfig::default().error_handler(|err, _req| ApiError::Validation(err.to_string()).into()),
            )
            // raft internal RPC
            .service(raft::append)
            .service(raft::snapshot)
            .service(raft::vote)
            // admin API
            .service(management::init)
            .service(management::add_learner)
            .service(management::change_membership)
            .service(management::join)
            .service(management::metrics)
            .service(management::status)
            // application API
            .service(api::create_printer)
            .service(api::list_printers)
            .service(api::create_filament)
            .service(api::list_filaments)
            .service(api::get_filament)
            .service(api::create_print_job)
            .service(api::list_print_jobs)
            .service(api::update_print_job_status)
    });

    let x = server.bind(http_addr)?;

    x.run().await
}
