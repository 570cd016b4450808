use actix_web::get;
use actix_web::post;
use actix_web::web::Data;
use actix_web::web::Json;
use actix_web::web::Path;
use actix_web::web::Query;
use actix_web::HttpResponse;
use openraft::error::ClientWriteError;
use openraft::error::RaftError;
use serde::Deserialize;
use serde::Serialize;

use crate::app::App;
use crate::codec::Command;
use crate::codec::Request;
use crate::codec::StatusUpdate;
use crate::error::ApiError;
use crate::error::LeaderHint;
use crate::fsm::Applied;
use crate::fsm::ApplyError;
use crate::models::Filament;
use crate::models::FilamentType;
use crate::models::PrintJob;
use crate::models::PrintJobStatus;
use crate::models::Printer;

/// Body of `POST /printers`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct NewPrinter {
    pub id: String,
    pub company: String,
    pub model: String,
}

/// Body of `POST /filaments`. The remaining weight of a new spool is always its total weight.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewFilament {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub filament_type: FilamentType,

    #[serde(default)]
    pub color: String,

    #[serde(default)]
    pub total_weight_grams: i64,
}

/// Body of `POST /print-jobs`. A new job is always queued.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct NewPrintJob {
    pub id: String,
    pub printer_id: String,
    pub filament_id: String,
    pub file: String,
    pub print_weight_grams: i64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct StatusQuery {
    pub status: Option<String>,
}

/// Body of a successful status update.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusChanged {
    pub status: String,
    pub message: String,
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::Validation(format!("missing required field: {}", field)));
    }
    Ok(())
}

fn positive(field: &str, value: i64) -> Result<u64, ApiError> {
    if value <= 0 {
        return Err(ApiError::Validation(format!("{} must be positive, got {}", field, value)));
    }
    Ok(value as u64)
}

/// Accepts `running`, `done` and `canceled` in any case.
fn parse_requested_status(s: Option<&str>) -> Result<PrintJobStatus, ApiError> {
    let s = s.ok_or_else(|| ApiError::Validation("missing query parameter: status".to_string()))?;

    match s.to_ascii_lowercase().as_str() {
        "running" => Ok(PrintJobStatus::Running),
        "done" => Ok(PrintJobStatus::Done),
        "canceled" => Ok(PrintJobStatus::Canceled),
        _ => Err(ApiError::Validation(format!(
            "invalid status {:?}: expect one of running, done, canceled",
            s
        ))),
    }
}

/// Propose `cmd` to the cluster and wait for the local state machine to apply it.
async fn submit(app: &App, cmd: Command) -> Result<Applied, ApiError> {
    app.ensure_leader()?;

    let kind = cmd.kind();
    let write = app.raft.client_write(Request::from(cmd));

    let res = match tokio::time::timeout(app.write_timeout, write).await {
        Ok(res) => res,
        Err(_) => {
            tracing::error!(%kind, timeout = ?app.write_timeout, "client write timed out");
            return Err(ApiError::Timeout(app.write_timeout));
        }
    };

    let resp = res.map_err(|e| match e {
        RaftError::APIError(ClientWriteError::ForwardToLeader(fwd)) => ApiError::NotLeader {
            leader: fwd.leader_id.map(|id| LeaderHint {
                id,
                addr: fwd.leader_node.map(|n| n.addr),
            }),
        },
        e => ApiError::Raft(e.to_string()),
    })?;

    Ok(resp.data.result?)
}

// --- Printers

#[post("/printers")]
pub async fn create_printer(app: Data<App>, req: Json<NewPrinter>) -> Result<HttpResponse, ApiError> {
    let NewPrinter { id, company, model } = req.0;
    require("id", &id)?;
    require("company", &company)?;
    require("model", &model)?;

    let printer = Printer { id, company, model };
    let applied = submit(&app, Command::CreatePrinter(printer.clone())).await?;
    tracing::info!(id = %printer.id, ?applied, "printer created");

    Ok(HttpResponse::Created().json(printer))
}

#[get("/printers")]
pub async fn list_printers(app: Data<App>) -> Json<Vec<Printer>> {
    Json(app.state_machine_store.printers().await)
}

// --- Filaments

#[post("/filaments")]
pub async fn create_filament(app: Data<App>, req: Json<NewFilament>) -> Result<HttpResponse, ApiError> {
    let NewFilament {
        id,
        filament_type,
        color,
        total_weight_grams,
    } = req.0;
    require("id", &id)?;
    require("color", &color)?;
    let total = positive("total_weight_grams", total_weight_grams)?;

    let filament = Filament {
        id,
        filament_type,
        color,
        total_weight_grams: total,
        remaining_weight_grams: total,
    };
    submit(&app, Command::CreateFilament(filament.clone())).await?;
    tracing::info!(id = %filament.id, total, "filament created");

    Ok(HttpResponse::Created().json(filament))
}

#[get("/filaments")]
pub async fn list_filaments(app: Data<App>) -> Json<Vec<Filament>> {
    Json(app.state_machine_store.filaments().await)
}

#[get("/filaments/{id}")]
pub async fn get_filament(app: Data<App>, id: Path<String>) -> Result<Json<Filament>, ApiError> {
    let id = id.into_inner();
    match app.state_machine_store.filament(&id).await {
        Some(f) => Ok(Json(f)),
        None => Err(ApiError::NotFound(format!("filament not found: {}", id))),
    }
}

// --- Print jobs

#[post("/print-jobs")]
pub async fn create_print_job(app: Data<App>, req: Json<NewPrintJob>) -> Result<HttpResponse, ApiError> {
    let NewPrintJob {
        id,
        printer_id,
        filament_id,
        file,
        print_weight_grams,
    } = req.0;
    require("id", &id)?;
    require("printer_id", &printer_id)?;
    require("filament_id", &filament_id)?;
    let weight = positive("print_weight_grams", print_weight_grams)?;

    // Early rejection against local state. The state machine checks again at apply time.
    app.ensure_leader()?;
    let store = &app.state_machine_store;
    if store.printer(&printer_id).await.is_none() {
        return Err(ApiError::Validation(format!("printer not found: {}", printer_id)));
    }
    if store.filament(&filament_id).await.is_none() {
        return Err(ApiError::Validation(format!("filament not found: {}", filament_id)));
    }
    if store.print_job(&id).await.is_some() {
        return Err(ApiError::Rejected(ApplyError::JobExists { job_id: id }));
    }

    let job = PrintJob {
        id,
        printer_id,
        filament_id,
        file,
        print_weight_grams: weight,
        status: PrintJobStatus::Queued,
    };
    submit(&app, Command::CreatePrintJob(job.clone())).await?;
    tracing::info!(
        id = %job.id,
        printer_id = %job.printer_id,
        filament_id = %job.filament_id,
        "print job created"
    );

    Ok(HttpResponse::Created().json(job))
}

#[get("/print-jobs")]
pub async fn list_print_jobs(app: Data<App>) -> Json<Vec<PrintJob>> {
    Json(app.state_machine_store.print_jobs().await)
}

#[post("/print-jobs/{id}/status")]
pub async fn update_print_job_status(
    app: Data<App>,
    id: Path<String>,
    query: Query<StatusQuery>,
) -> Result<Json<StatusChanged>, ApiError> {
    let job_id = id.into_inner();
    let new_status = parse_requested_status(query.status.as_deref())?;

    let update = StatusUpdate {
        job_id: job_id.clone(),
        new_status,
    };
    submit(&app, Command::UpdateJobStatus(update)).await?;

    Ok(Json(StatusChanged {
        status: "success".to_string(),
        message: format!("print job {} is now {}", job_id, new_status),
    }))
}
