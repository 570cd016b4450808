//! Errors returned by the HTTP API.
//!
//! Two kinds of failure are kept apart. A failure to get a command through the replicated log
//! (not the leader, timeout, raft failure) is reported as a 5xx: the effect of the command is
//! then unknown. A command that was committed but rejected by the state machine is a 4xx.

use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use serde::Deserialize;
use serde::Serialize;

use crate::fsm::ApplyError;
use crate::NodeId;

/// The leader known by the node that rejected a request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LeaderHint {
    pub id: NodeId,
    pub addr: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("this node is not the leader; leader: {leader:?}")]
    NotLeader { leader: Option<LeaderHint> },

    #[error("only the leader can process join requests; leader: {leader:?}")]
    JoinNotLeader { leader: Option<LeaderHint> },

    #[error("write was not applied within {0:?}; its outcome is unknown")]
    Timeout(Duration),

    #[error("raft error: {0}")]
    Raft(String),

    #[error(transparent)]
    Rejected(#[from] ApplyError),
}

/// JSON body of every error response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<LeaderHint>,
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidJson(_) => "invalid-json",
            ApiError::Validation(_) => "validation",
            ApiError::NotFound(_) => "not-found",
            ApiError::NotLeader { .. } => "not-leader",
            ApiError::JoinNotLeader { .. } => "not-leader",
            ApiError::Timeout(_) => "timeout",
            ApiError::Raft(_) => "raft",
            ApiError::Rejected(e) => match e {
                ApplyError::Decode(_) => "decode",
                ApplyError::PrinterNotFound { .. } => "printer-not-found",
                ApplyError::FilamentNotFound { .. } => "filament-not-found",
                ApplyError::JobNotFound { .. } => "job-not-found",
                ApplyError::JobExists { .. } => "job-exists",
                ApplyError::InvalidTransition { .. } => "invalid-transition",
                ApplyError::InsufficientFilament { .. } => "insufficient-filament",
                ApplyError::InvalidStatus { .. } => "invalid-status",
            },
        }
    }

    fn leader(&self) -> Option<LeaderHint> {
        match self {
            ApiError::NotLeader { leader } | ApiError::JoinNotLeader { leader } => leader.clone(),
            _ => None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotLeader { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::JoinNotLeader { .. } => StatusCode::FORBIDDEN,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Raft(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Rejected(ApplyError::JobNotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Rejected(ApplyError::JobExists { .. }) => StatusCode::CONFLICT,
            ApiError::Rejected(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
            leader: self.leader(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrintJobStatus;

    #[test]
    fn test_status_codes() {
        let rejected = ApiError::from(ApplyError::InvalidTransition {
            job_id: "J1".to_string(),
            from: PrintJobStatus::Queued,
            to: PrintJobStatus::Done,
        });
        assert_eq!(StatusCode::BAD_REQUEST, rejected.status_code());
        assert_eq!("invalid-transition", rejected.kind());

        let not_found = ApiError::from(ApplyError::JobNotFound {
            job_id: "J1".to_string(),
        });
        assert_eq!(StatusCode::NOT_FOUND, not_found.status_code());

        let exists = ApiError::from(ApplyError::JobExists {
            job_id: "J1".to_string(),
        });
        assert_eq!(StatusCode::CONFLICT, exists.status_code());
        assert_eq!("job-exists", exists.kind());

        let not_leader = ApiError::NotLeader {
            leader: Some(LeaderHint {
                id: 1,
                addr: Some("127.0.0.1:21001".to_string()),
            }),
        };
        assert_eq!(StatusCode::SERVICE_UNAVAILABLE, not_leader.status_code());
        assert_eq!(Some(1), not_leader.leader().map(|l| l.id));

        assert_eq!(
            StatusCode::GATEWAY_TIMEOUT,
            ApiError::Timeout(Duration::from_secs(5)).status_code()
        );
    }
}
