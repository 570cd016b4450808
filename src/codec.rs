//! Encoding of state machine commands into replicated log payloads.
//!
//! A payload is one discriminant byte followed by the JSON body of the command:
//!
//! ```text
//! 0x01 create-printer      {"id":..,"company":..,"model":..}
//! 0x02 create-filament     {"id":..,"type":..,"color":..,"total_weight_grams":..,"remaining_weight_grams":..}
//! 0x03 create-print-job    {"id":..,"printer_id":..,"filament_id":..,"file":..,"print_weight_grams":..,"status":..}
//! 0x04 update-job-status   {"job_id":..,"new_status":..}
//! ```
//!
//! Decoding never panics: anything that is not a well formed payload becomes a [`DecodeError`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::models::Filament;
use crate::models::PrintJob;
use crate::models::PrintJobStatus;
use crate::models::Printer;

const TAG_CREATE_PRINTER: u8 = 0x01;
const TAG_CREATE_FILAMENT: u8 = 0x02;
const TAG_CREATE_PRINT_JOB: u8 = 0x03;
const TAG_UPDATE_JOB_STATUS: u8 = 0x04;

/// A mutation of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreatePrinter(Printer),
    CreateFilament(Filament),
    CreatePrintJob(PrintJob),
    UpdateJobStatus(StatusUpdate),
}

/// Request to move a job to `new_status`.
///
/// It deliberately carries no other job field: the transition is evaluated against the job as
/// stored in the state machine at apply time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub job_id: String,
    pub new_status: PrintJobStatus,
}

/// The kind of a [`Command`], as identified by its discriminant byte.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    CreatePrinter,
    CreateFilament,
    CreatePrintJob,
    UpdateJobStatus,
}

impl CommandKind {
    fn tag(&self) -> u8 {
        match self {
            CommandKind::CreatePrinter => TAG_CREATE_PRINTER,
            CommandKind::CreateFilament => TAG_CREATE_FILAMENT,
            CommandKind::CreatePrintJob => TAG_CREATE_PRINT_JOB,
            CommandKind::UpdateJobStatus => TAG_UPDATE_JOB_STATUS,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_CREATE_PRINTER => Some(CommandKind::CreatePrinter),
            TAG_CREATE_FILAMENT => Some(CommandKind::CreateFilament),
            TAG_CREATE_PRINT_JOB => Some(CommandKind::CreatePrintJob),
            TAG_UPDATE_JOB_STATUS => Some(CommandKind::UpdateJobStatus),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandKind::CreatePrinter => "create-printer",
            CommandKind::CreateFilament => "create-filament",
            CommandKind::CreatePrintJob => "create-print-job",
            CommandKind::UpdateJobStatus => "update-job-status",
        };
        write!(f, "{}", s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty command payload")]
    Empty,

    #[error("unknown command tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("malformed {command} payload: {reason}")]
    Malformed { command: CommandKind, reason: String },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::CreatePrinter(_) => CommandKind::CreatePrinter,
            Command::CreateFilament(_) => CommandKind::CreateFilament,
            Command::CreatePrintJob(_) => CommandKind::CreatePrintJob,
            Command::UpdateJobStatus(_) => CommandKind::UpdateJobStatus,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.kind().tag()];

        // Serializing these plain structs into a Vec can not fail.
        let res = match self {
            Command::CreatePrinter(p) => serde_json::to_writer(&mut buf, p),
            Command::CreateFilament(f) => serde_json::to_writer(&mut buf, f),
            Command::CreatePrintJob(pj) => serde_json::to_writer(&mut buf, pj),
            Command::UpdateJobStatus(u) => serde_json::to_writer(&mut buf, u),
        };
        debug_assert!(res.is_ok(), "serialize command: {:?}", res);

        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Command, DecodeError> {
        let (tag, body) = payload.split_first().ok_or(DecodeError::Empty)?;
        let kind = CommandKind::from_tag(*tag).ok_or(DecodeError::UnknownTag(*tag))?;

        let cmd = match kind {
            CommandKind::CreatePrinter => Command::CreatePrinter(decode_body(kind, body)?),
            CommandKind::CreateFilament => Command::CreateFilament(decode_body(kind, body)?),
            CommandKind::CreatePrintJob => Command::CreatePrintJob(decode_body(kind, body)?),
            CommandKind::UpdateJobStatus => Command::UpdateJobStatus(decode_body(kind, body)?),
        };
        Ok(cmd)
    }
}

fn decode_body<T: DeserializeOwned>(command: CommandKind, body: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(body).map_err(|e| DecodeError::Malformed {
        command,
        reason: e.to_string(),
    })
}

/// The application data stored in a raft log entry: an encoded [`Command`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Request(pub Vec<u8>);

impl Request {
    pub fn command(&self) -> Result<Command, DecodeError> {
        Command::decode(&self.0)
    }
}

impl From<&Command> for Request {
    fn from(cmd: &Command) -> Self {
        Request(cmd.encode())
    }
}

impl From<Command> for Request {
    fn from(cmd: Command) -> Self {
        Request(cmd.encode())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.first().copied().and_then(CommandKind::from_tag) {
            Some(kind) => write!(f, "{}({} bytes)", kind, self.0.len() - 1),
            None => write!(f, "undecodable({} bytes)", self.0.len()),
        }
    }
}
