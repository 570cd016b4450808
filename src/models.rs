//! Records tracked by the cluster: printers, filament spools and print jobs.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Printer {
    pub id: String,
    pub company: String,
    pub model: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilamentType {
    PLA,
    PETG,
    ABS,
    TPU,
}

/// A spool of filament.
///
/// `remaining_weight_grams` never exceeds `total_weight_grams` and only decreases when a job
/// printing from this spool reaches [`PrintJobStatus::Done`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Filament {
    pub id: String,

    #[serde(rename = "type")]
    pub filament_type: FilamentType,

    pub color: String,
    pub total_weight_grams: u64,
    pub remaining_weight_grams: u64,
}

/// Lifecycle of a print job.
///
/// ```text
/// Queued --> Running --> Done
///    |          |
///    +----------+-----> Canceled
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrintJobStatus {
    #[default]
    Queued,
    Running,
    Done,
    Canceled,
}

impl PrintJobStatus {
    /// `Done` and `Canceled` have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        match self {
            PrintJobStatus::Queued | PrintJobStatus::Running => false,
            PrintJobStatus::Done | PrintJobStatus::Canceled => true,
        }
    }
}

impl fmt::Display for PrintJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrintJobStatus::Queued => "Queued",
            PrintJobStatus::Running => "Running",
            PrintJobStatus::Done => "Done",
            PrintJobStatus::Canceled => "Canceled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub id: String,
    pub printer_id: String,
    pub filament_id: String,

    /// Name of the sliced model file to print.
    #[serde(default)]
    pub file: String,

    pub print_weight_grams: u64,

    /// Absent in a request means [`PrintJobStatus::Queued`].
    #[serde(default)]
    pub status: PrintJobStatus,
}
