//! The deterministic part of the state machine.
//!
//! [`PrintFarm`] owns the printer, filament and print job tables and applies one [`Command`] at a
//! time. Given the same sequence of commands every replica ends up with identical tables, so
//! nothing here may depend on time, randomness or iteration order of a hash map.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::codec::Command;
use crate::codec::DecodeError;
use crate::codec::StatusUpdate;
use crate::models::Filament;
use crate::models::PrintJob;
use crate::models::PrintJobStatus;
use crate::models::Printer;

/// Result of successfully applying a command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The log entry carried no application command, e.g. a blank or membership entry.
    Nothing,
    Printer(Printer),
    Filament(Filament),
    PrintJob(PrintJob),
    JobStatus { job_id: String, status: PrintJobStatus },
}

/// Reason a committed command was rejected by the state machine.
///
/// A rejected command leaves every table unchanged.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("can not decode command: {0}")]
    Decode(#[from] DecodeError),

    #[error("printer {printer_id} not found")]
    PrinterNotFound { printer_id: String },

    #[error("filament {filament_id} not found")]
    FilamentNotFound { filament_id: String },

    #[error("job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("job {job_id} already exists")]
    JobExists { job_id: String },

    #[error("invalid transition of job {job_id} from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: PrintJobStatus,
        to: PrintJobStatus,
    },

    #[error("insufficient filament {filament_id} for job {job_id}: need {required}g, {remaining}g left")]
    InsufficientFilament {
        job_id: String,
        filament_id: String,
        required: u64,
        remaining: u64,
    },

    #[error("invalid target status {status} for job {job_id}")]
    InvalidStatus { job_id: String, status: PrintJobStatus },
}

/// Why a status change is refused, independent of which job it is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// The edge `from -> to` is not in the transition graph.
    Invalid,
    /// `to` is not a state a job can be moved to.
    InvalidStatus,
    /// Moving to `Done` needs more filament than is left.
    InsufficientFilament,
}

/// Decide whether a job in `current` may move to `requested`.
///
/// `remaining` and `required` are the spool's remaining weight and the job's print weight. They
/// only matter for the `Running -> Done` edge, which consumes filament.
pub fn check_transition(
    current: PrintJobStatus,
    requested: PrintJobStatus,
    remaining: u64,
    required: u64,
) -> Result<(), TransitionError> {
    use PrintJobStatus::*;

    match requested {
        Queued => Err(TransitionError::InvalidStatus),
        _ if current.is_terminal() => Err(TransitionError::Invalid),
        Running => match current {
            Queued => Ok(()),
            _ => Err(TransitionError::Invalid),
        },
        Done => match current {
            Running if remaining >= required => Ok(()),
            Running => Err(TransitionError::InsufficientFilament),
            _ => Err(TransitionError::Invalid),
        },
        Canceled => Ok(()),
    }
}

/// The three entity tables.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PrintFarm {
    printers: BTreeMap<String, Printer>,
    filaments: BTreeMap<String, Filament>,
    print_jobs: BTreeMap<String, PrintJob>,
}

impl PrintFarm {
    /// Apply one decoded command.
    ///
    /// Either the whole command takes effect or, on `Err`, nothing does.
    pub fn apply(&mut self, cmd: Command) -> Result<Applied, ApplyError> {
        match cmd {
            Command::CreatePrinter(p) => {
                self.printers.insert(p.id.clone(), p.clone());
                Ok(Applied::Printer(p))
            }
            Command::CreateFilament(f) => {
                self.filaments.insert(f.id.clone(), f.clone());
                Ok(Applied::Filament(f))
            }
            Command::CreatePrintJob(pj) => self.create_print_job(pj),
            Command::UpdateJobStatus(update) => self.update_job_status(update),
        }
    }

    fn create_print_job(&mut self, pj: PrintJob) -> Result<Applied, ApplyError> {
        // A job id is never reused: replacing a job would rewind its status.
        if self.print_jobs.contains_key(&pj.id) {
            return Err(ApplyError::JobExists { job_id: pj.id });
        }

        if !self.printers.contains_key(&pj.printer_id) {
            return Err(ApplyError::PrinterNotFound {
                printer_id: pj.printer_id,
            });
        }

        if !self.filaments.contains_key(&pj.filament_id) {
            return Err(ApplyError::FilamentNotFound {
                filament_id: pj.filament_id,
            });
        }

        // Filament is not reserved here; it is only consumed when the job is done.
        self.print_jobs.insert(pj.id.clone(), pj.clone());
        Ok(Applied::PrintJob(pj))
    }

    fn update_job_status(&mut self, update: StatusUpdate) -> Result<Applied, ApplyError> {
        let StatusUpdate { job_id, new_status } = update;

        let Some(job) = self.print_jobs.get(&job_id) else {
            return Err(ApplyError::JobNotFound { job_id });
        };

        let (remaining, required) = if new_status == PrintJobStatus::Done && job.status == PrintJobStatus::Running {
            let Some(filament) = self.filaments.get(&job.filament_id) else {
                return Err(ApplyError::FilamentNotFound {
                    filament_id: job.filament_id.clone(),
                });
            };
            (filament.remaining_weight_grams, job.print_weight_grams)
        } else {
            (0, 0)
        };

        check_transition(job.status, new_status, remaining, required).map_err(|e| match e {
            TransitionError::Invalid => ApplyError::InvalidTransition {
                job_id: job_id.clone(),
                from: job.status,
                to: new_status,
            },
            TransitionError::InvalidStatus => ApplyError::InvalidStatus {
                job_id: job_id.clone(),
                status: new_status,
            },
            TransitionError::InsufficientFilament => ApplyError::InsufficientFilament {
                job_id: job_id.clone(),
                filament_id: job.filament_id.clone(),
                required,
                remaining,
            },
        })?;

        // Validation passed: from here on nothing can fail.

        if new_status == PrintJobStatus::Done {
            let filament_id = job.filament_id.clone();
            if let Some(filament) = self.filaments.get_mut(&filament_id) {
                filament.remaining_weight_grams -= required;
            }
        }

        if let Some(job) = self.print_jobs.get_mut(&job_id) {
            job.status = new_status;
        }

        Ok(Applied::JobStatus {
            job_id,
            status: new_status,
        })
    }

    pub fn printers(&self) -> Vec<Printer> {
        self.printers.values().cloned().collect()
    }

    pub fn filaments(&self) -> Vec<Filament> {
        self.filaments.values().cloned().collect()
    }

    pub fn print_jobs(&self) -> Vec<PrintJob> {
        self.print_jobs.values().cloned().collect()
    }

    pub fn printer(&self, id: &str) -> Option<Printer> {
        self.printers.get(id).cloned()
    }

    pub fn filament(&self, id: &str) -> Option<Filament> {
        self.filaments.get(id).cloned()
    }

    pub fn print_job(&self, id: &str) -> Option<PrintJob> {
        self.print_jobs.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FilamentType;
    use crate::models::PrintJobStatus::*;

    const ALL: [PrintJobStatus; 4] = [Queued, Running, Done, Canceled];

    fn printer(id: &str) -> Command {
        Command::CreatePrinter(Printer {
            id: id.to_string(),
            company: "Prusa".to_string(),
            model: "MK4".to_string(),
        })
    }

    fn filament(id: &str, total: u64) -> Command {
        Command::CreateFilament(Filament {
            id: id.to_string(),
            filament_type: FilamentType::PLA,
            color: "red".to_string(),
            total_weight_grams: total,
            remaining_weight_grams: total,
        })
    }

    fn job(id: &str, filament_id: &str, weight: u64) -> Command {
        Command::CreatePrintJob(PrintJob {
            id: id.to_string(),
            printer_id: "P1".to_string(),
            filament_id: filament_id.to_string(),
            file: format!("{}.gcode", id),
            print_weight_grams: weight,
            status: Queued,
        })
    }

    fn update(job_id: &str, new_status: PrintJobStatus) -> Command {
        Command::UpdateJobStatus(StatusUpdate {
            job_id: job_id.to_string(),
            new_status,
        })
    }

    /// A farm with printer `P1`, filament `F1` of 1000g and job `J1` of 400g in `status`.
    fn farm_with_job_in(status: PrintJobStatus) -> PrintFarm {
        let mut farm = PrintFarm::default();
        farm.apply(printer("P1")).unwrap();
        farm.apply(filament("F1", 1000)).unwrap();
        farm.apply(job("J1", "F1", 400)).unwrap();

        let path: &[PrintJobStatus] = match status {
            Queued => &[],
            Running => &[Running],
            Done => &[Running, Done],
            Canceled => &[Canceled],
        };
        for s in path {
            farm.apply(update("J1", *s)).unwrap();
        }
        farm
    }

    #[test]
    fn test_check_transition_graph() {
        let legal = [(Queued, Running), (Running, Done), (Queued, Canceled), (Running, Canceled)];

        for current in ALL {
            for requested in ALL {
                let res = check_transition(current, requested, 10, 1);
                if legal.contains(&(current, requested)) {
                    assert_eq!(Ok(()), res, "{} -> {}", current, requested);
                } else if requested == Queued {
                    assert_eq!(Err(TransitionError::InvalidStatus), res, "{} -> {}", current, requested);
                } else {
                    assert_eq!(Err(TransitionError::Invalid), res, "{} -> {}", current, requested);
                }
            }
        }

        assert_eq!(Ok(()), check_transition(Running, Done, 5, 5));
        assert_eq!(
            Err(TransitionError::InsufficientFilament),
            check_transition(Running, Done, 4, 5)
        );
        // The graph is checked before the stock.
        assert_eq!(Err(TransitionError::Invalid), check_transition(Queued, Done, 0, 5));
    }

    #[test]
    fn test_illegal_transitions_do_not_mutate() {
        for current in ALL {
            for requested in ALL {
                let mut farm = farm_with_job_in(current);
                let before = farm.clone();

                let res = farm.apply(update("J1", requested));
                let legal = check_transition(current, requested, 1000, 400).is_ok();
                if legal {
                    assert!(res.is_ok(), "{} -> {}: {:?}", current, requested, res);
                } else {
                    assert!(
                        matches!(
                            res,
                            Err(ApplyError::InvalidTransition { .. }) | Err(ApplyError::InvalidStatus { .. })
                        ),
                        "{} -> {}: {:?}",
                        current,
                        requested,
                        res
                    );
                    assert_eq!(before, farm);
                }
            }
        }
    }

    #[test]
    fn test_consume_filament_scenario() {
        let mut farm = PrintFarm::default();
        farm.apply(filament("F1", 1000)).unwrap();
        farm.apply(printer("P1")).unwrap();
        farm.apply(job("J1", "F1", 400)).unwrap();

        farm.apply(update("J1", Running)).unwrap();
        let got = farm.apply(update("J1", Done)).unwrap();
        assert_eq!(
            Applied::JobStatus {
                job_id: "J1".to_string(),
                status: Done
            },
            got
        );
        assert_eq!(600, farm.filament("F1").unwrap().remaining_weight_grams);
        assert_eq!(1000, farm.filament("F1").unwrap().total_weight_grams);

        farm.apply(job("J2", "F1", 700)).unwrap();
        farm.apply(update("J2", Running)).unwrap();

        let before = farm.clone();
        let res = farm.apply(update("J2", Done));
        assert_eq!(
            Err(ApplyError::InsufficientFilament {
                job_id: "J2".to_string(),
                filament_id: "F1".to_string(),
                required: 700,
                remaining: 600,
            }),
            res
        );
        assert_eq!(before, farm);
        assert_eq!(600, farm.filament("F1").unwrap().remaining_weight_grams);
        assert_eq!(Running, farm.print_job("J2").unwrap().status);

        // Not admitted at completion, but it can still be canceled.
        farm.apply(update("J2", Canceled)).unwrap();
        assert_eq!(600, farm.filament("F1").unwrap().remaining_weight_grams);
    }

    #[test]
    fn test_exact_remaining_weight_is_enough() {
        let mut farm = PrintFarm::default();
        farm.apply(printer("P1")).unwrap();
        farm.apply(filament("F1", 250)).unwrap();
        farm.apply(job("J1", "F1", 250)).unwrap();
        farm.apply(update("J1", Running)).unwrap();
        farm.apply(update("J1", Done)).unwrap();

        assert_eq!(0, farm.filament("F1").unwrap().remaining_weight_grams);
    }

    #[test]
    fn test_skip_running_is_invalid() {
        let mut farm = farm_with_job_in(Queued);
        let res = farm.apply(update("J1", Done));
        assert_eq!(
            Err(ApplyError::InvalidTransition {
                job_id: "J1".to_string(),
                from: Queued,
                to: Done,
            }),
            res
        );
        assert_eq!(1000, farm.filament("F1").unwrap().remaining_weight_grams);
    }

    #[test]
    fn test_canceled_is_terminal() {
        for requested in ALL {
            let mut farm = farm_with_job_in(Canceled);
            assert!(farm.apply(update("J1", requested)).is_err());
            assert_eq!(Canceled, farm.print_job("J1").unwrap().status);
        }
    }

    #[test]
    fn test_update_unknown_job() {
        let mut farm = farm_with_job_in(Queued);
        let res = farm.apply(update("nope", Running));
        assert_eq!(
            Err(ApplyError::JobNotFound {
                job_id: "nope".to_string()
            }),
            res
        );
    }

    #[test]
    fn test_create_is_idempotent() {
        let mut once = PrintFarm::default();
        once.apply(printer("P1")).unwrap();
        once.apply(filament("F1", 500)).unwrap();

        let mut twice = PrintFarm::default();
        for _ in 0..2 {
            twice.apply(printer("P1")).unwrap();
            twice.apply(filament("F1", 500)).unwrap();
        }

        assert_eq!(once, twice);
        assert_eq!(1, twice.printers().len());
        assert_eq!(1, twice.filaments().len());
    }

    #[test]
    fn test_create_job_requires_printer_and_filament() {
        let mut farm = PrintFarm::default();

        let res = farm.apply(job("J1", "F1", 10));
        assert_eq!(
            Err(ApplyError::PrinterNotFound {
                printer_id: "P1".to_string()
            }),
            res
        );

        farm.apply(printer("P1")).unwrap();
        let res = farm.apply(job("J1", "F1", 10));
        assert_eq!(
            Err(ApplyError::FilamentNotFound {
                filament_id: "F1".to_string()
            }),
            res
        );
        assert!(farm.print_jobs().is_empty());

        farm.apply(filament("F1", 100)).unwrap();
        farm.apply(job("J1", "F1", 10)).unwrap();
        assert_eq!(Queued, farm.print_job("J1").unwrap().status);
    }

    #[test]
    fn test_job_id_can_not_be_reused() {
        let mut farm = farm_with_job_in(Done);
        assert_eq!(600, farm.filament("F1").unwrap().remaining_weight_grams);

        let before = farm.clone();
        let res = farm.apply(job("J1", "F1", 400));
        assert_eq!(
            Err(ApplyError::JobExists {
                job_id: "J1".to_string()
            }),
            res
        );
        assert_eq!(before, farm);

        // A done job can not be run again, so the spool is charged only once.
        assert!(farm.apply(update("J1", Running)).is_err());
        assert_eq!(Done, farm.print_job("J1").unwrap().status);
        assert_eq!(600, farm.filament("F1").unwrap().remaining_weight_grams);

        let mut farm = farm_with_job_in(Running);
        assert!(farm.apply(job("J1", "F1", 1)).is_err());
        assert_eq!(Running, farm.print_job("J1").unwrap().status);
        assert_eq!(400, farm.print_job("J1").unwrap().print_weight_grams);
    }

    #[test]
    fn test_create_job_does_not_reserve_filament() {
        let mut farm = PrintFarm::default();
        farm.apply(printer("P1")).unwrap();
        farm.apply(filament("F1", 100)).unwrap();
        farm.apply(job("J1", "F1", 80)).unwrap();
        farm.apply(job("J2", "F1", 80)).unwrap();

        assert_eq!(2, farm.print_jobs().len());
        assert_eq!(100, farm.filament("F1").unwrap().remaining_weight_grams);
    }

    #[test]
    fn test_accessors_are_sorted_copies() {
        let mut farm = PrintFarm::default();
        farm.apply(printer("P2")).unwrap();
        farm.apply(printer("P1")).unwrap();

        let mut got = farm.printers();
        assert_eq!(vec!["P1", "P2"], got.iter().map(|p| p.id.as_str()).collect::<Vec<_>>());

        got[0].model = "changed".to_string();
        assert_eq!("MK4", farm.printer("P1").unwrap().model);
        assert_eq!(None, farm.filament("F1"));
    }
}
