use std::io::Cursor;
use std::sync::Arc;
use std::sync::Mutex;

use openraft::storage::RaftStateMachine;
use openraft::storage::Snapshot;
use openraft::BasicNode;
use openraft::Entry;
use openraft::EntryPayload;
use openraft::LogId;
use openraft::OptionalSend;
use openraft::RaftSnapshotBuilder;
use openraft::RaftTypeConfig;
use openraft::SnapshotMeta;
use openraft::StorageError;
use openraft::StorageIOError;
use openraft::StoredMembership;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::codec::Request;
use crate::fsm::Applied;
use crate::fsm::ApplyError;
use crate::fsm::PrintFarm;
use crate::models::Filament;
use crate::models::PrintJob;
use crate::models::Printer;
use crate::NodeId;
use crate::TypeConfig;

pub mod log_store;
pub mod snapshot;

pub use log_store::LogStore;
pub use snapshot::StoredSnapshot;

/// The outcome of applying one log entry, returned to the node that proposed it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub result: Result<Applied, ApplyError>,
}

impl Response {
    fn nothing() -> Self {
        Response {
            result: Ok(Applied::Nothing),
        }
    }
}

/// Data contained in the Raft state machine: application tables and the raft bookkeeping
/// needed to resume after a snapshot is installed.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct StateMachineData {
    pub last_applied_log: Option<LogId<NodeId>>,

    pub last_membership: StoredMembership<NodeId, BasicNode>,

    /// Application data.
    pub farm: PrintFarm,
}

/// Defines a state machine for the Raft cluster. This state machine represents a copy of the
/// data for this node. Additionally, it is responsible for storing the last snapshot of the data.
///
/// Every access to the tables, whether apply, snapshot, install or a read from the HTTP API,
/// goes through the single `state_machine` lock.
#[derive(Debug, Default)]
pub struct StateMachineStore {
    /// The Raft state machine.
    pub state_machine: RwLock<StateMachineData>,

    snapshot_idx: Mutex<u64>,

    /// The last received snapshot.
    current_snapshot: RwLock<Option<StoredSnapshot>>,
}

impl StateMachineStore {
    pub async fn printers(&self) -> Vec<Printer> {
        self.state_machine.read().await.farm.printers()
    }

    pub async fn filaments(&self) -> Vec<Filament> {
        self.state_machine.read().await.farm.filaments()
    }

    pub async fn print_jobs(&self) -> Vec<PrintJob> {
        self.state_machine.read().await.farm.print_jobs()
    }

    pub async fn printer(&self, id: &str) -> Option<Printer> {
        self.state_machine.read().await.farm.printer(id)
    }

    pub async fn filament(&self, id: &str) -> Option<Filament> {
        self.state_machine.read().await.farm.filament(id)
    }

    pub async fn print_job(&self, id: &str) -> Option<PrintJob> {
        self.state_machine.read().await.farm.print_job(id)
    }

    fn next_snapshot_idx(&self) -> u64 {
        let mut l = self.snapshot_idx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *l += 1;
        *l
    }
}

fn apply_request(farm: &mut PrintFarm, log_id: &LogId<NodeId>, req: &Request) -> Response {
    let result = req.command().map_err(ApplyError::from).and_then(|cmd| {
        let kind = cmd.kind();
        let res = farm.apply(cmd);
        tracing::debug!(%log_id, %kind, ok = res.is_ok(), "applied command");
        res
    });

    if let Err(e) = &result {
        tracing::warn!(%log_id, "rejected log entry: {}", e);
    }

    Response { result }
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<StateMachineStore> {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let mut data = Vec::new();
        let last_applied_log;
        let last_membership;

        {
            // Serialize while holding the lock so that no apply interleaves.
            let state_machine = self.state_machine.read().await;
            snapshot::write_snapshot(&state_machine, &mut data)
                .map_err(|e| StorageIOError::read_state_machine(&e))?;

            last_applied_log = state_machine.last_applied_log;
            last_membership = state_machine.last_membership.clone();
        }

        let snapshot_idx = self.next_snapshot_idx();

        let snapshot_id = if let Some(last) = last_applied_log {
            format!("{}-{}-{}", last.leader_id, last.index, snapshot_idx)
        } else {
            format!("--{}", snapshot_idx)
        };

        let meta = SnapshotMeta {
            last_log_id: last_applied_log,
            last_membership,
            snapshot_id,
        };

        tracing::info!(snapshot_id = %meta.snapshot_id, snapshot_size = data.len(), "built snapshot");

        let snapshot = StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        };

        {
            let mut current_snapshot = self.current_snapshot.write().await;
            *current_snapshot = Some(snapshot);
        }

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for Arc<StateMachineStore> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>> {
        let state_machine = self.state_machine.read().await;
        Ok((state_machine.last_applied_log, state_machine.last_membership.clone()))
    }

    #[tracing::instrument(level = "trace", skip(self, entries))]
    async fn apply<I>(&mut self, entries: I) -> Result<Vec<Response>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut res = Vec::new(); //No `with_capacity`; do not know `len` of iterator

        let mut sm = self.state_machine.write().await;

        for entry in entries {
            tracing::debug!(%entry.log_id, "replicate to sm");

            sm.last_applied_log = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Blank => res.push(Response::nothing()),
                EntryPayload::Normal(ref req) => {
                    let resp = apply_request(&mut sm.farm, &entry.log_id, req);
                    res.push(resp)
                }
                EntryPayload::Membership(ref mem) => {
                    sm.last_membership = StoredMembership::new(Some(entry.log_id), mem.clone());
                    res.push(Response::nothing())
                }
            };
        }
        Ok(res)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<<TypeConfig as RaftTypeConfig>::SnapshotData>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    #[tracing::instrument(level = "trace", skip(self, snapshot))]
    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<<TypeConfig as RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), StorageError<NodeId>> {
        tracing::info!(
            { snapshot_size = snapshot.get_ref().len() },
            "decoding snapshot for installation"
        );

        let new_snapshot = StoredSnapshot {
            meta: meta.clone(),
            data: snapshot.into_inner(),
        };

        // Decode fully before taking the lock: a bad snapshot must not touch current state.
        let updated_state_machine = snapshot::read_snapshot(new_snapshot.data.as_slice())
            .map_err(|e| StorageIOError::read_snapshot(Some(new_snapshot.meta.signature()), &e))?;

        // Update the state machine.
        {
            let mut state_machine = self.state_machine.write().await;
            *state_machine = updated_state_machine;
        }

        tracing::info!(snapshot_id = %new_snapshot.meta.snapshot_id, "installed snapshot");

        // Update current snapshot.
        let mut current_snapshot = self.current_snapshot.write().await;
        *current_snapshot = Some(new_snapshot);
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get_current_snapshot(&mut self) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        match &*self.current_snapshot.read().await {
            Some(snapshot) => {
                let data = snapshot.data.clone();
                Ok(Some(Snapshot {
                    meta: snapshot.meta.clone(),
                    snapshot: Box::new(Cursor::new(data)),
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use openraft::CommittedLeaderId;

    use super::*;
    use crate::codec::Command;
    use crate::codec::DecodeError;
    use crate::codec::StatusUpdate;
    use crate::models::PrintJobStatus;

    fn entry(index: u64, payload: EntryPayload<TypeConfig>) -> Entry<TypeConfig> {
        Entry {
            log_id: LogId::new(CommittedLeaderId::new(1, 1), index),
            payload,
        }
    }

    #[tokio::test]
    async fn test_apply_reports_every_outcome() -> anyhow::Result<()> {
        let mut sm = Arc::new(StateMachineStore::default());

        let entries = vec![
            entry(1, EntryPayload::Blank),
            entry(2, EntryPayload::Normal(Request(b"garbage".to_vec()))),
            entry(
                3,
                EntryPayload::Normal(Request::from(Command::UpdateJobStatus(StatusUpdate {
                    job_id: "J1".to_string(),
                    new_status: PrintJobStatus::Done,
                }))),
            ),
            entry(
                4,
                EntryPayload::Normal(Request::from(Command::CreatePrinter(Printer {
                    id: "P1".to_string(),
                    company: "Creality".to_string(),
                    model: "Ender 3".to_string(),
                }))),
            ),
        ];

        let got = sm.apply(entries).await?;
        assert_eq!(4, got.len());
        assert_eq!(Ok(Applied::Nothing), got[0].result);
        assert_eq!(
            Err(ApplyError::Decode(DecodeError::UnknownTag(b'g'))),
            got[1].result
        );
        assert_eq!(
            Err(ApplyError::JobNotFound {
                job_id: "J1".to_string()
            }),
            got[2].result
        );
        assert!(matches!(got[3].result, Ok(Applied::Printer(_))));

        // Rejected entries are still applied entries.
        let (applied, _) = sm.applied_state().await?;
        assert_eq!(Some(4), applied.map(|l| l.index));
        assert_eq!(1, sm.printers().await.len());
        Ok(())
    }
}
