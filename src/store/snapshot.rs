//! Serialization of a whole state machine to and from a byte stream.

use std::io;

use openraft::BasicNode;
use openraft::SnapshotMeta;

use crate::store::StateMachineData;
use crate::NodeId;

/// A snapshot kept by this node: the metadata openraft needs plus the serialized state.
#[derive(Debug)]
pub struct StoredSnapshot {
    pub meta: SnapshotMeta<NodeId, BasicNode>,

    /// The data of the state machine at the time of this snapshot.
    pub data: Vec<u8>,
}

/// Serialize the complete state machine into `w` as one self-contained JSON object.
pub fn write_snapshot<W: io::Write>(data: &StateMachineData, w: W) -> Result<(), serde_json::Error> {
    serde_json::to_writer(w, data)
}

/// Decode a complete state machine from `r`.
///
/// Nothing is returned unless the whole stream decodes, so a caller can swap its state with the
/// result without ever observing a partial restore.
pub fn read_snapshot<R: io::Read>(r: R) -> Result<StateMachineData, serde_json::Error> {
    serde_json::from_reader(r)
}
