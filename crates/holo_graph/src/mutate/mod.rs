//! Mutation processors.
//!
//! Each batch processor first turns its request into units of work, then
//! creates the `BaseProcessor` with the exact unit count and dispatches. A partition
//! that fails while its units are being prepared contributes one failing unit
//! and issues no I/O.

mod add_edges;
mod add_edges_atomic;
mod add_vertices;
mod delete_edges;
mod delete_vertices;
mod update_vertex;

pub use add_edges::AddEdgesProcessor;
pub use add_edges_atomic::{split_into_chains, AddEdgesAtomicProcessor, ChainBatch, ChainId};
pub use add_vertices::AddVerticesProcessor;
pub use delete_edges::DeleteEdgesProcessor;
pub use delete_vertices::DeleteVerticesProcessor;
pub use update_vertex::{UpdateVertexProcessor, PROP_INSERTED};

use tracing::warn;

use crate::env::StorageEnv;
use crate::error::ErrorCode;
use crate::processor::BaseProcessor;
use crate::types::{ExecResponse, GraphSpaceId, KeyValue, PartitionId};

/// One dispatchable piece of a mutation.
#[derive(Debug)]
pub(crate) enum Unit {
    Put(PartitionId, Vec<KeyValue>),
    Remove(PartitionId, Vec<Vec<u8>>),
    RemoveRange(PartitionId, Vec<u8>, Vec<u8>),
    Fail(PartitionId, ErrorCode),
}

/// Dispatches every unit and waits for the aggregated response.
pub(crate) async fn run_units(
    env: &StorageEnv,
    space_id: GraphSpaceId,
    units: Vec<Unit>,
) -> ExecResponse {
    let base = BaseProcessor::new(env.clone(), space_id, units.len());
    for unit in units {
        match unit {
            Unit::Put(part, batch) => base.do_put(part, batch),
            Unit::Remove(part, keys) => base.do_remove(part, keys),
            Unit::RemoveRange(part, start, end) => base.do_remove_range(part, start, end),
            Unit::Fail(part, code) => base.handle_error_code(part, code),
        }
    }
    base.finish().await
}

/// Vid length of the space, or one failing unit per partition.
pub(crate) fn space_vid_len(
    env: &StorageEnv,
    space_id: GraphSpaceId,
    parts: impl Iterator<Item = PartitionId>,
) -> Result<usize, Vec<Unit>> {
    env.schemas.space_vid_len(space_id).map_err(|err| {
        warn!(space = space_id, error = %err, "failed to resolve vid length");
        fail_all(parts, ErrorCode::InvalidSpaceVidLen)
    })
}

pub(crate) fn fail_all(parts: impl Iterator<Item = PartitionId>, code: ErrorCode) -> Vec<Unit> {
    parts.map(|part| Unit::Fail(part, code)).collect()
}
