use std::sync::Arc;

use tracing::warn;

use crate::env::StorageEnv;
use crate::error::ErrorCode;
use crate::index::{index_keys_for, props_from_row, Entity};
use crate::keys::edge_key;
use crate::types::{
    DeleteEdgesRequest, EdgeKey, ExecResponse, GraphSpaceId, IndexItem, PartitionId, SchemaRef,
};

use super::{fail_all, run_units, space_vid_len, Unit};

/// Removes edges and their index entries, one removal per partition.
pub struct DeleteEdgesProcessor {
    env: StorageEnv,
}

impl DeleteEdgesProcessor {
    pub fn new(env: StorageEnv) -> Self {
        Self { env }
    }

    pub async fn process(self, req: DeleteEdgesRequest) -> ExecResponse {
        let units = self.plan_units(&req);
        run_units(&self.env, req.space_id, units).await
    }

    fn plan_units(&self, req: &DeleteEdgesRequest) -> Vec<Unit> {
        let space_id = req.space_id;
        let vid_len = match space_vid_len(&self.env, space_id, req.parts.keys().copied()) {
            Ok(vid_len) => vid_len,
            Err(units) => return units,
        };
        let indexes = match self.env.indexes.edge_indexes(space_id) {
            Ok(indexes) => indexes,
            Err(err) => {
                warn!(space = space_id, error = %err, "failed to list edge indexes");
                return fail_all(req.parts.keys().copied(), ErrorCode::SpaceNotFound);
            }
        };
        req.parts
            .iter()
            .map(|(part, edges)| match self.part_keys(space_id, vid_len, *part, edges, &indexes) {
                Ok(keys) => Unit::Remove(*part, keys),
                Err(code) => Unit::Fail(*part, code),
            })
            .collect()
    }

    fn part_keys(
        &self,
        space_id: GraphSpaceId,
        vid_len: usize,
        part: PartitionId,
        edges: &[EdgeKey],
        indexes: &[Arc<IndexItem>],
    ) -> Result<Vec<Vec<u8>>, ErrorCode> {
        let mut keys = Vec::with_capacity(edges.len());
        for edge in edges {
            let key = edge_key(vid_len, part, edge)?;
            if !indexes.is_empty() {
                keys.extend(self.index_keys(space_id, vid_len, part, edge, &key, indexes)?);
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Index entries of the stored edge row; nothing when the edge is absent.
    fn index_keys(
        &self,
        space_id: GraphSpaceId,
        vid_len: usize,
        part: PartitionId,
        edge: &EdgeKey,
        key: &[u8],
        indexes: &[Arc<IndexItem>],
    ) -> Result<Vec<Vec<u8>>, ErrorCode> {
        let Some(raw) = self
            .env
            .gateway
            .get(space_id, part, key)
            .map_err(ErrorCode::from)?
        else {
            return Ok(Vec::new());
        };
        let Some(schema) = self.env.schemas.edge_schema(space_id, edge.edge_type) else {
            return Ok(Vec::new());
        };
        let row = match self.env.codec.decode(&schema, &raw) {
            Ok(row) => row,
            Err(err) => {
                warn!(space = space_id, part, error = %err, "failed to decode edge row");
                return Ok(Vec::new());
            }
        };
        index_keys_for(
            vid_len,
            part,
            SchemaRef::Edge(edge.edge_type),
            &Entity::Edge(edge.clone()),
            &props_from_row(&schema, row),
            indexes,
        )
    }
}
