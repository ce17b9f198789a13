use std::sync::Arc;

use tracing::warn;

use crate::env::StorageEnv;
use crate::error::{write_result_to, ErrorCode};
use crate::index::{index_keys_for, named_props, Entity};
use crate::keys::edge_key;
use crate::types::{
    AddEdgesRequest, ExecResponse, IndexItem, KeyValue, NewEdge, PartitionId, SchemaRef,
};

use super::{fail_all, run_units, space_vid_len, Unit};

/// Non-atomic edge insert: each partition's edges and their index entries go
/// out as one put against the source partition.
pub struct AddEdgesProcessor {
    env: StorageEnv,
}

impl AddEdgesProcessor {
    pub fn new(env: StorageEnv) -> Self {
        Self { env }
    }

    pub async fn process(self, req: AddEdgesRequest) -> ExecResponse {
        let units = self.plan_units(&req);
        run_units(&self.env, req.space_id, units).await
    }

    fn plan_units(&self, req: &AddEdgesRequest) -> Vec<Unit> {
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
            .map(|(part, edges)| match self.encode_part(req, vid_len, *part, edges, &indexes) {
                Ok(batch) => Unit::Put(*part, batch),
                Err(code) => Unit::Fail(*part, code),
            })
            .collect()
    }

    fn encode_part(
        &self,
        req: &AddEdgesRequest,
        vid_len: usize,
        part: PartitionId,
        edges: &[NewEdge],
        indexes: &[Arc<IndexItem>],
    ) -> Result<Vec<KeyValue>, ErrorCode> {
        let space_id = req.space_id;
        let mut batch = Vec::with_capacity(edges.len());
        for edge in edges {
            let edge_type = edge.key.edge_type;
            let schema = self
                .env
                .schemas
                .edge_schema(space_id, edge_type)
                .ok_or(ErrorCode::EdgeNotFound)?;
            let row = self
                .env
                .codec
                .encode(&schema, &req.prop_names, &edge.props)
                .map_err(|result| write_result_to(result, true))?;
            batch.push((edge_key(vid_len, part, &edge.key)?, row));

            if !indexes.is_empty() {
                let props = named_props(&schema, &req.prop_names, &edge.props);
                let index_keys = index_keys_for(
                    vid_len,
                    part,
                    SchemaRef::Edge(edge_type),
                    &Entity::Edge(edge.key.clone()),
                    &props,
                    indexes,
                )?;
                batch.extend(index_keys.into_iter().map(|key| (key, Vec::new())));
            }
        }
        Ok(batch)
    }
}
