use std::sync::Arc;

use tracing::warn;

use crate::env::StorageEnv;
use crate::error::ErrorCode;
use crate::index::{index_keys_for, props_from_row, Entity};
use crate::keys::{parse_vertex_tag, prefix_end, vertex_prefix};
use crate::types::{
    DeleteVerticesRequest, ExecResponse, GraphSpaceId, IndexItem, PartitionId, SchemaRef,
    VertexId,
};

use super::{fail_all, run_units, space_vid_len, Unit};

/// Deletes every tag of each vertex with one range removal per vertex, plus
/// one removal per partition for the index entries of the deleted rows.
pub struct DeleteVerticesProcessor {
    env: StorageEnv,
}

impl DeleteVerticesProcessor {
    pub fn new(env: StorageEnv) -> Self {
        Self { env }
    }

    pub async fn process(self, req: DeleteVerticesRequest) -> ExecResponse {
        let units = self.plan_units(&req);
        run_units(&self.env, req.space_id, units).await
    }

    fn plan_units(&self, req: &DeleteVerticesRequest) -> Vec<Unit> {
        let space_id = req.space_id;
        let vid_len = match space_vid_len(&self.env, space_id, req.parts.keys().copied()) {
            Ok(vid_len) => vid_len,
            Err(units) => return units,
        };
        let indexes = match self.env.indexes.tag_indexes(space_id) {
            Ok(indexes) => indexes,
            Err(err) => {
                warn!(space = space_id, error = %err, "failed to list tag indexes");
                return fail_all(req.parts.keys().copied(), ErrorCode::SpaceNotFound);
            }
        };

        let mut units = Vec::new();
        for (part, vids) in &req.parts {
            match self.part_units(space_id, vid_len, *part, vids, &indexes) {
                Ok(part_units) => units.extend(part_units),
                Err(code) => units.push(Unit::Fail(*part, code)),
            }
        }
        units
    }

    fn part_units(
        &self,
        space_id: GraphSpaceId,
        vid_len: usize,
        part: PartitionId,
        vids: &[VertexId],
        indexes: &[Arc<IndexItem>],
    ) -> Result<Vec<Unit>, ErrorCode> {
        let mut ranges = Vec::with_capacity(vids.len());
        let mut index_keys = Vec::new();
        // Stored tags are read when their index entries or cached rows must go too.
        let read_tags = !indexes.is_empty() || self.env.vertex_cache.is_some();
        for vid in vids {
            let prefix = vertex_prefix(vid_len, part, vid)?;
            if read_tags {
                let rows = self
                    .env
                    .gateway
                    .prefix(space_id, part, &prefix)
                    .map_err(ErrorCode::from)?;
                for (key, value) in rows {
                    let Some(tag) = parse_vertex_tag(vid_len, &key) else {
                        continue;
                    };
                    self.env.evict_vertex_row(space_id, vid, tag);
                    if indexes.is_empty() {
                        continue;
                    }
                    let Some(schema) = self.env.schemas.tag_schema(space_id, tag) else {
                        continue;
                    };
                    let row = match self.env.codec.decode(&schema, &value) {
                        Ok(row) => row,
                        Err(err) => {
                            warn!(
                                space = space_id,
                                part,
                                tag,
                                error = %err,
                                "failed to decode tag row"
                            );
                            continue;
                        }
                    };
                    index_keys.extend(index_keys_for(
                        vid_len,
                        part,
                        SchemaRef::Tag(tag),
                        &Entity::Vertex(vid.clone()),
                        &props_from_row(&schema, row),
                        indexes,
                    )?);
                }
            }
            let end = prefix_end(&prefix);
            ranges.push(Unit::RemoveRange(part, prefix, end));
        }
        if !index_keys.is_empty() {
            ranges.push(Unit::Remove(part, index_keys));
        }
        Ok(ranges)
    }
}
