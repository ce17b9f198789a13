use std::sync::Arc;

use tracing::warn;

use crate::env::StorageEnv;
use crate::error::{write_result_to, ErrorCode};
use crate::index::{index_keys_for, named_props, Entity};
use crate::keys::vertex_key;
use crate::types::{
    AddVerticesRequest, ExecResponse, IndexItem, KeyValue, NewVertex, PartitionId, SchemaRef,
};

use super::{fail_all, run_units, space_vid_len, Unit};

/// Inserts vertices with their tag rows and tag index entries, one put per
/// partition.
pub struct AddVerticesProcessor {
    env: StorageEnv,
}

impl AddVerticesProcessor {
    pub fn new(env: StorageEnv) -> Self {
        Self { env }
    }

    pub async fn process(self, req: AddVerticesRequest) -> ExecResponse {
        let units = self.plan_units(&req);
        run_units(&self.env, req.space_id, units).await
    }

    fn plan_units(&self, req: &AddVerticesRequest) -> Vec<Unit> {
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
        req.parts
            .iter()
            .map(|(part, vertices)| {
                match self.encode_part(req, vid_len, *part, vertices, &indexes) {
                    Ok(batch) => Unit::Put(*part, batch),
                    Err(code) => Unit::Fail(*part, code),
                }
            })
            .collect()
    }

    fn encode_part(
        &self,
        req: &AddVerticesRequest,
        vid_len: usize,
        part: PartitionId,
        vertices: &[NewVertex],
        indexes: &[Arc<IndexItem>],
    ) -> Result<Vec<KeyValue>, ErrorCode> {
        let space_id = req.space_id;
        let mut batch = Vec::new();
        for vertex in vertices {
            for tag in &vertex.tags {
                let schema = self
                    .env
                    .schemas
                    .tag_schema(space_id, tag.tag_id)
                    .ok_or(ErrorCode::TagNotFound)?;
                let prop_names = req
                    .prop_names
                    .get(&tag.tag_id)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let row = self
                    .env
                    .codec
                    .encode(&schema, prop_names, &tag.props)
                    .map_err(|result| {
                        warn!(
                            space = space_id,
                            part,
                            vid = %vertex.id,
                            tag = tag.tag_id,
                            ?result,
                            "failed to encode tag row"
                        );
                        write_result_to(result, false)
                    })?;
                batch.push((vertex_key(vid_len, part, &vertex.id, tag.tag_id)?, row));
                self.env.evict_vertex_row(space_id, &vertex.id, tag.tag_id);

                if indexes.is_empty() {
                    continue;
                }
                let props = named_props(&schema, prop_names, &tag.props);
                let index_keys = index_keys_for(
                    vid_len,
                    part,
                    SchemaRef::Tag(tag.tag_id),
                    &Entity::Vertex(vertex.id.clone()),
                    &props,
                    indexes,
                )?;
                batch.extend(index_keys.into_iter().map(|key| (key, Vec::new())));
            }
        }
        Ok(batch)
    }
}
