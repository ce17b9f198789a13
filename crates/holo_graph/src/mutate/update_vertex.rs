//! Conditional update of one vertex tag, with optional upsert.
//!
//! The stored row is read, checked against the condition, rewritten prop by
//! prop and written back together with its tag index entries in one atomic
//! batch. Index entries of the old row that no longer match are removed in
//! the same batch.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::env::StorageEnv;
use crate::error::{write_result_to, ErrorCode};
use crate::expr::{Expression, PROP_VID};
use crate::index::{index_keys_for, props_from_row, Entity};
use crate::keys::vertex_key;
use crate::processor::BaseProcessor;
use crate::types::{
    DataSet, KeyValue, Schema, SchemaRef, UpdateResponse, UpdateVertexRequest, Value,
};

/// First column of the returned props: whether the row was inserted.
pub const PROP_INSERTED: &str = "_inserted";

/// Result of the read-modify step.
enum Prepared {
    /// The condition rejected the current row.
    Filtered(BTreeMap<String, Value>),
    Write {
        removes: Vec<Vec<u8>>,
        puts: Vec<KeyValue>,
        props: BTreeMap<String, Value>,
        inserted: bool,
    },
}

pub struct UpdateVertexProcessor {
    env: StorageEnv,
}

impl UpdateVertexProcessor {
    pub fn new(env: StorageEnv) -> Self {
        Self { env }
    }

    pub async fn process(self, req: UpdateVertexRequest) -> UpdateResponse {
        let part = req.part_id;
        let base = BaseProcessor::new(self.env.clone(), req.space_id, 1);
        let prepared = match self.prepare(&req) {
            Ok(prepared) => prepared,
            Err(code) => {
                base.handle_error_code(part, code);
                return UpdateResponse {
                    result: base.finish().await,
                    props: None,
                };
            }
        };

        match prepared {
            Prepared::Filtered(props) => {
                debug!(
                    space = req.space_id,
                    part,
                    vid = %req.vertex_id,
                    tag = req.tag_id,
                    "update filtered out by condition"
                );
                base.handle_error_code(part, ErrorCode::FilterOut);
                UpdateResponse {
                    result: base.finish().await,
                    props: Some(returned_props(&req, false, &props)),
                }
            }
            Prepared::Write {
                removes,
                puts,
                props,
                inserted,
            } => {
                self.env
                    .evict_vertex_row(req.space_id, &req.vertex_id, req.tag_id);
                let code = base.do_sync_atomic_write(part, removes, puts).await;
                base.handle_async(part, code);
                let result = base.finish().await;
                let props = result
                    .succeeded()
                    .then(|| returned_props(&req, inserted, &props));
                UpdateResponse { result, props }
            }
        }
    }

    fn prepare(&self, req: &UpdateVertexRequest) -> Result<Prepared, ErrorCode> {
        let space_id = req.space_id;
        let part = req.part_id;
        let vid = &req.vertex_id;
        let vid_len = self.env.schemas.space_vid_len(space_id).map_err(|err| {
            warn!(space = space_id, error = %err, "failed to resolve vid length");
            ErrorCode::InvalidSpaceVidLen
        })?;
        let schema = self
            .env
            .schemas
            .tag_schema(space_id, req.tag_id)
            .ok_or(ErrorCode::TagNotFound)?;
        let unknown_prop = req
            .updated_props
            .iter()
            .map(|prop| prop.name.as_str())
            .chain(req.return_props.iter().map(String::as_str))
            .find(|name| *name != PROP_VID && schema.field(name).is_none());
        if let Some(name) = unknown_prop {
            warn!(space = space_id, tag = req.tag_id, prop = name, "unknown tag property");
            return Err(ErrorCode::TagPropNotFound);
        }
        let condition = if req.condition.is_empty() {
            None
        } else {
            Some(Expression::decode(&req.condition)?)
        };
        let indexes = self.env.indexes.tag_indexes(space_id).map_err(|err| {
            warn!(space = space_id, error = %err, "failed to list tag indexes");
            ErrorCode::SpaceNotFound
        })?;

        let key = vertex_key(vid_len, part, vid, req.tag_id)?;
        let stored = self
            .env
            .gateway
            .get(space_id, part, &key)
            .map_err(ErrorCode::from)?;
        let old_props = match stored {
            Some(raw) => Some(self.decode(&schema, &raw)?),
            None if req.insertable => None,
            None => return Err(ErrorCode::VertexNotFound),
        };
        let inserted = old_props.is_none();

        // An inserted row starts from the schema defaults; the condition only
        // applies to a row that already exists.
        let mut props = match &old_props {
            Some(props) => props.clone(),
            None => schema
                .columns
                .iter()
                .filter_map(|col| Some((col.name.clone(), col.default.clone()?)))
                .collect(),
        };
        if let Some(condition) = &condition {
            if !inserted && !condition.matches(&|name| prop_of(vid, &props, name)) {
                return Ok(Prepared::Filtered(props));
            }
        }
        for update in &req.updated_props {
            let value = update.value.eval(&|name| prop_of(vid, &props, name));
            props.insert(update.name.clone(), value);
        }

        let (names, values): (Vec<String>, Vec<Value>) = schema
            .columns
            .iter()
            .filter_map(|col| Some((col.name.clone(), props.get(&col.name)?.clone())))
            .unzip();
        let row = self
            .env
            .codec
            .encode(&schema, &names, &values)
            .map_err(|result| {
                warn!(space = space_id, part, %vid, ?result, "failed to encode updated row");
                write_result_to(result, false)
            })?;
        // Read the row back so defaults and coercions show in the index and
        // the returned props.
        let props = self.decode(&schema, &row)?;

        let mut puts = vec![(key, row)];
        let mut removes = Vec::new();
        if !indexes.is_empty() {
            let owner = SchemaRef::Tag(req.tag_id);
            let entity = Entity::Vertex(vid.clone());
            let new_keys = index_keys_for(vid_len, part, owner, &entity, &props, &indexes)?;
            if let Some(old_props) = &old_props {
                removes = index_keys_for(vid_len, part, owner, &entity, old_props, &indexes)?
                    .into_iter()
                    .filter(|old| !new_keys.contains(old))
                    .collect();
            }
            puts.extend(new_keys.into_iter().map(|key| (key, Vec::new())));
        }
        Ok(Prepared::Write {
            removes,
            puts,
            props,
            inserted,
        })
    }

    fn decode(&self, schema: &Schema, raw: &[u8]) -> Result<BTreeMap<String, Value>, ErrorCode> {
        let row = self.env.codec.decode(schema, raw).map_err(|err| {
            warn!(error = %err, "failed to decode tag row");
            ErrorCode::Unknown
        })?;
        Ok(props_from_row(schema, row))
    }
}

fn prop_of(vid: &str, props: &BTreeMap<String, Value>, name: &str) -> Option<Value> {
    if name == PROP_VID {
        return Some(Value::Str(vid.to_string()));
    }
    props.get(name).cloned()
}

fn returned_props(
    req: &UpdateVertexRequest,
    inserted: bool,
    props: &BTreeMap<String, Value>,
) -> DataSet {
    let mut data = DataSet::with_columns(
        std::iter::once(PROP_INSERTED.to_string())
            .chain(req.return_props.iter().cloned())
            .collect(),
    );
    let mut row = vec![Value::Bool(inserted)];
    row.extend(
        req.return_props
            .iter()
            .map(|name| prop_of(&req.vertex_id, props, name).unwrap_or(Value::Null)),
    );
    data.rows.push(row);
    data
}
