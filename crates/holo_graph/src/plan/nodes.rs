//! Plan operators.
//!
//! Scan, DataJoin and Filter pass candidate rows along; Output turns them into
//! result rows and Aggregate merges every Output of the plan. All operators
//! run synchronously over data already replicated to this host.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::ErrorCode;
use crate::expr::{compare, Expression, PROP_DST, PROP_RANK, PROP_SRC, PROP_VID};
use crate::index::{encode_value, props_from_row, Entity, IndexKeyLayout};
use crate::keys::{edge_key, prefix_end, vertex_key};
use crate::types::{ColumnHint, PartitionId, Row, ScanType, Schema, Value};

use super::storage_plan::PlanContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    IndexScan,
    DataJoinVertex,
    DataJoinEdge,
    Filter,
    Output,
    Aggregate,
}

/// One index hit flowing between operators.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateRow {
    pub key: Vec<u8>,
    pub entity: Entity,
    /// Index column values decoded from `key`, in index column order.
    pub index_values: Vec<Value>,
    /// Full schema-decoded row, present after a DataJoin.
    pub props: Option<BTreeMap<String, Value>>,
}

impl CandidateRow {
    fn entity_prop(&self, name: &str) -> Option<Value> {
        match (&self.entity, name) {
            (Entity::Vertex(vid), PROP_VID) => Some(Value::Str(vid.clone())),
            (Entity::Edge(edge), PROP_SRC) => Some(Value::Str(edge.src.clone())),
            (Entity::Edge(edge), PROP_DST) => Some(Value::Str(edge.dst.clone())),
            (Entity::Edge(edge), PROP_RANK) => Some(Value::Int(edge.ranking)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeOutput {
    Candidates(Vec<CandidateRow>),
    Rows(Vec<Row>),
}

#[derive(Clone)]
pub enum PlanNode {
    IndexScan(IndexScanNode),
    DataJoin(DataJoinNode),
    Filter(FilterNode),
    Output(OutputNode),
    Aggregate(AggregateNode),
}

impl PlanNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            PlanNode::IndexScan(_) => NodeKind::IndexScan,
            PlanNode::DataJoin(node) if node.ctx.is_edge => NodeKind::DataJoinEdge,
            PlanNode::DataJoin(_) => NodeKind::DataJoinVertex,
            PlanNode::Filter(_) => NodeKind::Filter,
            PlanNode::Output(_) => NodeKind::Output,
            PlanNode::Aggregate(_) => NodeKind::Aggregate,
        }
    }

    pub fn execute(
        &self,
        part: PartitionId,
        inputs: &[&NodeOutput],
    ) -> Result<NodeOutput, ErrorCode> {
        match self {
            PlanNode::IndexScan(node) => node.execute(part).map(NodeOutput::Candidates),
            PlanNode::DataJoin(node) => node
                .execute(part, single_candidates(inputs)?)
                .map(NodeOutput::Candidates),
            PlanNode::Filter(node) => Ok(NodeOutput::Candidates(
                node.execute(single_candidates(inputs)?),
            )),
            PlanNode::Output(node) => {
                Ok(NodeOutput::Rows(node.execute(single_candidates(inputs)?)))
            }
            PlanNode::Aggregate(node) => node.execute(inputs).map(NodeOutput::Rows),
        }
    }
}

fn single_candidates<'a>(inputs: &[&'a NodeOutput]) -> Result<&'a [CandidateRow], ErrorCode> {
    match inputs {
        [NodeOutput::Candidates(rows)] => Ok(rows.as_slice()),
        _ => Err(ErrorCode::InvalidOperation),
    }
}

/// Prefix or range read over the leading index columns.
#[derive(Clone)]
pub struct IndexScanNode {
    ctx: Arc<PlanContext>,
    layout: IndexKeyLayout,
    hints: Vec<ColumnHint>,
}

impl IndexScanNode {
    /// `hints` must follow the index column order with a range, if any, last.
    pub fn new(ctx: Arc<PlanContext>, layout: IndexKeyLayout, hints: Vec<ColumnHint>) -> Self {
        Self { ctx, layout, hints }
    }

    fn execute(&self, part: PartitionId) -> Result<Vec<CandidateRow>, ErrorCode> {
        let mut leading = Vec::new();
        let mut range = None;
        for hint in &self.hints {
            match &hint.scan {
                ScanType::Prefix(value) => leading.push(value.clone()),
                ScanType::Range { begin, end } => range = Some((begin, end)),
            }
        }
        let prefix = self.layout.scan_prefix(part, &leading)?;
        let gateway = &self.ctx.env.gateway;
        let entries = match range {
            None => gateway.prefix(self.ctx.space_id, part, &prefix),
            Some((begin, end)) => {
                let col = self
                    .layout
                    .cols
                    .get(leading.len())
                    .ok_or(ErrorCode::InvalidOperation)?;
                let mut start = prefix.clone();
                start.extend_from_slice(&encode_value(col, begin)?);
                // A string shorter than `end` can still sort past `prefix + end`
                // once the bitmap and entity bytes follow it, so string ranges
                // read to the end of the prefix and rely on `hints_hold`.
                let stop = if col.ty.is_var_len() {
                    prefix_end(&prefix)
                } else {
                    let mut stop = prefix;
                    stop.extend_from_slice(&encode_value(col, end)?);
                    stop
                };
                gateway.range(self.ctx.space_id, part, &start, &stop)
            }
        }
        .map_err(ErrorCode::from)?;

        let mut rows = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            let (index_values, entity) = self.layout.decode_key(&key)?;
            if !self.hints_hold(&index_values) {
                continue;
            }
            rows.push(CandidateRow {
                key,
                entity,
                index_values,
                props: None,
            });
        }
        Ok(rows)
    }

    /// Raw string bounds can over-match, so hits are re-checked on values.
    fn hints_hold(&self, values: &[Value]) -> bool {
        self.hints.iter().zip(values).all(|(hint, value)| match &hint.scan {
            ScanType::Prefix(expected) => {
                compare(value, expected) == Some(std::cmp::Ordering::Equal)
            }
            ScanType::Range { begin, end } => {
                matches!(
                    compare(value, begin),
                    Some(std::cmp::Ordering::Equal | std::cmp::Ordering::Greater)
                ) && compare(value, end) == Some(std::cmp::Ordering::Less)
            }
        })
    }
}

/// Fetches the full row behind each candidate.
#[derive(Clone)]
pub struct DataJoinNode {
    ctx: Arc<PlanContext>,
    schema: Arc<Schema>,
}

impl DataJoinNode {
    pub fn new(ctx: Arc<PlanContext>, schema: Arc<Schema>) -> Self {
        Self { ctx, schema }
    }

    fn execute(
        &self,
        part: PartitionId,
        input: &[CandidateRow],
    ) -> Result<Vec<CandidateRow>, ErrorCode> {
        let ctx = &self.ctx;
        let mut rows = Vec::with_capacity(input.len());
        for candidate in input {
            let raw = match &candidate.entity {
                Entity::Vertex(vid) => self.vertex_row(part, vid)?,
                Entity::Edge(edge) => ctx
                    .env
                    .gateway
                    .get(ctx.space_id, part, &edge_key(ctx.vid_len, part, edge)?)
                    .map_err(ErrorCode::from)?,
            };
            let Some(raw) = raw else {
                // Index entry without its row; skip it.
                continue;
            };
            let decoded = match ctx.env.codec.decode(&self.schema, &raw) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(space = ctx.space_id, part, error = %err, "failed to decode row");
                    continue;
                }
            };
            let mut joined = candidate.clone();
            joined.props = Some(props_from_row(&self.schema, decoded));
            rows.push(joined);
        }
        Ok(rows)
    }

    /// Tag row of `vid`, read through the vertex cache when one is configured.
    fn vertex_row(&self, part: PartitionId, vid: &str) -> Result<Option<Vec<u8>>, ErrorCode> {
        let ctx = &self.ctx;
        let cache = ctx.env.vertex_cache.as_ref();
        if let Some(row) = cache.and_then(|cache| cache.get(ctx.space_id, vid, ctx.schema_id)) {
            return Ok(Some(row));
        }
        let key = vertex_key(ctx.vid_len, part, vid, ctx.schema_id)?;
        let row = ctx
            .env
            .gateway
            .get(ctx.space_id, part, &key)
            .map_err(ErrorCode::from)?;
        if let (Some(cache), Some(row)) = (cache, &row) {
            cache.insert(ctx.space_id, vid, ctx.schema_id, row.clone());
        }
        Ok(row)
    }
}

/// Where a filter reads property values from.
#[derive(Clone, Debug)]
pub enum FilterSource {
    /// Values decoded from the index key only.
    IndexKey(IndexKeyLayout),
    /// The joined full row.
    FullRow,
}

#[derive(Clone)]
pub struct FilterNode {
    expr: Expression,
    source: FilterSource,
}

impl FilterNode {
    pub fn new(expr: Expression, source: FilterSource) -> Self {
        Self { expr, source }
    }

    pub fn source(&self) -> &FilterSource {
        &self.source
    }

    fn execute(&self, input: &[CandidateRow]) -> Vec<CandidateRow> {
        input
            .iter()
            .filter(|candidate| {
                let lookup = |name: &str| -> Option<Value> {
                    if let Some(value) = candidate.entity_prop(name) {
                        return Some(value);
                    }
                    match &self.source {
                        FilterSource::IndexKey(layout) => layout
                            .position(name)
                            .and_then(|pos| candidate.index_values.get(pos).cloned()),
                        FilterSource::FullRow => candidate
                            .props
                            .as_ref()
                            .and_then(|props| props.get(name).cloned()),
                    }
                };
                self.expr.matches(&lookup)
            })
            .cloned()
            .collect()
    }
}

/// Turns candidates into result rows: entity columns then yield columns.
#[derive(Clone)]
pub struct OutputNode {
    layout: IndexKeyLayout,
    yield_cols: Vec<String>,
}

impl OutputNode {
    pub fn new(layout: IndexKeyLayout, yield_cols: Vec<String>) -> Self {
        Self { layout, yield_cols }
    }

    fn execute(&self, input: &[CandidateRow]) -> Vec<Row> {
        input
            .iter()
            .map(|candidate| {
                let mut row = match &candidate.entity {
                    Entity::Vertex(vid) => vec![Value::Str(vid.clone())],
                    Entity::Edge(edge) => vec![
                        Value::Str(edge.src.clone()),
                        Value::Int(edge.ranking),
                        Value::Str(edge.dst.clone()),
                    ],
                };
                for col in &self.yield_cols {
                    let value = candidate
                        .props
                        .as_ref()
                        .and_then(|props| props.get(col).cloned())
                        .or_else(|| {
                            self.layout
                                .position(col)
                                .and_then(|pos| candidate.index_values.get(pos).cloned())
                        })
                        .unwrap_or(Value::Null);
                    row.push(value);
                }
                row
            })
            .collect()
    }
}

/// Concatenates the rows of every Output it depends on, in dependency order.
#[derive(Clone, Default)]
pub struct AggregateNode;

impl AggregateNode {
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, inputs: &[&NodeOutput]) -> Result<Vec<Row>, ErrorCode> {
        let mut rows = Vec::new();
        for input in inputs {
            match input {
                NodeOutput::Rows(branch) => rows.extend(branch.iter().cloned()),
                NodeOutput::Candidates(_) => return Err(ErrorCode::InvalidOperation),
            }
        }
        Ok(rows)
    }
}
