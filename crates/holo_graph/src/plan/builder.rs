use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::expr::{Expression, PROP_DST, PROP_RANK, PROP_SRC, PROP_VID};
use crate::index::IndexKeyLayout;
use crate::types::{IndexItem, IndexQueryContext, ScanType, SchemaRef};

use super::nodes::{
    AggregateNode, DataJoinNode, FilterNode, FilterSource, IndexScanNode, OutputNode, PlanNode,
};
use super::storage_plan::{NodeId, PlanContext, StoragePlan};

/// Operator chain of one index query context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanShape {
    /// Scan -> Output
    ScanOutput,
    /// Scan -> DataJoin -> Output
    ScanJoinOutput,
    /// Scan -> Filter -> Output
    ScanFilterOutput,
    /// Scan -> DataJoin -> Filter -> Output
    ScanJoinFilterOutput,
}

pub fn choose_shape(need_data: bool, need_filter: bool) -> PlanShape {
    match (need_data, need_filter) {
        (false, false) => PlanShape::ScanOutput,
        (true, false) => PlanShape::ScanJoinOutput,
        (false, true) => PlanShape::ScanFilterOutput,
        (true, true) => PlanShape::ScanJoinFilterOutput,
    }
}

/// Header of a lookup response: entity columns followed by yield columns.
pub fn result_columns(is_edge: bool, yield_cols: &[String]) -> Vec<String> {
    let mut cols: Vec<String> = if is_edge {
        vec![PROP_SRC.to_string(), PROP_RANK.to_string(), PROP_DST.to_string()]
    } else {
        vec![PROP_VID.to_string()]
    };
    cols.extend(yield_cols.iter().cloned());
    cols
}

/// Builds one lookup plan: a branch per index query context, all feeding a
/// single Aggregate node.
pub struct LookupPlanBuilder<'a> {
    ctx: Arc<PlanContext>,
    contexts: &'a [IndexQueryContext],
    yield_cols: &'a [String],
}

impl<'a> LookupPlanBuilder<'a> {
    pub fn new(
        ctx: Arc<PlanContext>,
        contexts: &'a [IndexQueryContext],
        yield_cols: &'a [String],
    ) -> Self {
        Self {
            ctx,
            contexts,
            yield_cols,
        }
    }

    /// Either a complete plan or the first construction failure; never a
    /// partial plan.
    pub fn build(&self) -> Result<StoragePlan, ErrorCode> {
        if self.contexts.is_empty() {
            return Err(ErrorCode::InvalidOperation);
        }
        let mut plan = StoragePlan::new(result_columns(self.ctx.is_edge, self.yield_cols));
        let mut outputs = Vec::with_capacity(self.contexts.len());
        for query in self.contexts {
            outputs.push(self.build_branch(&mut plan, query)?);
        }
        plan.add_node(PlanNode::Aggregate(AggregateNode::new()), outputs)?;
        Ok(plan)
    }

    fn resolve_index(&self, query: &IndexQueryContext) -> Result<Arc<IndexItem>, ErrorCode> {
        let ctx = &self.ctx;
        let lookup = if ctx.is_edge {
            ctx.env.indexes.edge_index(ctx.space_id, query.index_id)
        } else {
            ctx.env.indexes.tag_index(ctx.space_id, query.index_id)
        };
        let index = lookup.map_err(|err| {
            warn!(space = ctx.space_id, index = query.index_id, error = %err, "index not found");
            ErrorCode::IndexNotFound
        })?;
        let expected = if ctx.is_edge {
            SchemaRef::Edge(ctx.schema_id)
        } else {
            SchemaRef::Tag(ctx.schema_id)
        };
        if index.schema != expected {
            warn!(
                space = ctx.space_id,
                index = query.index_id,
                "index is not built over the queried schema"
            );
            return Err(ErrorCode::IndexNotFound);
        }
        Ok(index)
    }

    /// Hints must name the index columns in order; a range closes the list.
    fn check_hints(layout: &IndexKeyLayout, query: &IndexQueryContext) -> Result<(), ErrorCode> {
        let hints = &query.column_hints;
        for (pos, hint) in hints.iter().enumerate() {
            let Some(col) = layout.cols.get(pos) else {
                return Err(ErrorCode::InvalidOperation);
            };
            if col.name != hint.column_name {
                return Err(ErrorCode::InvalidOperation);
            }
            if matches!(hint.scan, ScanType::Range { .. }) && pos + 1 != hints.len() {
                return Err(ErrorCode::InvalidOperation);
            }
        }
        Ok(())
    }

    fn build_branch(
        &self,
        plan: &mut StoragePlan,
        query: &IndexQueryContext,
    ) -> Result<NodeId, ErrorCode> {
        let ctx = &self.ctx;
        let index = self.resolve_index(query)?;
        let layout = IndexKeyLayout::new(&index, ctx.vid_len);
        Self::check_hints(&layout, query)?;

        let need_data = self.yield_cols.iter().any(|col| !index.covers(col));
        let need_filter = !query.filter.is_empty();
        let expr = if need_filter {
            Some(Expression::decode(&query.filter)?)
        } else {
            None
        };

        // Resolve everything fallible before the first node goes in.
        let schema = if need_data {
            let (schema, name) = if ctx.is_edge {
                (
                    ctx.env.schemas.edge_schema(ctx.space_id, ctx.schema_id),
                    ctx.env.schemas.edge_name(ctx.space_id, ctx.schema_id),
                )
            } else {
                (
                    ctx.env.schemas.tag_schema(ctx.space_id, ctx.schema_id),
                    ctx.env.schemas.tag_name(ctx.space_id, ctx.schema_id),
                )
            };
            let missing = if ctx.is_edge {
                ErrorCode::EdgeNotFound
            } else {
                ErrorCode::TagNotFound
            };
            match (schema, name) {
                (Some(schema), Ok(name)) => {
                    debug!(space = ctx.space_id, schema = %name, "lookup joins full rows");
                    Some(schema)
                }
                _ => {
                    warn!(
                        space = ctx.space_id,
                        schema_id = ctx.schema_id,
                        "schema for data join not found"
                    );
                    return Err(missing);
                }
            }
        } else {
            None
        };

        let shape = choose_shape(need_data, need_filter);
        debug!(space = ctx.space_id, index = query.index_id, ?shape, "building lookup branch");

        let mut tail = plan.add_node(
            PlanNode::IndexScan(IndexScanNode::new(
                ctx.clone(),
                layout.clone(),
                query.column_hints.clone(),
            )),
            Vec::new(),
        )?;
        if let Some(schema) = schema {
            tail = plan.add_node(
                PlanNode::DataJoin(DataJoinNode::new(ctx.clone(), schema)),
                vec![tail],
            )?;
        }
        if let Some(expr) = expr {
            let source = if need_data {
                FilterSource::FullRow
            } else {
                FilterSource::IndexKey(layout.clone())
            };
            tail = plan.add_node(PlanNode::Filter(FilterNode::new(expr, source)), vec![tail])?;
        }
        plan.add_node(
            PlanNode::Output(OutputNode::new(layout, self.yield_cols.to_vec())),
            vec![tail],
        )
    }
}
