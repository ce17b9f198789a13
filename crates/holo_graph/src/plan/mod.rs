//! Lookup execution plans.
//!
//! `storage_plan` owns the node arena and walks it in dependency order,
//! `nodes` implements the operators, and `builder` wires one branch per index
//! query context into a plan.

mod builder;
mod nodes;
mod storage_plan;

pub use builder::{choose_shape, result_columns, LookupPlanBuilder, PlanShape};
pub use nodes::{
    AggregateNode, CandidateRow, DataJoinNode, FilterNode, FilterSource, IndexScanNode, NodeKind,
    NodeOutput, OutputNode, PlanNode,
};
pub use storage_plan::{NodeId, PlanContext, StoragePlan};
