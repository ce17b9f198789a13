use std::collections::BTreeSet;

use tracing::debug;

use crate::env::StorageEnv;
use crate::error::ErrorCode;
use crate::types::{DataSet, GraphSpaceId, PartitionId};

use super::nodes::{NodeKind, NodeOutput, PlanNode};

/// Index of a node inside its `StoragePlan`.
pub type NodeId = usize;

/// Per-request context shared by every node of one plan.
#[derive(Clone)]
pub struct PlanContext {
    pub env: StorageEnv,
    pub space_id: GraphSpaceId,
    pub vid_len: usize,
    pub is_edge: bool,
    /// Tag id for vertex lookups, edge type for edge lookups.
    pub schema_id: i32,
}

#[derive(Clone)]
struct Slot {
    node: PlanNode,
    deps: Vec<NodeId>,
}

/// Arena owning every node of one lookup plan.
///
/// A node can only depend on nodes already in the arena, so the dependency
/// graph is acyclic by construction. Execution order is derived from the
/// dependency edges, not from insertion order.
#[derive(Clone)]
pub struct StoragePlan {
    slots: Vec<Slot>,
    data: DataSet,
}

impl StoragePlan {
    pub fn new(col_names: Vec<String>) -> Self {
        Self {
            slots: Vec::new(),
            data: DataSet::with_columns(col_names),
        }
    }

    pub fn add_node(&mut self, node: PlanNode, deps: Vec<NodeId>) -> Result<NodeId, ErrorCode> {
        if deps.iter().any(|dep| *dep >= self.slots.len()) {
            return Err(ErrorCode::InvalidOperation);
        }
        self.slots.push(Slot { node, deps });
        Ok(self.slots.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.slots.get(id).map(|slot| slot.node.kind())
    }

    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.slots
            .get(id)
            .map(|slot| slot.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn kinds(&self) -> Vec<NodeKind> {
        self.slots.iter().map(|slot| slot.node.kind()).collect()
    }

    /// Kinds along the single-dependency chain ending at `id`, leaf first.
    pub fn branch_kinds(&self, id: NodeId) -> Vec<NodeKind> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(slot) = self.slots.get(current) else {
                break;
            };
            chain.push(slot.node.kind());
            cursor = match slot.deps.as_slice() {
                [single] => Some(*single),
                _ => None,
            };
        }
        chain.reverse();
        chain
    }

    /// Topological order (Kahn), lowest ready id first.
    pub fn execution_order(&self) -> Vec<NodeId> {
        let mut remaining: Vec<usize> = self.slots.iter().map(|slot| slot.deps.len()).collect();
        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); self.slots.len()];
        for (id, slot) in self.slots.iter().enumerate() {
            for dep in &slot.deps {
                dependents[*dep].push(id);
            }
        }
        let mut ready: BTreeSet<NodeId> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.slots.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for dependent in &dependents[id] {
                remaining[*dependent] -= 1;
                if remaining[*dependent] == 0 {
                    ready.insert(*dependent);
                }
            }
        }
        order
    }

    /// Runs every node against one partition.
    ///
    /// The first failing node stops execution; nothing downstream of it runs.
    /// Rows reach the data set only through Aggregate nodes.
    pub fn go(&mut self, part: PartitionId) -> Result<(), ErrorCode> {
        let mut outputs: Vec<Option<NodeOutput>> = vec![None; self.slots.len()];
        for id in self.execution_order() {
            let slot = &self.slots[id];
            let inputs = slot
                .deps
                .iter()
                .map(|dep| outputs[*dep].as_ref().ok_or(ErrorCode::Unknown))
                .collect::<Result<Vec<_>, _>>()?;
            let output = slot.node.execute(part, &inputs).map_err(|code| {
                debug!(part, node = id, kind = ?slot.node.kind(), code = ?code, "plan node failed");
                code
            })?;
            if slot.node.kind() == NodeKind::Aggregate {
                if let NodeOutput::Rows(rows) = &output {
                    self.data.rows.extend(rows.iter().cloned());
                }
            }
            outputs[id] = Some(output);
        }
        Ok(())
    }

    pub fn data(&self) -> &DataSet {
        &self.data
    }

    pub fn into_data(self) -> DataSet {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::nodes::AggregateNode;

    fn aggregate() -> PlanNode {
        PlanNode::Aggregate(AggregateNode::new())
    }

    #[test]
    fn dependencies_must_already_exist() {
        let mut plan = StoragePlan::new(vec!["_vid".to_string()]);
        assert_eq!(plan.add_node(aggregate(), Vec::new()), Ok(0));
        assert_eq!(plan.add_node(aggregate(), vec![1]), Err(ErrorCode::InvalidOperation));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn order_follows_dependency_edges() {
        let mut plan = StoragePlan::new(Vec::new());
        let a = plan.add_node(aggregate(), Vec::new()).unwrap();
        let b = plan.add_node(aggregate(), Vec::new()).unwrap();
        let c = plan.add_node(aggregate(), vec![b]).unwrap();
        let d = plan.add_node(aggregate(), vec![a, c]).unwrap();

        assert_eq!(plan.execution_order(), vec![a, b, c, d]);
        assert!(plan.go(1).is_ok());
        assert!(plan.data().rows.is_empty());
    }
}
