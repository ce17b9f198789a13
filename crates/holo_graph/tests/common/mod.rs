//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use holo_graph::memory::MemoryCluster;
use holo_graph::types::{
    AddEdgesRequest, AddVerticesRequest, ColumnDef, EdgeKey, EdgeType, GraphSpaceId, HostAddr,
    IndexId, IndexItem, KeyValue, NewEdge, NewTag, NewVertex, PartitionId, PropertyType, Schema,
    SchemaRef, TagId, Value,
};
use holo_graph::{ChainWriter, ErrorCode, PartitionLocator, ProcessorConfig};

pub const SPACE: GraphSpaceId = 1;
pub const VID_LEN: usize = 8;
pub const PLAYER: TagId = 1;
pub const FOLLOW: EdgeType = 2;
pub const PLAYER_INDEX: IndexId = 101;
pub const FOLLOW_INDEX: IndexId = 201;

pub fn local_host() -> HostAddr {
    HostAddr::new("127.0.0.1", 9779)
}

pub fn player_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("c1", PropertyType::Int64),
        ColumnDef::new("c2", PropertyType::String),
        ColumnDef::new("c3", PropertyType::Int64).nullable(),
    ])
}

pub fn follow_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("degree", PropertyType::Int64),
        ColumnDef::new("note", PropertyType::String).with_default(Value::from("")),
    ])
}

/// Index over `player(c1, c2)`.
pub fn player_index() -> IndexItem {
    IndexItem {
        index_id: PLAYER_INDEX,
        index_name: "player_c1_c2".to_string(),
        schema: SchemaRef::Tag(PLAYER),
        fields: vec![
            ColumnDef::new("c1", PropertyType::Int64),
            ColumnDef::new("c2", PropertyType::String),
        ],
    }
}

/// Index over `follow(degree)`.
pub fn follow_index() -> IndexItem {
    IndexItem {
        index_id: FOLLOW_INDEX,
        index_name: "follow_degree".to_string(),
        schema: SchemaRef::Edge(FOLLOW),
        fields: vec![ColumnDef::new("degree", PropertyType::Int64)],
    }
}

/// Cluster with the player tag and follow edge registered, no indexes.
pub fn cluster(num_parts: u32) -> MemoryCluster {
    cluster_with_config(num_parts, ProcessorConfig::default())
}

pub fn cluster_with_config(num_parts: u32, config: ProcessorConfig) -> MemoryCluster {
    let cluster = MemoryCluster::new(SPACE, num_parts, VID_LEN, local_host(), config);
    cluster.catalog.add_tag(SPACE, PLAYER, "player", player_schema());
    cluster.catalog.add_edge(SPACE, FOLLOW, "follow", follow_schema());
    cluster
}

/// Cluster with both indexes registered.
pub fn indexed_cluster(num_parts: u32) -> MemoryCluster {
    let cluster = cluster(num_parts);
    cluster.catalog.add_index(SPACE, player_index());
    cluster.catalog.add_index(SPACE, follow_index());
    cluster
}

pub fn player(id: &str, c1: i64, c2: &str) -> NewVertex {
    NewVertex {
        id: id.to_string(),
        tags: vec![NewTag {
            tag_id: PLAYER,
            props: vec![Value::Int(c1), Value::from(c2), Value::Null],
        }],
    }
}

pub fn vertices_request(parts: Vec<(PartitionId, Vec<NewVertex>)>) -> AddVerticesRequest {
    AddVerticesRequest {
        space_id: SPACE,
        parts: parts.into_iter().collect(),
        prop_names: BTreeMap::from([(
            PLAYER,
            vec!["c1".to_string(), "c2".to_string(), "c3".to_string()],
        )]),
    }
}

pub fn follow(src: &str, dst: &str, ranking: i64, degree: i64) -> NewEdge {
    NewEdge {
        key: EdgeKey::new(src, FOLLOW, ranking, dst),
        props: vec![Value::Int(degree)],
    }
}

pub fn edges_request(parts: Vec<(PartitionId, Vec<NewEdge>)>) -> AddEdgesRequest {
    AddEdgesRequest {
        space_id: SPACE,
        parts: parts.into_iter().collect(),
        prop_names: vec!["degree".to_string()],
    }
}

/// Locator with a fixed vid -> partition table; unknown vids fail.
pub struct MapLocator {
    parts: HashMap<String, PartitionId>,
}

impl MapLocator {
    pub fn new(entries: &[(&str, PartitionId)]) -> Arc<Self> {
        Arc::new(Self {
            parts: entries
                .iter()
                .map(|(vid, part)| (vid.to_string(), *part))
                .collect(),
        })
    }
}

impl PartitionLocator for MapLocator {
    fn part_id(&self, _space: GraphSpaceId, vid: &str) -> Result<PartitionId> {
        self.parts
            .get(vid)
            .copied()
            .ok_or_else(|| anyhow!("no partition for vid {vid}"))
    }
}

/// One recorded chain write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainCall {
    pub local: PartitionId,
    pub remote: PartitionId,
    pub batch: Vec<KeyValue>,
}

/// Chain writer that records calls and answers from a per-chain script.
#[derive(Default)]
pub struct RecordingChainWriter {
    calls: Mutex<Vec<ChainCall>>,
    outcomes: HashMap<(PartitionId, PartitionId), ErrorCode>,
    panic_on: Option<(PartitionId, PartitionId)>,
}

impl RecordingChainWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, local: PartitionId, remote: PartitionId, code: ErrorCode) -> Self {
        self.outcomes.insert((local, remote), code);
        self
    }

    pub fn panicking(mut self, local: PartitionId, remote: PartitionId) -> Self {
        self.panic_on = Some((local, remote));
        self
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainWriter for RecordingChainWriter {
    async fn write(
        &self,
        _vid_len: usize,
        _space: GraphSpaceId,
        local: PartitionId,
        remote: PartitionId,
        batch: Vec<KeyValue>,
    ) -> ErrorCode {
        self.calls.lock().unwrap().push(ChainCall {
            local,
            remote,
            batch,
        });
        if self.panic_on == Some((local, remote)) {
            panic!("chain {local}->{remote} blew up");
        }
        self.outcomes
            .get(&(local, remote))
            .copied()
            .unwrap_or(ErrorCode::Succeeded)
    }
}

/// Failed partition ids of a response, sorted.
pub fn failed_parts(response: &holo_graph::types::ExecResponse) -> Vec<PartitionId> {
    let mut parts: Vec<PartitionId> = response
        .failed_parts
        .iter()
        .map(|result| result.part_id)
        .collect();
    parts.sort_unstable();
    parts
}
