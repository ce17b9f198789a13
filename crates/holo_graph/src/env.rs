//! Collaborator contracts consumed by the processors.
//!
//! Every processor receives a `StorageEnv` at construction time. Nothing in the
//! crate reaches for a process-wide manager: tests swap any collaborator for a
//! fake by building their own `StorageEnv`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::cache::VertexCache;
use crate::config::ProcessorConfig;
use crate::error::{EngineCode, ErrorCode, WriteResult};
use crate::types::{
    EdgeType, GraphSpaceId, HostAddr, IndexId, IndexItem, KeyValue, PartitionId, Schema, TagId,
    Value,
};

/// Partition-scoped access to the local replicated KV engine.
///
/// Writes suspend until the engine has applied (or rejected) the batch. Reads
/// are synchronous and only used by plan nodes over already-replicated data.
#[async_trait]
pub trait PartitionGateway: Send + Sync + 'static {
    async fn multi_put(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        batch: Vec<KeyValue>,
    ) -> EngineCode;

    async fn multi_remove(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        keys: Vec<Vec<u8>>,
    ) -> EngineCode;

    /// Remove every key in `[start, end)`.
    async fn remove_range(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        start: Vec<u8>,
        end: Vec<u8>,
    ) -> EngineCode;

    /// Removes `removes`, then writes `puts`, as one atomic batch.
    async fn atomic_write(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        removes: Vec<Vec<u8>>,
        puts: Vec<KeyValue>,
    ) -> EngineCode;

    /// Current leader of the partition as known by this host.
    fn part_leader(&self, space: GraphSpaceId, part: PartitionId)
        -> Result<HostAddr, EngineCode>;

    fn get(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, EngineCode>;

    fn prefix(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        prefix: &[u8],
    ) -> Result<Vec<KeyValue>, EngineCode>;

    /// Ordered scan of `[start, end)`.
    fn range(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<KeyValue>, EngineCode>;
}

/// Schema catalog. Always serves the latest schema version.
pub trait SchemaCatalog: Send + Sync + 'static {
    fn space_vid_len(&self, space: GraphSpaceId) -> Result<usize>;
    fn tag_schema(&self, space: GraphSpaceId, tag: TagId) -> Option<Arc<Schema>>;
    fn edge_schema(&self, space: GraphSpaceId, edge: EdgeType) -> Option<Arc<Schema>>;
    fn tag_name(&self, space: GraphSpaceId, tag: TagId) -> Result<String>;
    fn edge_name(&self, space: GraphSpaceId, edge: EdgeType) -> Result<String>;
}

pub trait IndexCatalog: Send + Sync + 'static {
    fn tag_index(&self, space: GraphSpaceId, index: IndexId) -> Result<Arc<IndexItem>>;
    fn edge_index(&self, space: GraphSpaceId, index: IndexId) -> Result<Arc<IndexItem>>;
    fn tag_indexes(&self, space: GraphSpaceId) -> Result<Vec<Arc<IndexItem>>>;
    fn edge_indexes(&self, space: GraphSpaceId) -> Result<Vec<Arc<IndexItem>>>;
}

/// Placement lookup: which partition owns a vertex id.
pub trait PartitionLocator: Send + Sync + 'static {
    fn part_id(&self, space: GraphSpaceId, vid: &str) -> Result<PartitionId>;
}

/// Row encoding against a schema.
pub trait RowCodec: Send + Sync + 'static {
    /// `prop_names` empty means `props` follow schema column order.
    fn encode(
        &self,
        schema: &Schema,
        prop_names: &[String],
        props: &[Value],
    ) -> Result<Vec<u8>, WriteResult>;

    /// Decode into values in schema column order.
    fn decode(&self, schema: &Schema, bytes: &[u8]) -> Result<Vec<Value>>;
}

/// Atomic two-partition writer used for indexed edge mutations.
///
/// Implementations guarantee `batch` is applied consistently to both the local
/// and the remote partition of the chain, or to neither.
#[async_trait]
pub trait ChainWriter: Send + Sync + 'static {
    async fn write(
        &self,
        vid_len: usize,
        space: GraphSpaceId,
        local: PartitionId,
        remote: PartitionId,
        batch: Vec<KeyValue>,
    ) -> ErrorCode;
}

/// Everything a processor needs from the outside world.
#[derive(Clone)]
pub struct StorageEnv {
    pub gateway: Arc<dyn PartitionGateway>,
    pub schemas: Arc<dyn SchemaCatalog>,
    pub indexes: Arc<dyn IndexCatalog>,
    pub locator: Arc<dyn PartitionLocator>,
    pub codec: Arc<dyn RowCodec>,
    pub chain_writer: Arc<dyn ChainWriter>,
    /// Row cache for vertex data joins; `None` reads the engine every time.
    pub vertex_cache: Option<Arc<VertexCache>>,
    pub config: ProcessorConfig,
}

impl StorageEnv {
    /// Drops the cached row of one tag of `vid`, if caching is on.
    pub fn evict_vertex_row(&self, space: GraphSpaceId, vid: &str, tag: TagId) {
        if let Some(cache) = &self.vertex_cache {
            cache.evict(space, vid, tag);
        }
    }
}
