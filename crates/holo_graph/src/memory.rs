//! In-memory reference collaborators.
//!
//! These back the workload binary and the tests. They honour the collaborator
//! contracts but make no durability or replication claims; a real node plugs
//! its replicated engine and catalog clients into `StorageEnv` instead.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cache::VertexCache;
use crate::codec::JsonRowCodec;
use crate::config::ProcessorConfig;
use crate::env::{
    ChainWriter, IndexCatalog, PartitionGateway, PartitionLocator, SchemaCatalog, StorageEnv,
};
use crate::error::{EngineCode, ErrorCode};
use crate::types::{
    EdgeType, GraphSpaceId, HostAddr, IndexId, IndexItem, KeyValue, PartitionId, Schema,
    SchemaRef, TagId,
};

type PartKey = (GraphSpaceId, PartitionId);

/// Partition-scoped ordered KV maps with injectable failures.
#[derive(Default)]
pub struct MemoryPartitionStore {
    parts: RwLock<HashMap<PartKey, BTreeMap<Vec<u8>, Vec<u8>>>>,
    leaders: RwLock<HashMap<PartKey, HostAddr>>,
    failures: RwLock<HashMap<PartKey, EngineCode>>,
    put_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl MemoryPartitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_part(&self, space: GraphSpaceId, part: PartitionId, leader: HostAddr) {
        if let Ok(mut guard) = self.parts.write() {
            guard.entry((space, part)).or_default();
        }
        if let Ok(mut guard) = self.leaders.write() {
            guard.insert((space, part), leader);
        }
    }

    /// Every later write to the partition reports `code`.
    pub fn fail_part(&self, space: GraphSpaceId, part: PartitionId, code: EngineCode) {
        if let Ok(mut guard) = self.failures.write() {
            guard.insert((space, part), code);
        }
    }

    pub fn heal_part(&self, space: GraphSpaceId, part: PartitionId) {
        if let Ok(mut guard) = self.failures.write() {
            guard.remove(&(space, part));
        }
    }

    pub fn clear_leader(&self, space: GraphSpaceId, part: PartitionId) {
        if let Ok(mut guard) = self.leaders.write() {
            guard.remove(&(space, part));
        }
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::Acquire)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::Acquire)
    }

    /// Number of keys stored in one partition.
    pub fn len(&self, space: GraphSpaceId, part: PartitionId) -> usize {
        self.parts
            .read()
            .ok()
            .and_then(|guard| guard.get(&(space, part)).map(BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, space: GraphSpaceId, part: PartitionId) -> bool {
        self.len(space, part) == 0
    }

    fn injected(&self, space: GraphSpaceId, part: PartitionId) -> Option<EngineCode> {
        self.failures.read().ok()?.get(&(space, part)).copied()
    }

    fn write_part(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        apply: impl FnOnce(&mut BTreeMap<Vec<u8>, Vec<u8>>),
    ) -> EngineCode {
        if let Some(code) = self.injected(space, part) {
            return code;
        }
        let Ok(mut guard) = self.parts.write() else {
            return EngineCode::Unknown;
        };
        let Some(data) = guard.get_mut(&(space, part)) else {
            return EngineCode::PartNotFound;
        };
        apply(data);
        EngineCode::Succeeded
    }

    fn read_part<T>(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        read: impl FnOnce(&BTreeMap<Vec<u8>, Vec<u8>>) -> T,
    ) -> Result<T, EngineCode> {
        let guard = self.parts.read().map_err(|_| EngineCode::Unknown)?;
        let data = guard.get(&(space, part)).ok_or(EngineCode::PartNotFound)?;
        Ok(read(data))
    }
}

#[async_trait]
impl PartitionGateway for MemoryPartitionStore {
    async fn multi_put(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        batch: Vec<KeyValue>,
    ) -> EngineCode {
        self.put_calls.fetch_add(1, Ordering::AcqRel);
        self.write_part(space, part, |data| data.extend(batch))
    }

    async fn multi_remove(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        keys: Vec<Vec<u8>>,
    ) -> EngineCode {
        self.remove_calls.fetch_add(1, Ordering::AcqRel);
        self.write_part(space, part, |data| {
            for key in keys {
                data.remove(&key);
            }
        })
    }

    async fn remove_range(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        start: Vec<u8>,
        end: Vec<u8>,
    ) -> EngineCode {
        self.remove_calls.fetch_add(1, Ordering::AcqRel);
        self.write_part(space, part, |data| {
            if start >= end {
                return;
            }
            let doomed: Vec<Vec<u8>> = data
                .range::<[u8], _>((Bound::Included(&start[..]), Bound::Excluded(&end[..])))
                .map(|(key, _)| key.clone())
                .collect();
            for key in doomed {
                data.remove(&key);
            }
        })
    }

    async fn atomic_write(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        removes: Vec<Vec<u8>>,
        puts: Vec<KeyValue>,
    ) -> EngineCode {
        self.put_calls.fetch_add(1, Ordering::AcqRel);
        self.write_part(space, part, |data| {
            for key in removes {
                data.remove(&key);
            }
            data.extend(puts);
        })
    }

    fn part_leader(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
    ) -> Result<HostAddr, EngineCode> {
        let guard = self.leaders.read().map_err(|_| EngineCode::Unknown)?;
        guard.get(&(space, part)).cloned().ok_or(EngineCode::PartNotFound)
    }

    fn get(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, EngineCode> {
        self.read_part(space, part, |data| data.get(key).cloned())
    }

    fn prefix(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        prefix: &[u8],
    ) -> Result<Vec<KeyValue>, EngineCode> {
        self.read_part(space, part, |data| {
            data.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
    }

    fn range(
        &self,
        space: GraphSpaceId,
        part: PartitionId,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<KeyValue>, EngineCode> {
        if start >= end {
            return Ok(Vec::new());
        }
        self.read_part(space, part, |data| {
            data.range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
    }
}

#[derive(Default)]
struct CatalogState {
    vid_lens: HashMap<GraphSpaceId, usize>,
    tags: HashMap<(GraphSpaceId, TagId), (String, Arc<Schema>)>,
    edges: HashMap<(GraphSpaceId, EdgeType), (String, Arc<Schema>)>,
    indexes: BTreeMap<(GraphSpaceId, IndexId), Arc<IndexItem>>,
    broken_listings: HashSet<GraphSpaceId>,
}

/// Schema and index catalog backed by in-process maps.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_space(&self, space: GraphSpaceId, vid_len: usize) {
        if let Ok(mut state) = self.state.write() {
            state.vid_lens.insert(space, vid_len);
        }
    }

    pub fn add_tag(&self, space: GraphSpaceId, tag: TagId, name: &str, schema: Schema) {
        if let Ok(mut state) = self.state.write() {
            state
                .tags
                .insert((space, tag), (name.to_string(), Arc::new(schema)));
        }
    }

    pub fn add_edge(&self, space: GraphSpaceId, edge: EdgeType, name: &str, schema: Schema) {
        if let Ok(mut state) = self.state.write() {
            state
                .edges
                .insert((space, edge), (name.to_string(), Arc::new(schema)));
        }
    }

    pub fn add_index(&self, space: GraphSpaceId, index: IndexItem) {
        if let Ok(mut state) = self.state.write() {
            state.indexes.insert((space, index.index_id), Arc::new(index));
        }
    }

    /// Makes index listings for `space` fail, as an unreachable catalog would.
    pub fn break_index_listing(&self, space: GraphSpaceId) {
        if let Ok(mut state) = self.state.write() {
            state.broken_listings.insert(space);
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, CatalogState>> {
        self.state
            .read()
            .map_err(|_| anyhow!("catalog state lock poisoned"))
    }

    fn index(
        &self,
        space: GraphSpaceId,
        index: IndexId,
        want_edge: bool,
    ) -> Result<Arc<IndexItem>> {
        let state = self.read()?;
        let item = state
            .indexes
            .get(&(space, index))
            .ok_or_else(|| anyhow!("index {index} not found in space {space}"))?;
        let is_edge = matches!(item.schema, SchemaRef::Edge(_));
        if is_edge != want_edge {
            bail!("index {index} in space {space} has the wrong schema kind");
        }
        Ok(item.clone())
    }

    fn list(&self, space: GraphSpaceId, want_edge: bool) -> Result<Vec<Arc<IndexItem>>> {
        let state = self.read()?;
        if !state.vid_lens.contains_key(&space) || state.broken_listings.contains(&space) {
            bail!("failed to list indexes of space {space}");
        }
        Ok(state
            .indexes
            .iter()
            .filter(|((item_space, _), item)| {
                *item_space == space && matches!(item.schema, SchemaRef::Edge(_)) == want_edge
            })
            .map(|(_, item)| item.clone())
            .collect())
    }
}

impl SchemaCatalog for MemoryCatalog {
    fn space_vid_len(&self, space: GraphSpaceId) -> Result<usize> {
        let state = self.read()?;
        let vid_len = state
            .vid_lens
            .get(&space)
            .copied()
            .ok_or_else(|| anyhow!("space {space} not found"))?;
        if vid_len == 0 {
            bail!("space {space} has invalid vid length 0");
        }
        Ok(vid_len)
    }

    fn tag_schema(&self, space: GraphSpaceId, tag: TagId) -> Option<Arc<Schema>> {
        let state = self.read().ok()?;
        state.tags.get(&(space, tag)).map(|(_, schema)| schema.clone())
    }

    fn edge_schema(&self, space: GraphSpaceId, edge: EdgeType) -> Option<Arc<Schema>> {
        let state = self.read().ok()?;
        state.edges.get(&(space, edge)).map(|(_, schema)| schema.clone())
    }

    fn tag_name(&self, space: GraphSpaceId, tag: TagId) -> Result<String> {
        let state = self.read()?;
        state
            .tags
            .get(&(space, tag))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| anyhow!("tag {tag} not found in space {space}"))
    }

    fn edge_name(&self, space: GraphSpaceId, edge: EdgeType) -> Result<String> {
        let state = self.read()?;
        state
            .edges
            .get(&(space, edge))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| anyhow!("edge {edge} not found in space {space}"))
    }
}

impl IndexCatalog for MemoryCatalog {
    fn tag_index(&self, space: GraphSpaceId, index: IndexId) -> Result<Arc<IndexItem>> {
        self.index(space, index, false)
    }

    fn edge_index(&self, space: GraphSpaceId, index: IndexId) -> Result<Arc<IndexItem>> {
        self.index(space, index, true)
    }

    fn tag_indexes(&self, space: GraphSpaceId) -> Result<Vec<Arc<IndexItem>>> {
        self.list(space, false)
    }

    fn edge_indexes(&self, space: GraphSpaceId) -> Result<Vec<Arc<IndexItem>>> {
        self.list(space, true)
    }
}

fn hash_bucket(bytes: &[u8], bucket_count: u32) -> u32 {
    let count = bucket_count.max(1);
    let mut mixed: u64 = 0x9E37_79B9_7F4A_7C15;
    for b in bytes {
        mixed ^= u64::from(*b);
        mixed = mixed.wrapping_mul(0xBF58_476D_1CE4_E5B9);
        mixed ^= mixed >> 27;
        mixed = mixed.wrapping_mul(0x94D0_49BB_1331_11EB);
        mixed ^= mixed >> 31;
    }
    (mixed % u64::from(count)) as u32
}

/// Hash placement over partitions `1..=num_parts`.
#[derive(Debug, Clone, Copy)]
pub struct HashPartitionLocator {
    num_parts: u32,
}

impl HashPartitionLocator {
    pub fn new(num_parts: u32) -> Self {
        Self { num_parts }
    }
}

impl PartitionLocator for HashPartitionLocator {
    fn part_id(&self, space: GraphSpaceId, vid: &str) -> Result<PartitionId> {
        if self.num_parts == 0 {
            bail!("space {space} has no partitions");
        }
        Ok(hash_bucket(vid.as_bytes(), self.num_parts) as PartitionId + 1)
    }
}

/// Chain writer that serializes writes per chain and applies them to the
/// local partition of the store.
pub struct LocalChainWriter {
    store: Arc<MemoryPartitionStore>,
    chains: std::sync::Mutex<HashMap<(PartitionId, PartitionId), Arc<Mutex<()>>>>,
    calls: AtomicUsize,
}

impl LocalChainWriter {
    pub fn new(store: Arc<MemoryPartitionStore>) -> Self {
        Self {
            store,
            chains: std::sync::Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    fn chain_lock(&self, local: PartitionId, remote: PartitionId) -> Option<Arc<Mutex<()>>> {
        let mut chains = self.chains.lock().ok()?;
        Some(chains.entry((local, remote)).or_default().clone())
    }
}

#[async_trait]
impl ChainWriter for LocalChainWriter {
    async fn write(
        &self,
        _vid_len: usize,
        space: GraphSpaceId,
        local: PartitionId,
        remote: PartitionId,
        batch: Vec<KeyValue>,
    ) -> ErrorCode {
        self.calls.fetch_add(1, Ordering::AcqRel);
        let Some(lock) = self.chain_lock(local, remote) else {
            return ErrorCode::Unknown;
        };
        let _guard = lock.lock().await;
        ErrorCode::from(self.store.multi_put(space, local, batch).await)
    }
}

/// A fully in-memory environment plus handles to its concrete parts.
pub struct MemoryCluster {
    pub store: Arc<MemoryPartitionStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub chain_writer: Arc<LocalChainWriter>,
    pub env: StorageEnv,
}

impl MemoryCluster {
    /// One space with partitions `1..=num_parts`, all led by `local`.
    pub fn new(
        space: GraphSpaceId,
        num_parts: u32,
        vid_len: usize,
        local: HostAddr,
        config: ProcessorConfig,
    ) -> Self {
        let store = Arc::new(MemoryPartitionStore::new());
        for part in 1..=num_parts {
            store.add_part(space, part as PartitionId, local.clone());
        }
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.add_space(space, vid_len);
        let chain_writer = Arc::new(LocalChainWriter::new(store.clone()));
        let env = StorageEnv {
            gateway: store.clone(),
            schemas: catalog.clone(),
            indexes: catalog.clone(),
            locator: Arc::new(HashPartitionLocator::new(num_parts)),
            codec: Arc::new(JsonRowCodec),
            chain_writer: chain_writer.clone(),
            vertex_cache: VertexCache::with_capacity(config.vertex_cache_capacity).map(Arc::new),
            config,
        };
        Self {
            store,
            catalog,
            chain_writer,
            env,
        }
    }
}
