//! Chained atomic edge insert.
//!
//! Edges are grouped by `ChainId(local, remote)`: the partition holding the
//! source vertex and the partition owning the destination. Each chain is one
//! atomic unit handed to the `ChainWriter`. Spaces without edge indexes have
//! nothing to keep consistent across partitions, so their chains degrade to a
//! plain put into the local partition.

use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::env::StorageEnv;
use crate::error::ErrorCode;
use crate::index::{index_keys_for, named_props, Entity};
use crate::keys::edge_key;
use crate::processor::BaseProcessor;
use crate::types::{
    AddEdgesRequest, ExecResponse, GraphSpaceId, IndexItem, KeyValue, NewEdge, PartitionId,
    SchemaRef,
};

/// Ordered pair of partitions written together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId {
    pub local: PartitionId,
    pub remote: PartitionId,
}

/// Result of splitting a request: chain batches plus partitions that failed
/// while being split.
#[derive(Debug, Default)]
pub struct ChainBatch {
    pub chains: BTreeMap<ChainId, Vec<KeyValue>>,
    pub failed: BTreeMap<PartitionId, ErrorCode>,
}

/// Splits every partition's edges into chains.
///
/// The first destination lookup or encoding failure in a partition is
/// reported once in `failed`. That partition's remaining edges are skipped
/// and the chains it already staged are dropped, so a failed partition has
/// nothing written. Within a chain, edge rows come first and their index
/// entries follow.
pub fn split_into_chains(
    env: &StorageEnv,
    req: &AddEdgesRequest,
    vid_len: usize,
    indexes: &[Arc<IndexItem>],
) -> ChainBatch {
    let mut batch = ChainBatch::default();
    for (part, edges) in &req.parts {
        let mut staged = StagedChains::new();
        if let Err(code) = stage_part(env, req, vid_len, *part, edges, indexes, &mut staged) {
            debug!(part, dropped_chains = staged.len(), "partition failed while splitting");
            batch.failed.insert(*part, code);
            continue;
        }
        for (chain, (mut rows, index_entries)) in staged {
            rows.extend(index_entries);
            batch.chains.insert(chain, rows);
        }
    }
    batch
}

type StagedChains = BTreeMap<ChainId, (Vec<KeyValue>, Vec<KeyValue>)>;

fn stage_part(
    env: &StorageEnv,
    req: &AddEdgesRequest,
    vid_len: usize,
    part: PartitionId,
    edges: &[NewEdge],
    indexes: &[Arc<IndexItem>],
    staged: &mut StagedChains,
) -> Result<(), ErrorCode> {
    let space_id = req.space_id;
    for edge in edges {
        let remote = env
            .locator
            .part_id(space_id, &edge.key.dst)
            .map_err(|err| {
                warn!(
                    space = space_id,
                    part,
                    dst = %edge.key.dst,
                    error = %err,
                    "failed to resolve destination partition"
                );
                ErrorCode::SpaceNotFound
            })?;
        let edge_type = edge.key.edge_type;
        let schema = env
            .schemas
            .edge_schema(space_id, edge_type)
            .ok_or(ErrorCode::SpaceNotFound)?;
        let row = env
            .codec
            .encode(&schema, &req.prop_names, &edge.props)
            .map_err(|result| {
                warn!(space = space_id, part, edge_type, ?result, "failed to encode edge");
                ErrorCode::DataTypeMismatch
            })?;
        let key = edge_key(vid_len, part, &edge.key)?;
        let index_keys = if indexes.is_empty() {
            Vec::new()
        } else {
            let props = named_props(&schema, &req.prop_names, &edge.props);
            index_keys_for(
                vid_len,
                part,
                SchemaRef::Edge(edge_type),
                &Entity::Edge(edge.key.clone()),
                &props,
                indexes,
            )?
        };

        let (rows, index_entries) = staged
            .entry(ChainId {
                local: part,
                remote,
            })
            .or_default();
        rows.push((key, row));
        index_entries.extend(index_keys.into_iter().map(|key| (key, Vec::new())));
    }
    Ok(())
}

/// Edge insert that keeps both endpoints' partitions consistent.
pub struct AddEdgesAtomicProcessor {
    env: StorageEnv,
}

impl AddEdgesAtomicProcessor {
    pub fn new(env: StorageEnv) -> Self {
        Self { env }
    }

    pub async fn process(self, req: AddEdgesRequest) -> ExecResponse {
        let space_id = req.space_id;
        let parts: Vec<PartitionId> = req.parts.keys().copied().collect();
        let base = BaseProcessor::new(self.env.clone(), space_id, parts.len());

        let vid_len = match self.env.schemas.space_vid_len(space_id) {
            Ok(vid_len) => vid_len,
            Err(err) => {
                warn!(space = space_id, error = %err, "failed to resolve vid length");
                return Self::fail_all(base, &parts, ErrorCode::InvalidSpaceVidLen).await;
            }
        };
        let indexes = match self.env.indexes.edge_indexes(space_id) {
            Ok(indexes) => indexes,
            Err(err) => {
                warn!(space = space_id, error = %err, "failed to list edge indexes");
                return Self::fail_all(base, &parts, ErrorCode::SpaceNotFound).await;
            }
        };

        let ChainBatch { chains, mut failed } =
            split_into_chains(&self.env, &req, vid_len, &indexes);
        let atomic = !indexes.is_empty();
        debug!(
            space = space_id,
            chains = chains.len(),
            failed_parts = failed.len(),
            atomic,
            "edge batch split into chains"
        );

        // Every chain reports before any partition outcome reaches the tracker.
        for (chain, code) in self.write_chains(space_id, vid_len, chains, atomic).await {
            if !code.is_ok() {
                failed.entry(chain.local).or_insert(code);
            }
        }
        for part in parts {
            let code = failed.get(&part).copied().unwrap_or(ErrorCode::Succeeded);
            base.handle_error_code(part, code);
        }
        base.finish().await
    }

    async fn fail_all(
        base: BaseProcessor,
        parts: &[PartitionId],
        code: ErrorCode,
    ) -> ExecResponse {
        for part in parts {
            base.handle_error_code(*part, code);
        }
        base.finish().await
    }

    async fn write_chains(
        &self,
        space_id: GraphSpaceId,
        vid_len: usize,
        chains: BTreeMap<ChainId, Vec<KeyValue>>,
        atomic: bool,
    ) -> Vec<(ChainId, ErrorCode)> {
        if chains.is_empty() {
            return Vec::new();
        }
        let inflight_limit = self.env.config.max_chain_inflight.max(1).min(chains.len());
        let mut pending: VecDeque<(ChainId, Vec<KeyValue>)> = chains.into_iter().collect();
        let mut inflight = FuturesUnordered::<BoxFuture<'static, (ChainId, ErrorCode)>>::new();
        let mut results = Vec::with_capacity(pending.len());

        // Prime up to the in-flight bound.
        while inflight.len() < inflight_limit {
            let Some((chain, batch)) = pending.pop_front() else {
                break;
            };
            inflight.push(self.write_chain(space_id, vid_len, chain, batch, atomic));
        }

        // Refill as each chain reports until all are drained.
        while let Some((chain, code)) = inflight.next().await {
            if self.env.config.trace_chains {
                info!(
                    space = space_id,
                    local = chain.local,
                    remote = chain.remote,
                    code = ?code,
                    "chain write finished"
                );
            } else {
                debug!(
                    space = space_id,
                    local = chain.local,
                    remote = chain.remote,
                    code = ?code,
                    "chain write finished"
                );
            }
            results.push((chain, code));
            while inflight.len() < inflight_limit {
                let Some((chain, batch)) = pending.pop_front() else {
                    break;
                };
                inflight.push(self.write_chain(space_id, vid_len, chain, batch, atomic));
            }
        }
        results
    }

    fn write_chain(
        &self,
        space_id: GraphSpaceId,
        vid_len: usize,
        chain: ChainId,
        batch: Vec<KeyValue>,
        atomic: bool,
    ) -> BoxFuture<'static, (ChainId, ErrorCode)> {
        let env = self.env.clone();
        Box::pin(async move {
            let write = async move {
                if atomic {
                    env.chain_writer
                        .write(vid_len, space_id, chain.local, chain.remote, batch)
                        .await
                } else {
                    ErrorCode::from(env.gateway.multi_put(space_id, chain.local, batch).await)
                }
            };
            let code = match AssertUnwindSafe(write).catch_unwind().await {
                Ok(code) => code,
                Err(_) => {
                    error!(
                        space = space_id,
                        local = chain.local,
                        remote = chain.remote,
                        "chain write panicked"
                    );
                    ErrorCode::Unknown
                }
            };
            (chain, code)
        })
    }
}
