//! Synthetic workload for the graph storage processors.
//!
//! Loads random players and follow edges into an in-memory cluster through the
//! mutation processors, then replays index lookups of every plan shape for a
//! fixed duration. Per-phase outcomes are written as a JSON summary.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use holo_graph::cache::CacheStats;
use holo_graph::expr::{Expression, RelOp};
use holo_graph::memory::{HashPartitionLocator, MemoryCluster};
use holo_graph::types::{
    AddEdgesRequest, AddVerticesRequest, ColumnDef, ColumnHint, EdgeKey, ExecResponse, HostAddr,
    IndexItem, IndexQueryContext, IndexSpec, LookupIndexRequest, NewEdge, NewTag, NewVertex,
    PartitionId, PropertyType, ScanType, Schema, SchemaRef, Value,
};
use holo_graph::{
    AddEdgesAtomicProcessor, AddVerticesProcessor, LookupProcessor, PartitionLocator,
    ProcessorConfig,
};

const SPACE: i32 = 1;
const PLAYER: i32 = 1;
const FOLLOW: i32 = 2;
const PLAYER_AGE_INDEX: i32 = 11;
const FOLLOW_DEGREE_INDEX: i32 = 21;

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "holo-graph-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

/// CLI options for running the workload.
#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Number of partitions in the synthetic space.
    #[arg(long, default_value_t = 8)]
    parts: u32,

    /// Number of player vertices to insert.
    #[arg(long, default_value_t = 10_000)]
    vertices: usize,

    /// Number of follow edges to insert.
    #[arg(long, default_value_t = 40_000)]
    edges: usize,

    /// Fixed vertex id width of the space.
    #[arg(long, default_value_t = 16)]
    vid_len: usize,

    /// Vertices or edges per mutation request.
    #[arg(long, default_value_t = 256)]
    batch: usize,

    /// Register indexes on `player(age)` and `follow(degree)`. Without them
    /// edge inserts degrade to plain puts and the lookup phase is skipped.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    with_index: bool,

    /// How long to replay lookups after loading.
    #[arg(long, default_value = "2s")]
    duration: humantime::Duration,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Overrides `HOLO_GRAPH_MAX_CHAIN_INFLIGHT`.
    #[arg(long)]
    max_chain_inflight: Option<usize>,

    /// Overrides `HOLO_GRAPH_VERTEX_CACHE_CAPACITY` (0 disables the cache).
    #[arg(long)]
    vertex_cache: Option<usize>,

    /// Write the JSON summary to this path.
    #[arg(long, default_value = ".tmp/holo_graph/summary.json")]
    out: PathBuf,
}

#[derive(serde::Serialize, Debug, Clone)]
struct SummaryMeta {
    parts: u32,
    vertices: usize,
    edges: usize,
    vid_len: usize,
    batch: usize,
    with_index: bool,
    seed: u64,
    duration_ms: u64,
    max_chain_inflight: usize,
    lookup_max_rows: usize,
    vertex_cache_capacity: usize,
}

/// Aggregated outcome of every request issued in one phase.
#[derive(serde::Serialize, Debug, Clone, Default)]
struct PhaseStats {
    requests: u64,
    failed_parts: u64,
    rows: u64,
    total_latency_us: u64,
    max_latency_us: u64,
    codes: BTreeMap<String, u64>,
}

impl PhaseStats {
    fn record(&mut self, response: &ExecResponse, rows: usize) {
        self.requests += 1;
        self.failed_parts += response.failed_parts.len() as u64;
        self.rows += rows as u64;
        self.total_latency_us += response.latency_us;
        self.max_latency_us = self.max_latency_us.max(response.latency_us);
        for result in &response.failed_parts {
            *self.codes.entry(result.code.to_string()).or_default() += 1;
        }
    }
}

#[derive(serde::Serialize, Debug, Clone)]
struct Summary {
    meta: SummaryMeta,
    phases: BTreeMap<String, PhaseStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vertex_cache: Option<CacheStats>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("holo_graph=info,holo_graph_workload=info,warn")
            }),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.parts > 0, "--parts must be > 0");
    anyhow::ensure!(args.vertices > 0, "--vertices must be > 0");
    anyhow::ensure!(args.batch > 0, "--batch must be > 0");
    anyhow::ensure!(
        vertex_id(args.vertices).len() <= args.vid_len,
        "--vid-len {} is too small for {} vertices",
        args.vid_len,
        args.vertices
    );

    let mut config = ProcessorConfig::from_env().context("load processor config")?;
    if let Some(limit) = args.max_chain_inflight {
        config.max_chain_inflight = limit.max(1);
    }
    if let Some(capacity) = args.vertex_cache {
        config.vertex_cache_capacity = capacity;
    }
    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };
    let mut rng = SmallRng::seed_from_u64(seed);

    let cluster = MemoryCluster::new(
        SPACE,
        args.parts,
        args.vid_len,
        HostAddr::new("127.0.0.1", 9779),
        config.clone(),
    );
    register_schemas(&cluster, args.with_index);
    let locator = HashPartitionLocator::new(args.parts);
    info!(
        parts = args.parts,
        vertices = args.vertices,
        edges = args.edges,
        with_index = args.with_index,
        seed,
        "starting graph workload"
    );

    let mut phases = BTreeMap::new();
    phases.insert(
        "add_vertices".to_string(),
        load_vertices(&cluster, &locator, &args, &mut rng).await?,
    );
    phases.insert(
        "add_edges_atomic".to_string(),
        load_edges(&cluster, &locator, &args, &mut rng).await?,
    );

    let duration: Duration = args.duration.into();
    if args.with_index {
        for (name, stats) in replay_lookups(&cluster, args.parts, duration).await {
            phases.insert(format!("lookup_{name}"), stats);
        }
    } else {
        warn!("indexes disabled; skipping lookup phase");
    }

    for (name, stats) in &phases {
        info!(
            phase = %name,
            requests = stats.requests,
            failed_parts = stats.failed_parts,
            rows = stats.rows,
            max_latency_us = stats.max_latency_us,
            "phase finished"
        );
    }

    let vertex_cache = cluster.env.vertex_cache.as_ref().map(|cache| cache.stats());
    if let Some(stats) = &vertex_cache {
        info!(
            hits = stats.hits,
            misses = stats.misses,
            len = stats.len,
            "vertex cache"
        );
    }

    let summary = Summary {
        meta: SummaryMeta {
            parts: args.parts,
            vertices: args.vertices,
            edges: args.edges,
            vid_len: args.vid_len,
            batch: args.batch,
            with_index: args.with_index,
            seed,
            duration_ms: duration.as_millis() as u64,
            max_chain_inflight: config.max_chain_inflight,
            lookup_max_rows: config.lookup_max_rows,
            vertex_cache_capacity: config.vertex_cache_capacity,
        },
        phases,
        vertex_cache,
    };
    write_summary(&args.out, &summary).context("write summary")?;
    info!(path = %args.out.display(), "wrote summary");
    Ok(())
}

fn vertex_id(idx: usize) -> String {
    format!("v{idx}")
}

fn register_schemas(cluster: &MemoryCluster, with_index: bool) {
    cluster.catalog.add_tag(
        SPACE,
        PLAYER,
        "player",
        Schema::new(vec![
            ColumnDef::new("age", PropertyType::Int64),
            ColumnDef::new("name", PropertyType::String),
        ]),
    );
    cluster.catalog.add_edge(
        SPACE,
        FOLLOW,
        "follow",
        Schema::new(vec![
            ColumnDef::new("degree", PropertyType::Int64),
            ColumnDef::new("since", PropertyType::Timestamp).nullable(),
        ]),
    );
    if !with_index {
        return;
    }
    cluster.catalog.add_index(
        SPACE,
        IndexItem {
            index_id: PLAYER_AGE_INDEX,
            index_name: "player_age".to_string(),
            schema: SchemaRef::Tag(PLAYER),
            fields: vec![ColumnDef::new("age", PropertyType::Int64)],
        },
    );
    cluster.catalog.add_index(
        SPACE,
        IndexItem {
            index_id: FOLLOW_DEGREE_INDEX,
            index_name: "follow_degree".to_string(),
            schema: SchemaRef::Edge(FOLLOW),
            fields: vec![ColumnDef::new("degree", PropertyType::Int64)],
        },
    );
}

async fn load_vertices(
    cluster: &MemoryCluster,
    locator: &HashPartitionLocator,
    args: &RunArgs,
    rng: &mut SmallRng,
) -> anyhow::Result<PhaseStats> {
    let mut stats = PhaseStats::default();
    let ids: Vec<usize> = (0..args.vertices).collect();
    for chunk in ids.chunks(args.batch) {
        let mut parts: BTreeMap<PartitionId, Vec<NewVertex>> = BTreeMap::new();
        for idx in chunk {
            let id = vertex_id(*idx);
            let part = locator.part_id(SPACE, &id)?;
            let age: i64 = rng.gen_range(0..100);
            parts.entry(part).or_default().push(NewVertex {
                id,
                tags: vec![NewTag {
                    tag_id: PLAYER,
                    props: vec![Value::Int(age), Value::Str(format!("player-{idx}"))],
                }],
            });
        }
        let req = AddVerticesRequest {
            space_id: SPACE,
            parts,
            prop_names: BTreeMap::from([(PLAYER, vec!["age".to_string(), "name".to_string()])]),
        };
        let response = AddVerticesProcessor::new(cluster.env.clone()).process(req).await;
        stats.record(&response, 0);
    }
    Ok(stats)
}

async fn load_edges(
    cluster: &MemoryCluster,
    locator: &HashPartitionLocator,
    args: &RunArgs,
    rng: &mut SmallRng,
) -> anyhow::Result<PhaseStats> {
    let mut stats = PhaseStats::default();
    let mut remaining = args.edges;
    let mut ranking: i64 = 0;
    while remaining > 0 {
        let count = remaining.min(args.batch);
        remaining -= count;
        let mut parts: BTreeMap<PartitionId, Vec<NewEdge>> = BTreeMap::new();
        for _ in 0..count {
            let src = vertex_id(rng.gen_range(0..args.vertices));
            let dst = vertex_id(rng.gen_range(0..args.vertices));
            let part = locator.part_id(SPACE, &src)?;
            let degree: i64 = rng.gen_range(0..100);
            ranking += 1;
            parts.entry(part).or_default().push(NewEdge {
                key: EdgeKey::new(src, FOLLOW, ranking, dst),
                props: vec![Value::Int(degree)],
            });
        }
        let req = AddEdgesRequest {
            space_id: SPACE,
            parts,
            prop_names: vec!["degree".to_string()],
        };
        let response = AddEdgesAtomicProcessor::new(cluster.env.clone()).process(req).await;
        stats.record(&response, 0);
    }
    Ok(stats)
}

/// One lookup per plan shape plus an edge range lookup.
fn lookup_mix(parts: u32) -> Vec<(&'static str, LookupIndexRequest)> {
    let all_parts: Vec<PartitionId> = (1..=parts as PartitionId).collect();
    let vertex_lookup = |filter: Option<Expression>, yields: &[&str]| LookupIndexRequest {
        space_id: SPACE,
        parts: all_parts.clone(),
        indices: IndexSpec {
            contexts: vec![IndexQueryContext {
                index_id: PLAYER_AGE_INDEX,
                filter: filter.map(|expr| expr.encode()).unwrap_or_default(),
                column_hints: vec![ColumnHint {
                    column_name: "age".to_string(),
                    scan: ScanType::Range {
                        begin: Value::Int(20),
                        end: Value::Int(30),
                    },
                }],
            }],
            is_edge: false,
            tag_or_edge_id: PLAYER,
        },
        return_columns: yields.iter().map(|col| col.to_string()).collect(),
    };
    let not_25 = Expression::rel(
        RelOp::Ne,
        Expression::prop("age"),
        Expression::constant(25_i64),
    );
    let late_names = Expression::rel(
        RelOp::Ge,
        Expression::prop("name"),
        Expression::constant("player-5"),
    );

    vec![
        ("scan_output", vertex_lookup(None, &["age"])),
        ("scan_join_output", vertex_lookup(None, &["name"])),
        ("scan_filter_output", vertex_lookup(Some(not_25), &["age"])),
        ("scan_join_filter_output", vertex_lookup(Some(late_names), &["name"])),
        (
            "edge_range",
            LookupIndexRequest {
                space_id: SPACE,
                parts: all_parts.clone(),
                indices: IndexSpec {
                    contexts: vec![IndexQueryContext {
                        index_id: FOLLOW_DEGREE_INDEX,
                        filter: Vec::new(),
                        column_hints: vec![ColumnHint {
                            column_name: "degree".to_string(),
                            scan: ScanType::Prefix(Value::Int(99)),
                        }],
                    }],
                    is_edge: true,
                    tag_or_edge_id: FOLLOW,
                },
                return_columns: vec!["degree".to_string()],
            },
        ),
    ]
}

/// Replays the lookup mix until `duration` has passed, at least once.
async fn replay_lookups(
    cluster: &MemoryCluster,
    parts: u32,
    duration: Duration,
) -> BTreeMap<&'static str, PhaseStats> {
    let mix = lookup_mix(parts);
    let mut stats: BTreeMap<&'static str, PhaseStats> = BTreeMap::new();
    let deadline = time::Instant::now() + duration;
    loop {
        for (name, req) in &mix {
            let response = LookupProcessor::new(cluster.env.clone())
                .process(req.clone())
                .await;
            stats
                .entry(*name)
                .or_default()
                .record(&response.result, response.data.rows.len());
        }
        if time::Instant::now() >= deadline {
            break;
        }
    }
    stats
}

fn write_summary(path: &PathBuf, summary: &Summary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(summary).context("serialize summary")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
