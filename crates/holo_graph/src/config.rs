//! Processor tuning knobs.

use anyhow::{bail, Context, Result};

const DEFAULT_MAX_CHAIN_INFLIGHT: usize = 64;
const DEFAULT_LOOKUP_MAX_ROWS: usize = 100_000;

/// Runtime configuration shared by all processors of one storage node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Upper bound on concurrently outstanding chain writes per request.
    pub max_chain_inflight: usize,
    /// Upper bound on rows returned by one lookup. `0` disables the bound.
    pub lookup_max_rows: usize,
    /// Log every chain outcome at info level.
    pub trace_chains: bool,
    /// Entries kept in the vertex row cache. `0` disables the cache.
    pub vertex_cache_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_chain_inflight: DEFAULT_MAX_CHAIN_INFLIGHT,
            lookup_max_rows: DEFAULT_LOOKUP_MAX_ROWS,
            trace_chains: false,
            vertex_cache_capacity: 0,
        }
    }
}

impl ProcessorConfig {
    /// Reads `HOLO_GRAPH_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_chain_inflight = parse_usize(
            lookup("HOLO_GRAPH_MAX_CHAIN_INFLIGHT"),
            DEFAULT_MAX_CHAIN_INFLIGHT,
        )?
        .max(1);
        let lookup_max_rows =
            parse_usize(lookup("HOLO_GRAPH_LOOKUP_MAX_ROWS"), DEFAULT_LOOKUP_MAX_ROWS)?;
        let trace_chains = parse_bool(lookup("HOLO_GRAPH_TRACE_CHAINS"), false)?;
        let vertex_cache_capacity = parse_usize(lookup("HOLO_GRAPH_VERTEX_CACHE_CAPACITY"), 0)?;
        Ok(Self {
            max_chain_inflight,
            lookup_max_rows,
            trace_chains,
            vertex_cache_capacity,
        })
    }
}

fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

fn parse_bool(value: Option<String>, default_value: bool) -> Result<bool> {
    match value.as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("TRUE") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("FALSE") | Some("no") => Ok(false),
        Some(raw) => bail!("invalid bool value: {raw}"),
        None => Ok(default_value),
    }
}
