//! Request-processing core of a partitioned graph storage node.
//!
//! Processors turn one client request into partition-local work against the
//! KV engine and fold the per-partition outcomes into a single response:
//!
//! - `processor` owns the fan-out/fan-in completion protocol shared by every
//!   request type.
//! - `plan` builds and runs index lookup plans as a DAG of operators.
//! - `mutate` holds the vertex/edge mutation processors, including the chained
//!   atomic edge writer and the conditional vertex update.
//! - `cache` keeps recently joined vertex rows for lookups.
//!
//! The KV engine, catalogs, row codec and cross-partition writer are
//! collaborators injected through `StorageEnv`; `memory` ships in-process
//! implementations of all of them.

pub mod cache;
pub mod codec;
pub mod config;
pub mod env;
pub mod error;
pub mod expr;
pub mod index;
pub mod keys;
pub mod lookup;
pub mod memory;
pub mod mutate;
pub mod plan;
pub mod processor;
pub mod types;

pub use cache::VertexCache;
pub use config::ProcessorConfig;
pub use env::{
    ChainWriter, IndexCatalog, PartitionGateway, PartitionLocator, RowCodec, SchemaCatalog,
    StorageEnv,
};
pub use error::{write_result_to, EngineCode, ErrorCode, WriteResult};
pub use lookup::LookupProcessor;
pub use mutate::{
    AddEdgesAtomicProcessor, AddEdgesProcessor, AddVerticesProcessor, DeleteEdgesProcessor,
    DeleteVerticesProcessor, UpdateVertexProcessor,
};
pub use processor::{BaseProcessor, CallTracker};
