//! Request, response and schema types exchanged with the processors.
//!
//! These types are intentionally plain data: the transport layer that decodes
//! client requests and the catalog services that own schemas both live outside
//! this crate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::expr::Expression;

pub type GraphSpaceId = i32;
pub type PartitionId = i32;
pub type TagId = i32;
pub type EdgeType = i32;
pub type IndexId = i32;
pub type EdgeRanking = i64;
/// Vertex ids are fixed-length strings padded with `\0` up to the space vid length.
pub type VertexId = String;

/// One encoded key/value pair headed to the KV engine.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Network address of a storage host, used for leader hints.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl HostAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Property value carried by vertices, edges and result rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Double,
    String,
    Timestamp,
}

impl PropertyType {
    /// Whether values of this type have a variable encoded length in index keys.
    pub fn is_var_len(self) -> bool {
        matches!(self, PropertyType::String)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: PropertyType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Latest version of a tag or edge schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn field(&self, name: &str) -> Option<(usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.name == name)
    }
}

/// What a secondary index is built over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaRef {
    Tag(TagId),
    Edge(EdgeType),
}

/// Secondary index descriptor as returned by the index catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub index_id: IndexId,
    pub index_name: String,
    pub schema: SchemaRef,
    pub fields: Vec<ColumnDef>,
}

impl IndexItem {
    pub fn covers(&self, column: &str) -> bool {
        self.fields.iter().any(|field| field.name == column)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub src: VertexId,
    pub edge_type: EdgeType,
    pub ranking: EdgeRanking,
    pub dst: VertexId,
}

impl EdgeKey {
    pub fn new(
        src: impl Into<VertexId>,
        edge_type: EdgeType,
        ranking: EdgeRanking,
        dst: impl Into<VertexId>,
    ) -> Self {
        Self {
            src: src.into(),
            edge_type,
            ranking,
            dst: dst.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTag {
    pub tag_id: TagId,
    pub props: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewVertex {
    pub id: VertexId,
    pub tags: Vec<NewTag>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewEdge {
    pub key: EdgeKey,
    pub props: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AddVerticesRequest {
    pub space_id: GraphSpaceId,
    pub parts: BTreeMap<PartitionId, Vec<NewVertex>>,
    /// Optional property names per tag; positional schema order when absent.
    #[serde(default)]
    pub prop_names: BTreeMap<TagId, Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AddEdgesRequest {
    pub space_id: GraphSpaceId,
    pub parts: BTreeMap<PartitionId, Vec<NewEdge>>,
    /// Optional property names; positional schema order when empty.
    #[serde(default)]
    pub prop_names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteVerticesRequest {
    pub space_id: GraphSpaceId,
    pub parts: BTreeMap<PartitionId, Vec<VertexId>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteEdgesRequest {
    pub space_id: GraphSpaceId,
    pub parts: BTreeMap<PartitionId, Vec<EdgeKey>>,
}

/// New value of one tag property.
///
/// `value` sees the row with every earlier update of the request applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdatedProp {
    pub name: String,
    pub value: Expression,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateVertexRequest {
    pub space_id: GraphSpaceId,
    pub part_id: PartitionId,
    pub vertex_id: VertexId,
    pub tag_id: TagId,
    pub updated_props: Vec<UpdatedProp>,
    /// Insert the row from schema defaults when the vertex has no such tag.
    #[serde(default)]
    pub insertable: bool,
    /// Properties returned after the update, in order.
    #[serde(default)]
    pub return_props: Vec<String>,
    /// Encoded condition expression; empty means unconditional.
    #[serde(default)]
    pub condition: Vec<u8>,
}

/// How a lookup narrows one leading index column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Prefix(Value),
    /// `begin` inclusive, `end` exclusive.
    Range { begin: Value, end: Value },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnHint {
    pub column_name: String,
    pub scan: ScanType,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexQueryContext {
    pub index_id: IndexId,
    /// Encoded filter expression; empty means no filter.
    #[serde(default)]
    pub filter: Vec<u8>,
    #[serde(default)]
    pub column_hints: Vec<ColumnHint>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub contexts: Vec<IndexQueryContext>,
    pub is_edge: bool,
    pub tag_or_edge_id: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupIndexRequest {
    pub space_id: GraphSpaceId,
    pub parts: Vec<PartitionId>,
    pub indices: IndexSpec,
    #[serde(default)]
    pub return_columns: Vec<String>,
}

/// One failed partition in an aggregated response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub part_id: PartitionId,
    pub code: ErrorCode,
    pub leader: Option<HostAddr>,
}

pub type Row = Vec<Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub col_names: Vec<String>,
    pub rows: Vec<Row>,
}

impl DataSet {
    pub fn with_columns(col_names: Vec<String>) -> Self {
        Self {
            col_names,
            rows: Vec::new(),
        }
    }
}

/// Aggregated outcome of one request.
///
/// Success means no failed partition and no request-level rejection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub failed_parts: Vec<PartitionResult>,
    /// Set when the request was rejected before fanning out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_code: Option<ErrorCode>,
    pub latency_us: u64,
}

impl ExecResponse {
    pub fn succeeded(&self) -> bool {
        self.failed_parts.is_empty() && self.request_code.is_none()
    }

    pub fn code_for(&self, part_id: PartitionId) -> Option<ErrorCode> {
        self.failed_parts
            .iter()
            .find(|result| result.part_id == part_id)
            .map(|result| result.code)
    }
}

/// Outcome of an update plus the returned props.
///
/// `props` has the columns `_inserted` then the requested return props, and a
/// single row. It is present on success and when the condition filtered the
/// update out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub result: ExecResponse,
    pub props: Option<DataSet>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupIndexResponse {
    pub result: ExecResponse,
    pub data: DataSet,
}
