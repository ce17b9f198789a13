//! Secondary index key encoding.
//!
//! An index key is laid out as
//!
//! ```text
//! kind | part(3) | index_id(4) | values... | [null bitmap(2)] | entity | [len(4) per string]
//! ```
//!
//! Fixed-width values are stored order-preserving so prefix and range scans
//! over the leading columns follow value order. String values are stored raw
//! and their lengths trail the key, which is why decoding needs the column
//! types, the vid length, the nullable flag and the string column count.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ErrorCode;
use crate::keys::{
    decode_f64_ordered, decode_i64_ordered, encode_f64_ordered, encode_i64_ordered, index_prefix,
    pad_vid, unpad_vid, INDEX_PREFIX_LEN, KIND_INDEX,
};
use crate::types::{
    ColumnDef, EdgeKey, IndexId, IndexItem, PartitionId, PropertyType, Schema, SchemaRef, Value,
    VertexId,
};

const MAX_NULLABLE_COLUMNS: usize = 16;

/// What an index entry points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    Vertex(VertexId),
    Edge(EdgeKey),
}

/// Everything needed to encode and decode the keys of one index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexKeyLayout {
    pub index_id: IndexId,
    pub owner: SchemaRef,
    pub cols: Vec<ColumnDef>,
    pub vid_len: usize,
    pub has_nullable: bool,
    pub vcol_num: usize,
}

impl IndexKeyLayout {
    pub fn new(index: &IndexItem, vid_len: usize) -> Self {
        let has_nullable = index.fields.iter().any(|col| col.nullable);
        let vcol_num = index.fields.iter().filter(|col| col.ty.is_var_len()).count();
        Self {
            index_id: index.index_id,
            owner: index.schema,
            cols: index.fields.clone(),
            vid_len,
            has_nullable,
            vcol_num,
        }
    }

    pub fn is_edge(&self) -> bool {
        matches!(self.owner, SchemaRef::Edge(_))
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.cols.iter().position(|col| col.name == column)
    }

    fn entity_len(&self) -> usize {
        if self.is_edge() {
            self.vid_len * 2 + 8
        } else {
            self.vid_len
        }
    }

    /// Prefix covering every entry whose leading columns equal `leading`.
    pub fn scan_prefix(&self, part: PartitionId, leading: &[Value]) -> Result<Vec<u8>, ErrorCode> {
        if leading.len() > self.cols.len() {
            return Err(ErrorCode::InvalidOperation);
        }
        let mut key = index_prefix(part, self.index_id);
        for (col, value) in self.cols.iter().zip(leading) {
            key.extend_from_slice(&encode_value(col, value)?);
        }
        Ok(key)
    }

    pub fn encode_key(
        &self,
        part: PartitionId,
        values: &[Value],
        entity: &Entity,
    ) -> Result<Vec<u8>, ErrorCode> {
        if values.len() != self.cols.len() {
            return Err(ErrorCode::InvalidOperation);
        }
        let mut key = index_prefix(part, self.index_id);
        let mut null_bits: u16 = 0;
        let mut str_lens = Vec::with_capacity(self.vcol_num);
        for (idx, (col, value)) in self.cols.iter().zip(values).enumerate() {
            let encoded = encode_value(col, value)?;
            if value.is_null() {
                if idx >= MAX_NULLABLE_COLUMNS {
                    return Err(ErrorCode::InvalidOperation);
                }
                null_bits |= 1 << idx;
            }
            if col.ty.is_var_len() {
                str_lens.push(encoded.len() as u32);
            }
            key.extend_from_slice(&encoded);
        }
        if self.has_nullable {
            key.extend_from_slice(&null_bits.to_be_bytes());
        }
        match (entity, self.is_edge()) {
            (Entity::Vertex(vid), false) => key.extend_from_slice(&pad_vid(vid, self.vid_len)?),
            (Entity::Edge(edge), true) => {
                key.extend_from_slice(&pad_vid(&edge.src, self.vid_len)?);
                key.extend_from_slice(&encode_i64_ordered(edge.ranking));
                key.extend_from_slice(&pad_vid(&edge.dst, self.vid_len)?);
            }
            _ => return Err(ErrorCode::InvalidOperation),
        }
        for len in str_lens {
            key.extend_from_slice(&len.to_be_bytes());
        }
        Ok(key)
    }

    /// Splits an index key back into its column values and entity.
    pub fn decode_key(&self, key: &[u8]) -> Result<(Vec<Value>, Entity), ErrorCode> {
        let trailer_len = self.vcol_num * 4;
        let bitmap_len = if self.has_nullable { 2 } else { 0 };
        if key.len() < INDEX_PREFIX_LEN + bitmap_len + self.entity_len() + trailer_len
            || key[0] != KIND_INDEX
        {
            return Err(ErrorCode::Unknown);
        }

        let trailer = &key[key.len() - trailer_len..];
        let mut str_lens = trailer
            .chunks_exact(4)
            .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize);

        let mut pos = INDEX_PREFIX_LEN;
        let mut raw_values = Vec::with_capacity(self.cols.len());
        for col in &self.cols {
            let width = match fixed_width(col.ty) {
                Some(width) => width,
                None => str_lens.next().ok_or(ErrorCode::Unknown)?,
            };
            let raw = key.get(pos..pos + width).ok_or(ErrorCode::Unknown)?;
            raw_values.push(raw);
            pos += width;
        }

        let null_bits = if self.has_nullable {
            let raw = key.get(pos..pos + 2).ok_or(ErrorCode::Unknown)?;
            pos += 2;
            u16::from_be_bytes([raw[0], raw[1]])
        } else {
            0
        };

        let entity_raw = key
            .get(pos..pos + self.entity_len())
            .ok_or(ErrorCode::Unknown)?;
        if pos + self.entity_len() + trailer_len != key.len() {
            return Err(ErrorCode::Unknown);
        }
        let entity = match self.owner {
            SchemaRef::Tag(_) => Entity::Vertex(unpad_vid(entity_raw)),
            SchemaRef::Edge(edge_type) => {
                let vid_len = self.vid_len;
                let ranking = decode_i64_ordered(
                    entity_raw[vid_len..vid_len + 8]
                        .try_into()
                        .map_err(|_| ErrorCode::Unknown)?,
                );
                Entity::Edge(EdgeKey {
                    src: unpad_vid(&entity_raw[..vid_len]),
                    edge_type,
                    ranking,
                    dst: unpad_vid(&entity_raw[vid_len + 8..]),
                })
            }
        };

        let values = self
            .cols
            .iter()
            .zip(raw_values)
            .enumerate()
            .map(|(idx, (col, raw))| {
                if idx < MAX_NULLABLE_COLUMNS && null_bits & (1 << idx) != 0 {
                    Ok(Value::Null)
                } else {
                    decode_value(col.ty, raw)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((values, entity))
    }
}

fn fixed_width(ty: PropertyType) -> Option<usize> {
    match ty {
        PropertyType::Bool => Some(1),
        PropertyType::String => None,
        _ => Some(8),
    }
}

/// Encodes one column value in index order.
pub fn encode_value(col: &ColumnDef, value: &Value) -> Result<Vec<u8>, ErrorCode> {
    if value.is_null() {
        if !col.nullable {
            return Err(ErrorCode::NotNullable);
        }
        return Ok(vec![0; fixed_width(col.ty).unwrap_or(0)]);
    }
    let encoded = match (col.ty, value) {
        (PropertyType::Bool, Value::Bool(v)) => vec![u8::from(*v)],
        (
            PropertyType::Int8
            | PropertyType::Int16
            | PropertyType::Int32
            | PropertyType::Int64
            | PropertyType::Timestamp,
            Value::Int(v),
        ) => encode_i64_ordered(*v).to_vec(),
        (PropertyType::Double, Value::Float(v)) => encode_f64_ordered(*v).to_vec(),
        (PropertyType::Double, Value::Int(v)) => encode_f64_ordered(*v as f64).to_vec(),
        (PropertyType::String, Value::Str(v)) => v.as_bytes().to_vec(),
        _ => return Err(ErrorCode::DataTypeMismatch),
    };
    Ok(encoded)
}

fn decode_value(ty: PropertyType, raw: &[u8]) -> Result<Value, ErrorCode> {
    let fixed8 =
        || -> Result<[u8; 8], ErrorCode> { raw.try_into().map_err(|_| ErrorCode::Unknown) };
    let value = match ty {
        PropertyType::Bool => Value::Bool(raw.first().copied().unwrap_or(0) != 0),
        PropertyType::Double => Value::Float(decode_f64_ordered(fixed8()?)),
        PropertyType::String => Value::Str(String::from_utf8_lossy(raw).into_owned()),
        _ => Value::Int(decode_i64_ordered(fixed8()?)),
    };
    Ok(value)
}

/// Props of one row keyed by column name, with schema defaults filled in.
///
/// `prop_names` empty means `props` follow schema column order.
pub fn named_props(
    schema: &Schema,
    prop_names: &[String],
    props: &[Value],
) -> BTreeMap<String, Value> {
    let mut named: BTreeMap<String, Value> = if prop_names.is_empty() {
        schema
            .columns
            .iter()
            .zip(props)
            .map(|(col, value)| (col.name.clone(), value.clone()))
            .collect()
    } else {
        prop_names.iter().cloned().zip(props.iter().cloned()).collect()
    };
    for col in &schema.columns {
        if !named.contains_key(&col.name) {
            named.insert(col.name.clone(), col.default.clone().unwrap_or(Value::Null));
        }
    }
    named
}

/// Props decoded in schema order, keyed by column name.
pub fn props_from_row(schema: &Schema, row: Vec<Value>) -> BTreeMap<String, Value> {
    schema
        .columns
        .iter()
        .map(|col| col.name.clone())
        .zip(row)
        .collect()
}

/// Index keys of `entity` for every index in `indexes` that is built over `owner`.
pub fn index_keys_for(
    vid_len: usize,
    part: PartitionId,
    owner: SchemaRef,
    entity: &Entity,
    props: &BTreeMap<String, Value>,
    indexes: &[Arc<IndexItem>],
) -> Result<Vec<Vec<u8>>, ErrorCode> {
    indexes
        .iter()
        .filter(|index| index.schema == owner)
        .map(|index| {
            let values: Vec<Value> = index
                .fields
                .iter()
                .map(|field| props.get(&field.name).cloned().unwrap_or(Value::Null))
                .collect();
            IndexKeyLayout::new(index, vid_len).encode_key(part, &values, entity)
        })
        .collect()
}
