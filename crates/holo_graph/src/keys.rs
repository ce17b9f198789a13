//! Key layout for vertex, edge and index entries.
//!
//! Every key starts with a one-byte kind and the partition id as a 3-byte
//! big-endian integer, so a partition's data of one kind is a contiguous range.
//! Vertex ids are padded with `\0` to the space vid length; integers are stored
//! sign-flipped big-endian so byte order equals numeric order.

use crate::error::ErrorCode;
use crate::types::{EdgeKey, EdgeRanking, EdgeType, IndexId, PartitionId, TagId, VertexId};

pub const KIND_VERTEX: u8 = 0x01;
pub const KIND_EDGE: u8 = 0x02;
pub const KIND_INDEX: u8 = 0x03;

pub const PART_PREFIX_LEN: usize = 4;
pub const INDEX_PREFIX_LEN: usize = PART_PREFIX_LEN + 4;

const SIGN_FLIP_MASK_64: u64 = 1u64 << 63;
const SIGN_FLIP_MASK_32: u32 = 1u32 << 31;

pub(crate) fn encode_i64_ordered(value: i64) -> [u8; 8] {
    (value as u64 ^ SIGN_FLIP_MASK_64).to_be_bytes()
}

pub(crate) fn decode_i64_ordered(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_FLIP_MASK_64) as i64
}

pub(crate) fn encode_i32_ordered(value: i32) -> [u8; 4] {
    (value as u32 ^ SIGN_FLIP_MASK_32).to_be_bytes()
}

pub(crate) fn decode_i32_ordered(bytes: [u8; 4]) -> i32 {
    (u32::from_be_bytes(bytes) ^ SIGN_FLIP_MASK_32) as i32
}

/// Total-order preserving encoding of a double.
pub(crate) fn encode_f64_ordered(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let ordered = if bits & SIGN_FLIP_MASK_64 != 0 {
        !bits
    } else {
        bits ^ SIGN_FLIP_MASK_64
    };
    ordered.to_be_bytes()
}

pub(crate) fn decode_f64_ordered(bytes: [u8; 8]) -> f64 {
    let ordered = u64::from_be_bytes(bytes);
    let bits = if ordered & SIGN_FLIP_MASK_64 != 0 {
        ordered ^ SIGN_FLIP_MASK_64
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

pub fn part_prefix(kind: u8, part: PartitionId) -> [u8; PART_PREFIX_LEN] {
    let id = (part as u32).to_be_bytes();
    [kind, id[1], id[2], id[3]]
}

/// Pads `vid` with `\0` up to `vid_len` bytes.
pub fn pad_vid(vid: &str, vid_len: usize) -> Result<Vec<u8>, ErrorCode> {
    let raw = vid.as_bytes();
    if raw.len() > vid_len {
        return Err(ErrorCode::InvalidVid);
    }
    let mut out = Vec::with_capacity(vid_len);
    out.extend_from_slice(raw);
    out.resize(vid_len, 0);
    Ok(out)
}

pub fn unpad_vid(raw: &[u8]) -> VertexId {
    let end = raw
        .iter()
        .rposition(|b| *b != 0)
        .map(|idx| idx + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// All tags of one vertex share this prefix.
pub fn vertex_prefix(vid_len: usize, part: PartitionId, vid: &str) -> Result<Vec<u8>, ErrorCode> {
    let mut key = part_prefix(KIND_VERTEX, part).to_vec();
    key.extend_from_slice(&pad_vid(vid, vid_len)?);
    Ok(key)
}

pub fn vertex_key(
    vid_len: usize,
    part: PartitionId,
    vid: &str,
    tag: TagId,
) -> Result<Vec<u8>, ErrorCode> {
    let mut key = vertex_prefix(vid_len, part, vid)?;
    key.extend_from_slice(&encode_i32_ordered(tag));
    Ok(key)
}

/// Tag id stored in a vertex key.
pub fn parse_vertex_tag(vid_len: usize, key: &[u8]) -> Option<TagId> {
    if key.len() != PART_PREFIX_LEN + vid_len + 4 || key.first() != Some(&KIND_VERTEX) {
        return None;
    }
    let raw: [u8; 4] = key[PART_PREFIX_LEN + vid_len..].try_into().ok()?;
    Some(decode_i32_ordered(raw))
}

pub fn edge_key(vid_len: usize, part: PartitionId, edge: &EdgeKey) -> Result<Vec<u8>, ErrorCode> {
    let mut key = part_prefix(KIND_EDGE, part).to_vec();
    key.extend_from_slice(&pad_vid(&edge.src, vid_len)?);
    key.extend_from_slice(&encode_i32_ordered(edge.edge_type));
    key.extend_from_slice(&encode_i64_ordered(edge.ranking));
    key.extend_from_slice(&pad_vid(&edge.dst, vid_len)?);
    Ok(key)
}

/// Inverse of `edge_key`. `None` when the key is not an edge key of this layout.
pub fn parse_edge_key(vid_len: usize, key: &[u8]) -> Option<EdgeKey> {
    if key.len() != PART_PREFIX_LEN + vid_len * 2 + 12 || key.first() != Some(&KIND_EDGE) {
        return None;
    }
    let body = &key[PART_PREFIX_LEN..];
    let src = unpad_vid(&body[..vid_len]);
    let edge_type: EdgeType = decode_i32_ordered(body[vid_len..vid_len + 4].try_into().ok()?);
    let ranking: EdgeRanking =
        decode_i64_ordered(body[vid_len + 4..vid_len + 12].try_into().ok()?);
    let dst = unpad_vid(&body[vid_len + 12..]);
    Some(EdgeKey {
        src,
        edge_type,
        ranking,
        dst,
    })
}

pub fn index_prefix(part: PartitionId, index: IndexId) -> Vec<u8> {
    let mut key = part_prefix(KIND_INDEX, part).to_vec();
    key.extend_from_slice(&encode_i32_ordered(index));
    key
}

/// Smallest key strictly greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last != u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    // Only reachable for an all-0xff prefix; every real key kind is below it.
    vec![u8::MAX; prefix.len() + 1]
}
