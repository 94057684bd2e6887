//! Snapshot encodings for the vector store and metadata table.
//!
//! Vector snapshot layout (little-endian):
//!
//!   Magic: "NDXV" (4 bytes)
//!   Format version: u32
//!   Dimension: u32 (0 for an empty store with no fixed dimension)
//!   Rows: u64
//!   Data: rows × dimension f32
//!
//! Metadata snapshot: one JSON `FragmentRecord` per line, ordered by `row_index`.

use crate::metadata_table::MetadataTable;
use crate::types::FragmentRecord;
use crate::vector_store::VectorStore;
use newsdex_core::{AppError, AppResult};

pub const VECTOR_MAGIC: [u8; 4] = *b"NDXV";
pub const VECTOR_FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Serialize a vector store.
pub fn encode_vectors(store: &VectorStore) -> Vec<u8> {
    let dim = store.dimension().unwrap_or(0);
    let data = store.as_slice();
    let mut buf = Vec::with_capacity(HEADER_LEN + data.len() * 4);
    buf.extend_from_slice(&VECTOR_MAGIC);
    buf.extend_from_slice(&VECTOR_FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(dim as u32).to_le_bytes());
    buf.extend_from_slice(&(store.len() as u64).to_le_bytes());
    for value in data {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Deserialize a vector store, validating header, length and row norms.
pub fn decode_vectors(bytes: &[u8]) -> AppResult<VectorStore> {
    if bytes.len() < HEADER_LEN {
        return Err(AppError::Storage(format!(
            "vector snapshot too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[0..4] != VECTOR_MAGIC {
        return Err(AppError::Storage(
            "vector snapshot has invalid magic".to_string(),
        ));
    }

    let version = read_u32(&bytes[4..8]);
    if version != VECTOR_FORMAT_VERSION {
        return Err(AppError::Storage(format!(
            "unsupported vector snapshot format version {}",
            version
        )));
    }
    let dim = read_u32(&bytes[8..12]) as usize;
    let rows = read_u64(&bytes[12..20]) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| AppError::Storage("vector snapshot size overflow".to_string()))?;
    if body.len() != expected {
        return Err(AppError::Storage(format!(
            "vector snapshot body is {} bytes, header declares {} rows × {} dims",
            body.len(),
            rows,
            dim
        )));
    }

    if dim == 0 {
        return Ok(VectorStore::new());
    }

    let data: Vec<f32> = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    VectorStore::from_matrix(dim, data)
}

/// Serialize a metadata table as JSON lines.
pub fn encode_metadata(table: &MetadataTable) -> AppResult<Vec<u8>> {
    let mut buf = Vec::new();
    for record in table.iter() {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Deserialize a metadata table, validating contiguity.
pub fn decode_metadata(bytes: &[u8]) -> AppResult<MetadataTable> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| AppError::Storage(format!("metadata snapshot is not UTF-8: {}", e)))?;

    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: FragmentRecord = serde_json::from_str(line).map_err(|e| {
            AppError::Storage(format!("metadata snapshot line {}: {}", line_no + 1, e))
        })?;
        rows.push(record);
    }
    MetadataTable::from_rows(rows)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
