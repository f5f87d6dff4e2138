//! Content-addressable identity for chunks and pages.
//!
//! Chunk ids are SHA-256 digests over `(url, section_or_index, normalized
//! content)`, so re-ingesting unchanged content overwrites the existing row
//! and point instead of adding a new one.

use sha2::{Digest, Sha256};
use uuid::Uuid;

const FIELD_SEPARATOR: &[u8] = &[0x1f];

/// Collapse whitespace runs to a single space and trim the ends.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn chunk_id(url: &str, section_or_index: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(section_or_index.trim().as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(normalize_content(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash of the raw page content before chunking.
pub fn content_hash(raw_content: &str) -> String {
    hex::encode(Sha256::digest(raw_content.as_bytes()))
}

/// Vector-store point id for a chunk id.
///
/// Qdrant only accepts UUIDs or unsigned integers as point ids; the first
/// 16 bytes of the digest are reinterpreted as a UUID. Ids that are not hex
/// digests are hashed first.
pub fn point_uuid(chunk_id: &str) -> Uuid {
    let digest = match hex::decode(chunk_id) {
        Ok(bytes) if bytes.len() >= 16 => bytes,
        _ => Sha256::digest(chunk_id.as_bytes()).to_vec(),
    };
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}
