//! Versioned container format for persisted database snapshots.
//!
//! A [`GeoDatabase`] is persisted to the replica as a self-describing byte
//! container: a varint schema version, a length-prefixed JSON metadata
//! section, and a length-prefixed zlib-compressed payload section. The
//! payload gets its own framing because it is far too large for the JSON
//! metadata encoding used elsewhere.
//!
//! Only schema version 1 exists. Decoding anything else fails immediately;
//! no forward or backward compatibility is attempted.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::config::{MAX_DATABASE_PAYLOAD_BYTES, MAX_METADATA_BYTES};
use crate::models::{DatabaseMetadata, GeoDatabase};

/// The single supported container schema version.
pub const SCHEMA_VERSION: u64 = 1;

/// Container encode/decode failures. These are permanent for the given
/// input bytes and must not be retried with the same bytes.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unsupported container schema version {0} (expected {SCHEMA_VERSION})")]
    UnsupportedSchemaVersion(u64),

    #[error("metadata section is {actual} bytes (limit {limit})")]
    MetadataTooLarge { actual: u64, limit: u64 },

    #[error("payload section is {actual} bytes (limit {limit})")]
    PayloadTooLarge { actual: u64, limit: u64 },

    #[error("container truncated while reading {0}")]
    Truncated(&'static str),

    #[error("malformed varint in container header")]
    MalformedVarint,

    #[error("metadata section is not valid JSON: {0}")]
    MalformedMetadata(#[from] serde_json::Error),

    #[error("payload compression failed: {0}")]
    Compression(std::io::Error),

    #[error("payload decompression failed: {0}")]
    Decompression(std::io::Error),
}

/// Serializes a database into the container format.
pub fn encode_database(db: &GeoDatabase) -> Result<Vec<u8>, CodecError> {
    if db.payload.len() as u64 > MAX_DATABASE_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            actual: db.payload.len() as u64,
            limit: MAX_DATABASE_PAYLOAD_BYTES,
        });
    }

    let metadata_bytes = serde_json::to_vec(&db.metadata)?;
    if metadata_bytes.len() as u64 > MAX_METADATA_BYTES {
        return Err(CodecError::MetadataTooLarge {
            actual: metadata_bytes.len() as u64,
            limit: MAX_METADATA_BYTES,
        });
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&db.payload)
        .map_err(CodecError::Compression)?;
    let compressed = encoder.finish().map_err(CodecError::Compression)?;
    if compressed.len() as u64 > MAX_DATABASE_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            actual: compressed.len() as u64,
            limit: MAX_DATABASE_PAYLOAD_BYTES,
        });
    }

    let mut out = Vec::with_capacity(16 + metadata_bytes.len() + compressed.len());
    write_varint(&mut out, SCHEMA_VERSION);
    write_varint(&mut out, metadata_bytes.len() as u64);
    out.extend_from_slice(&metadata_bytes);
    write_varint(&mut out, compressed.len() as u64);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Deserializes a database from the container format.
pub fn decode_database(bytes: &[u8]) -> Result<GeoDatabase, CodecError> {
    let mut cursor = bytes;

    let version = read_varint(&mut cursor)?;
    if version != SCHEMA_VERSION {
        return Err(CodecError::UnsupportedSchemaVersion(version));
    }

    let metadata_len = read_varint(&mut cursor)?;
    if metadata_len > MAX_METADATA_BYTES {
        return Err(CodecError::MetadataTooLarge {
            actual: metadata_len,
            limit: MAX_METADATA_BYTES,
        });
    }
    if (cursor.len() as u64) < metadata_len {
        return Err(CodecError::Truncated("metadata section"));
    }
    let (metadata_bytes, rest) = cursor.split_at(metadata_len as usize);
    let metadata: DatabaseMetadata = serde_json::from_slice(metadata_bytes)?;
    cursor = rest;

    let payload_len = read_varint(&mut cursor)?;
    if payload_len > MAX_DATABASE_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            actual: payload_len,
            limit: MAX_DATABASE_PAYLOAD_BYTES,
        });
    }
    if (cursor.len() as u64) < payload_len {
        return Err(CodecError::Truncated("payload section"));
    }
    let compressed = &cursor[..payload_len as usize];

    // Bounded read: a hostile container cannot expand past the payload cap.
    let mut decoder = ZlibDecoder::new(compressed).take(MAX_DATABASE_PAYLOAD_BYTES + 1);
    let mut payload = Vec::new();
    decoder
        .read_to_end(&mut payload)
        .map_err(CodecError::Decompression)?;
    if payload.len() as u64 > MAX_DATABASE_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            actual: payload.len() as u64,
            limit: MAX_DATABASE_PAYLOAD_BYTES,
        });
    }

    Ok(GeoDatabase { metadata, payload })
}

/// Appends an LEB128-encoded unsigned integer.
fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Reads an LEB128-encoded unsigned integer, advancing the slice.
fn read_varint(cursor: &mut &[u8]) -> Result<u64, CodecError> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let (&byte, rest) = cursor
            .split_first()
            .ok_or(CodecError::Truncated("varint"))?;
        *cursor = rest;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::MalformedVarint)
}
