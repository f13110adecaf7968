//! Embedding BLOB encoding and the `cosine_distance` SQL function.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use facematch_core::types::cosine_distance;

pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Trailing bytes that do not form a whole f32 are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Register `cosine_distance(blob, blob) -> REAL` on `conn`.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "cosine_distance",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a: Vec<u8> = ctx.get(0)?;
            let b: Vec<u8> = ctx.get(1)?;
            if a.len() != b.len() {
                return Err(rusqlite::Error::UserFunctionError(
                    format!("cosine_distance: blob lengths differ ({} vs {})", a.len(), b.len()).into(),
                ));
            }
            let distance = cosine_distance(&bytes_to_embedding(&a), &bytes_to_embedding(&b));
            Ok(distance as f64)
        },
    )
}
