//! Stored face embeddings.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One registered person's embedding, as raw little-endian f32 bytes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FaceEncodingRow {
    pub id: String,
    pub person_name: String,
    pub encoding: Vec<u8>,
    pub created_at: String,
    pub last_updated: String,
}

impl FaceEncodingRow {
    /// Decode the BLOB into an embedding vector.
    pub fn embedding(&self) -> Vec<f32> {
        self.encoding
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

/// Encode an embedding vector for storage.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_blob_round_trip() {
        let embedding = vec![0.0f32, 1.5, -2.25, 0.125];
        let row = FaceEncodingRow {
            id: "x".to_string(),
            person_name: "alice".to_string(),
            encoding: encode_embedding(&embedding),
            created_at: String::new(),
            last_updated: String::new(),
        };
        assert_eq!(row.embedding(), embedding);
    }
}
