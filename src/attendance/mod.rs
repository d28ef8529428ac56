//! Face-recognition attendance engine.
//!
//! The embedding model itself is external; everything behind [`FaceEmbedder`]
//! is this crate's own bookkeeping: an in-memory gallery of known embeddings
//! loaded from SQLite, linear nearest-neighbor matching by Euclidean
//! distance, and attendance-row recording.

pub mod qr;

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::db::{encode_embedding, AttendanceMethod, AttendanceRecord, AttendanceStats, DbPool, FaceEncodingRow};

/// Dimensionality of the face embedding vectors.
pub const EMBEDDING_DIM: usize = 128;

#[derive(Debug, Error)]
pub enum FaceError {
    #[error("no face found in image")]
    NoFace,
    #[error("embedding has wrong dimension: expected {EMBEDDING_DIM}, got {0}")]
    BadDimension(usize),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Produces one embedding per face found in an image.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, image: &[u8]) -> Result<Vec<Vec<f32>>, FaceError>;
}

/// Deterministic stand-in for a real face-embedding model.
///
/// Expands a SHA-256 digest of the image bytes into a 128-dim vector in
/// [0, 1), so the same image always produces the same embedding and distinct
/// images land far apart. Used whenever no real model is wired in.
pub struct HashEmbedder;

impl FaceEmbedder for HashEmbedder {
    fn embed(&self, image: &[u8]) -> Result<Vec<Vec<f32>>, FaceError> {
        use sha2::{Digest, Sha256};

        if image.is_empty() {
            return Err(FaceError::NoFace);
        }

        let seed = Sha256::digest(image);
        let mut embedding = Vec::with_capacity(EMBEDDING_DIM);
        let mut counter: u32 = 0;

        while embedding.len() < EMBEDDING_DIM {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(counter.to_le_bytes());
            let block = hasher.finalize();

            for chunk in block.chunks_exact(4) {
                if embedding.len() == EMBEDDING_DIM {
                    break;
                }
                let n = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                embedding.push(n as f32 / u32::MAX as f32);
            }
            counter += 1;
        }

        Ok(vec![embedding])
    }
}

/// Euclidean distance between two embeddings.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// One face found in a submitted image.
#[derive(Debug, Clone, Serialize)]
pub struct RecognizedFace {
    pub name: String,
    pub confidence: f64,
    pub recognized: bool,
}

/// Result of a mark-attendance call.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceOutcome {
    pub timestamp: String,
    pub recognized_faces: Vec<RecognizedFace>,
    pub unknown_faces: usize,
    pub total_faces: usize,
    pub success: bool,
}

/// Minimum confidence required to record a match as attendance.
const MARK_CONFIDENCE_THRESHOLD: f64 = 0.6;

pub struct AttendanceEngine {
    db: DbPool,
    embedder: Arc<dyn FaceEmbedder>,
    tolerance: f32,
    /// person name -> embedding, loaded once and updated on registration
    known: DashMap<String, Vec<f32>>,
}

impl AttendanceEngine {
    pub fn new(db: DbPool, embedder: Arc<dyn FaceEmbedder>, tolerance: f32) -> Self {
        Self {
            db,
            embedder,
            tolerance,
            known: DashMap::new(),
        }
    }

    /// Load all stored embeddings into the in-memory gallery.
    pub async fn load_encodings(&self) -> Result<usize, FaceError> {
        let rows: Vec<FaceEncodingRow> = sqlx::query_as("SELECT * FROM face_encodings")
            .fetch_all(&self.db)
            .await?;

        self.known.clear();
        for row in &rows {
            self.known.insert(row.person_name.clone(), row.embedding());
        }

        tracing::info!(count = rows.len(), "Loaded face encodings");
        Ok(rows.len())
    }

    pub fn registered_people(&self) -> Vec<String> {
        self.known.iter().map(|e| e.key().clone()).collect()
    }

    /// Register (or re-register) a person from a face image.
    pub async fn register_person(&self, name: &str, image: &[u8]) -> Result<(), FaceError> {
        let mut faces = self.embedder.embed(image)?;
        if faces.is_empty() {
            return Err(FaceError::NoFace);
        }
        let embedding = faces.swap_remove(0);
        if embedding.len() != EMBEDDING_DIM {
            return Err(FaceError::BadDimension(embedding.len()));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let blob = encode_embedding(&embedding);

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM face_encodings WHERE person_name = ?")
                .bind(name)
                .fetch_optional(&self.db)
                .await?;

        if existing.is_some() {
            sqlx::query("UPDATE face_encodings SET encoding = ?, last_updated = ? WHERE person_name = ?")
                .bind(&blob)
                .bind(&now)
                .bind(name)
                .execute(&self.db)
                .await?;
        } else {
            sqlx::query(
                "INSERT INTO face_encodings (id, person_name, encoding, created_at, last_updated) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(name)
            .bind(&blob)
            .bind(&now)
            .bind(&now)
            .execute(&self.db)
            .await?;
        }

        self.known.insert(name.to_string(), embedding);
        tracing::info!(person = %name, "Registered face encoding");
        Ok(())
    }

    /// Nearest known embedding, if any is within tolerance.
    /// Scans every registered person; the gallery is small.
    pub fn best_match(&self, embedding: &[f32]) -> Option<(String, f32)> {
        let mut best: Option<(String, f32)> = None;

        for entry in self.known.iter() {
            let distance = euclidean_distance(embedding, entry.value());
            match &best {
                Some((_, d)) if *d <= distance => {}
                _ => best = Some((entry.key().clone(), distance)),
            }
        }

        best.filter(|(_, distance)| *distance <= self.tolerance)
    }

    /// Recognize all faces in an image against the gallery.
    pub fn recognize(&self, image: &[u8]) -> Result<Vec<RecognizedFace>, FaceError> {
        let faces = self.embedder.embed(image)?;

        let results = faces
            .iter()
            .map(|embedding| match self.best_match(embedding) {
                Some((name, distance)) => RecognizedFace {
                    name,
                    confidence: (1.0 - distance as f64).max(0.0),
                    recognized: true,
                },
                None => RecognizedFace {
                    name: "Unknown".to_string(),
                    confidence: 0.0,
                    recognized: false,
                },
            })
            .collect();

        Ok(results)
    }

    /// Recognize faces and record attendance for confident matches.
    pub async fn mark_attendance(
        &self,
        image: &[u8],
        image_path: Option<&str>,
    ) -> Result<AttendanceOutcome, FaceError> {
        let results = self.recognize(image)?;

        let mut outcome = AttendanceOutcome {
            timestamp: chrono::Utc::now().to_rfc3339(),
            recognized_faces: Vec::new(),
            unknown_faces: 0,
            total_faces: results.len(),
            success: false,
        };

        for face in results {
            if face.recognized && face.confidence > MARK_CONFIDENCE_THRESHOLD {
                self.add_record(
                    &face.name,
                    Some(face.confidence),
                    AttendanceMethod::Face,
                    None,
                    None,
                    image_path,
                )
                .await?;
                outcome.recognized_faces.push(face);
                outcome.success = true;
            } else {
                outcome.unknown_faces += 1;
            }
        }

        Ok(outcome)
    }

    /// Insert one attendance row.
    pub async fn add_record(
        &self,
        person_name: &str,
        confidence: Option<f64>,
        method: AttendanceMethod,
        class_code: Option<&str>,
        session_id: Option<&str>,
        image_path: Option<&str>,
    ) -> Result<AttendanceRecord, FaceError> {
        let now = chrono::Utc::now();
        let record = AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            person_name: person_name.to_string(),
            timestamp: now.to_rfc3339(),
            date: now.date_naive().to_string(),
            status: "present".to_string(),
            confidence,
            method: method.to_string(),
            class_code: class_code.map(str::to_string),
            session_id: session_id.map(str::to_string),
            image_path: image_path.map(str::to_string),
        };

        sqlx::query(
            r#"
            INSERT INTO attendance (id, person_name, timestamp, date, status, confidence, method, class_code, session_id, image_path)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.person_name)
        .bind(&record.timestamp)
        .bind(&record.date)
        .bind(&record.status)
        .bind(record.confidence)
        .bind(&record.method)
        .bind(&record.class_code)
        .bind(&record.session_id)
        .bind(&record.image_path)
        .execute(&self.db)
        .await?;

        Ok(record)
    }

    /// Whether a student already checked in for a QR session.
    pub async fn already_marked(
        &self,
        session_id: &str,
        person_name: &str,
    ) -> Result<bool, FaceError> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM attendance WHERE session_id = ? AND person_name = ?")
                .bind(session_id)
                .bind(person_name)
                .fetch_optional(&self.db)
                .await?;
        Ok(existing.is_some())
    }

    /// Today's attendance records, newest first.
    pub async fn today_records(&self) -> Result<Vec<AttendanceRecord>, FaceError> {
        let today = chrono::Utc::now().date_naive().to_string();
        let records = sqlx::query_as(
            "SELECT * FROM attendance WHERE date = ? ORDER BY timestamp DESC",
        )
        .bind(&today)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }

    /// Aggregate counts over the last `days` days.
    pub async fn stats(&self, days: i64) -> Result<AttendanceStats, FaceError> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(days))
            .date_naive()
            .to_string();
        let today = chrono::Utc::now().date_naive().to_string();

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attendance WHERE date >= ?")
            .bind(&cutoff)
            .fetch_one(&self.db)
            .await?;

        let unique: (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT person_name) FROM attendance WHERE date >= ?")
                .bind(&cutoff)
                .fetch_one(&self.db)
                .await?;

        let today_count: (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT person_name) FROM attendance WHERE date = ?")
                .bind(&today)
                .fetch_one(&self.db)
                .await?;

        Ok(AttendanceStats {
            total_attendance: total.0,
            unique_people: unique.0,
            today_attendance: today_count.0,
            period_days: days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder;
        let a = embedder.embed(b"same image bytes").unwrap();
        let b = embedder.embed(b"same image bytes").unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), EMBEDDING_DIM);
        assert!(a[0].iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_hash_embedder_rejects_empty_image() {
        let embedder = HashEmbedder;
        assert!(matches!(embedder.embed(b""), Err(FaceError::NoFace)));
    }

    #[test]
    fn test_distinct_images_are_far_apart() {
        let embedder = HashEmbedder;
        let a = embedder.embed(b"alice.jpg contents").unwrap();
        let b = embedder.embed(b"bob.jpg contents").unwrap();
        // 128 independent coordinates in [0,1) put unrelated vectors well
        // beyond any sane matching tolerance.
        assert!(euclidean_distance(&a[0], &b[0]) > 1.0);
    }

    #[test]
    fn test_euclidean_distance() {
        assert_eq!(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean_distance(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_register_then_recognize_same_image() {
        let db = crate::db::init_in_memory().await.unwrap();
        let engine = AttendanceEngine::new(db, Arc::new(HashEmbedder), 0.6);

        engine
            .register_person("alice", b"alice photo bytes")
            .await
            .unwrap();

        let results = engine.recognize(b"alice photo bytes").unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].recognized);
        assert_eq!(results[0].name, "alice");
        assert!(results[0].confidence > 0.99);

        // A different image must not match within tolerance.
        let other = engine.recognize(b"someone else entirely").unwrap();
        assert!(!other[0].recognized);
        assert_eq!(other[0].name, "Unknown");
    }

    #[tokio::test]
    async fn test_mark_attendance_records_match() {
        let db = crate::db::init_in_memory().await.unwrap();
        let engine = AttendanceEngine::new(db.clone(), Arc::new(HashEmbedder), 0.6);

        engine.register_person("bob", b"bob photo").await.unwrap();
        let outcome = engine.mark_attendance(b"bob photo", None).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.recognized_faces.len(), 1);
        assert_eq!(outcome.recognized_faces[0].name, "bob");

        let today = engine.today_records().await.unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].person_name, "bob");
        assert_eq!(today[0].method, "face");
    }

    #[tokio::test]
    async fn test_unknown_face_is_not_recorded() {
        let db = crate::db::init_in_memory().await.unwrap();
        let engine = AttendanceEngine::new(db, Arc::new(HashEmbedder), 0.6);

        engine.register_person("carol", b"carol photo").await.unwrap();
        let outcome = engine.mark_attendance(b"a stranger", None).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.unknown_faces, 1);
        assert!(outcome.recognized_faces.is_empty());
        assert!(engine.today_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_encodings_from_db() {
        let db = crate::db::init_in_memory().await.unwrap();
        let engine = AttendanceEngine::new(db.clone(), Arc::new(HashEmbedder), 0.6);
        engine.register_person("dave", b"dave photo").await.unwrap();

        // A fresh engine over the same pool sees the persisted gallery.
        let fresh = AttendanceEngine::new(db, Arc::new(HashEmbedder), 0.6);
        assert_eq!(fresh.load_encodings().await.unwrap(), 1);
        let results = fresh.recognize(b"dave photo").unwrap();
        assert!(results[0].recognized);
    }
}
