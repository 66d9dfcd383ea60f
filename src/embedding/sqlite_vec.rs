//! SqliteVecIndex: persistent vector index via sqlite-vec
//!
//! Chunk text and metadata live in a plain `chunks` table; vectors live in
//! a vec0 virtual table whose rowid is the chunk id. Vectors are L2-normalized
//! on insert so the L2 distance from vec0 converts to cosine similarity:
//! `sim = 1 - dist² / 2`.
//!
//! Uses its own database connection (WAL mode) so embedding writes do not
//! contend with the graph store connection.

#[cfg(feature = "embeddings")]
mod inner {
    use crate::embedding::{EmbeddingError, SearchHit, VectorIndex};
    use crate::graph::Properties;
    use rusqlite::{params, Connection};
    use sqlite_vec::sqlite3_vec_init;
    use std::path::Path;
    use std::sync::Mutex;

    /// mxbai-embed-large produces 1024-dim vectors.
    pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1024;

    pub struct SqliteVecIndex {
        conn: Mutex<Connection>,
        dimensions: usize,
    }

    /// Register the sqlite-vec extension globally (safe under parallel test execution).
    fn register_vec_extension() {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        });
    }

    fn index_err(e: impl std::fmt::Display) -> EmbeddingError {
        EmbeddingError::Index(e.to_string())
    }

    impl SqliteVecIndex {
        pub fn open(path: &Path, dimensions: usize) -> Result<Self, EmbeddingError> {
            register_vec_extension();
            let conn = Connection::open(path).map_err(index_err)?;
            Self::init_connection(conn, dimensions)
        }

        pub fn open_in_memory(dimensions: usize) -> Result<Self, EmbeddingError> {
            register_vec_extension();
            let conn = Connection::open_in_memory().map_err(index_err)?;
            Self::init_connection(conn, dimensions)
        }

        fn init_connection(conn: Connection, dimensions: usize) -> Result<Self, EmbeddingError> {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS chunks (
                     chunk_id INTEGER PRIMARY KEY,
                     id TEXT NOT NULL UNIQUE,
                     content TEXT NOT NULL,
                     metadata_json TEXT NOT NULL
                 );
                 CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
                     embedding float[{}]
                 );",
                dimensions
            ))
            .map_err(index_err)?;

            Ok(Self {
                conn: Mutex::new(conn),
                dimensions,
            })
        }

        pub fn dimensions(&self) -> usize {
            self.dimensions
        }
    }

    /// Reinterpret a `&[f32]` slice as raw bytes for sqlite-vec blob parameters.
    ///
    /// # Safety
    /// f32 has no padding and a fixed layout; this is a trivial reinterpretation.
    fn f32_slice_as_bytes(slice: &[f32]) -> &[u8] {
        unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, slice.len() * 4) }
    }

    fn l2_normalize(v: &mut [f32]) {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
    }

    impl VectorIndex for SqliteVecIndex {
        fn upsert(
            &self,
            id: &str,
            content: &str,
            metadata: Properties,
            vector: Vec<f32>,
        ) -> Result<(), EmbeddingError> {
            if vector.len() != self.dimensions {
                return Err(EmbeddingError::Index(format!(
                    "expected {} dimensions, got {}",
                    self.dimensions,
                    vector.len()
                )));
            }
            let mut normalized = vector;
            l2_normalize(&mut normalized);
            let metadata_json = serde_json::to_string(&metadata).map_err(index_err)?;

            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction().map_err(index_err)?;
            let rowid: i64 = tx
                .query_row(
                    "INSERT INTO chunks(id, content, metadata_json) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                         content = excluded.content,
                         metadata_json = excluded.metadata_json
                     RETURNING chunk_id",
                    params![id, content, metadata_json],
                    |row| row.get(0),
                )
                .map_err(index_err)?;
            tx.execute("DELETE FROM vec_chunks WHERE rowid = ?1", params![rowid])
                .map_err(index_err)?;
            tx.execute(
                "INSERT INTO vec_chunks(rowid, embedding) VALUES (?1, ?2)",
                params![rowid, f32_slice_as_bytes(&normalized)],
            )
            .map_err(index_err)?;
            tx.commit().map_err(index_err)
        }

        fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, EmbeddingError> {
            if k == 0 {
                return Ok(Vec::new());
            }
            let mut normalized_query = query.to_vec();
            l2_normalize(&mut normalized_query);
            let conn = self.conn.lock().unwrap();

            let mut stmt = conn
                .prepare(
                    "WITH knn AS (
                         SELECT rowid, distance FROM vec_chunks
                         WHERE embedding MATCH ?1 AND k = ?2
                     )
                     SELECT c.content, c.metadata_json, knn.distance
                     FROM knn
                     JOIN chunks c ON c.chunk_id = knn.rowid
                     ORDER BY knn.distance",
                )
                .map_err(index_err)?;

            let rows = stmt
                .query_map(
                    params![f32_slice_as_bytes(&normalized_query), k as i64],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f32>(2)?,
                        ))
                    },
                )
                .map_err(index_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(index_err)?;

            rows.into_iter()
                .map(|(content, metadata_json, distance)| {
                    Ok(SearchHit {
                        content,
                        score: 1.0 - (distance * distance) / 2.0,
                        metadata: serde_json::from_str(&metadata_json).map_err(index_err)?,
                    })
                })
                .collect()
        }

        fn clear(&self) -> Result<(), EmbeddingError> {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch("DELETE FROM vec_chunks; DELETE FROM chunks;")
                .map_err(index_err)
        }

        fn len(&self) -> usize {
            let conn = self.conn.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .unwrap_or(0)
        }
    }

}

#[cfg(feature = "embeddings")]
pub use inner::{SqliteVecIndex, DEFAULT_EMBEDDING_DIMENSIONS};
