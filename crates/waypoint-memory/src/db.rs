// Database Layer Module
// SQLite + sqlite-vec for the knowledge base

use crate::types::{KnowledgeRecord, MemoryError, MemoryResult, NewKnowledgeRecord};
use chrono::{DateTime, Utc};
use rusqlite::{ffi::sqlite3_auto_extension, params, params_from_iter, Connection, Row};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Knowledge-base connection manager.
///
/// Records live in `knowledge_records`; their embeddings live in a vec0
/// virtual table keyed by the same rowid.
#[derive(Clone)]
pub struct KnowledgeDatabase {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
}

impl KnowledgeDatabase {
    /// Open or create the knowledge database
    pub async fn new(db_path: &Path, dimension: usize) -> MemoryResult<Self> {
        if dimension == 0 {
            return Err(MemoryError::InvalidRecord(
                "embedding dimension must be positive".to_string(),
            ));
        }

        // Register sqlite-vec extension
        unsafe {
            sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut i8,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> i32,
            >(sqlite3_vec_init as *const ())));
        }

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;

        // PRAGMA journal_mode returns a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> MemoryResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS knowledge_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_vectors USING vec0(
                    embedding float[{}]
                )",
                self.dimension
            ),
            [],
        )?;

        Ok(())
    }

    /// Store a record and its embedding, returning the new record id
    pub async fn insert_record(
        &self,
        record: &NewKnowledgeRecord,
        embedding: &[f32],
    ) -> MemoryResult<i64> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        if record.content.trim().is_empty() {
            return Err(MemoryError::InvalidRecord(
                "record content is empty".to_string(),
            ));
        }

        let tags = serde_json::to_string(&record.tags)?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO knowledge_records (title, source, tags, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.title,
                record.source,
                tags,
                record.content,
                Utc::now().to_rfc3339()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO knowledge_vectors (rowid, embedding) VALUES (?1, ?2)",
            params![id, embedding_json(embedding)],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Fetch records by id. Unknown ids are skipped; order is unspecified.
    pub async fn get_records(&self, ids: &[i64]) -> MemoryResult<Vec<KnowledgeRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, title, source, tags, content, created_at
             FROM knowledge_records
             WHERE id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(ids.iter()), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Nearest neighbours as `(record id, distance)`, closest first
    pub async fn search_vectors(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> MemoryResult<Vec<(i64, f64)>> {
        if query_embedding.len() != self.dimension {
            return Err(MemoryError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                query_embedding.len()
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT rowid, distance
             FROM knowledge_vectors
             WHERE embedding MATCH ?1 AND k = ?2
             ORDER BY distance",
        )?;
        let results = stmt
            .query_map(
                params![embedding_json(query_embedding), limit as i64],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(results)
    }

    #[cfg(test)]
    pub async fn count(&self) -> MemoryResult<i64> {
        let conn = self.conn.lock().await;
        let count = conn.query_row("SELECT COUNT(*) FROM knowledge_records", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}

fn embedding_json(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

fn row_to_record(row: &Row) -> Result<KnowledgeRecord, rusqlite::Error> {
    let tags_json: String = row.get(3)?;
    let created_at_str: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);
    Ok(KnowledgeRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        source: row.get(2)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        content: row.get(4)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    async fn setup_test_db() -> (KnowledgeDatabase, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("knowledge.db");
        let db = KnowledgeDatabase::new(&db_path, DIM).await.unwrap();
        (db, temp_dir)
    }

    fn record(title: &str, content: &str) -> NewKnowledgeRecord {
        NewKnowledgeRecord {
            title: title.to_string(),
            source: "handbook".to_string(),
            tags: vec!["ops".to_string()],
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_records() {
        let (db, _temp) = setup_test_db().await;
        let id = db
            .insert_record(&record("Deploys", "Use the blue pipeline"), &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();

        let records = db.get_records(&[id, 9999]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Deploys");
        assert_eq!(records[0].tags, vec!["ops".to_string()]);
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let (db, _temp) = setup_test_db().await;
        let near = db
            .insert_record(&record("Near", "close"), &[1.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();
        let far = db
            .insert_record(&record("Far", "distant"), &[0.0, 0.0, 0.0, 1.0])
            .await
            .unwrap();

        let hits = db.search_vectors(&[0.9, 0.1, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, near);
        assert_eq!(hits[1].0, far);
        assert!(hits[0].1 <= hits[1].1);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let (db, _temp) = setup_test_db().await;
        let err = db
            .insert_record(&record("Bad", "vector"), &[1.0, 0.0])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        assert_eq!(db.count().await.unwrap(), 0);
    }
}
