//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::crawler::PageContent;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RunMode, RunRecord, RunStatus};
use crate::url::domain_key;
use crate::CrawlerError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const RUN_COLUMNS: &str = "id, mode, started_at, finished_at, config_hash, status";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(CrawlerError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, CrawlerError> {
        let conn = Connection::open(path)?;

        // Workers write concurrently with snapshot flushes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, CrawlerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn count(&self, table: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Raw run row; mode and status are checked after the query
struct RunRow {
    id: i64,
    mode: String,
    started_at: String,
    finished_at: Option<String>,
    config_hash: String,
    status: String,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            mode: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            config_hash: row.get(4)?,
            status: row.get(5)?,
        })
    }

    fn into_record(self) -> StorageResult<RunRecord> {
        let mode = RunMode::from_db_string(&self.mode).ok_or(StorageError::InvalidValue {
            column: "runs.mode",
            value: self.mode.clone(),
        })?;
        let status = RunStatus::from_db_string(&self.status).ok_or(StorageError::InvalidValue {
            column: "runs.status",
            value: self.status.clone(),
        })?;

        Ok(RunRecord {
            id: self.id,
            mode,
            started_at: self.started_at,
            finished_at: self.finished_at,
            config_hash: self.config_hash,
            status,
        })
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, mode: RunMode, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (mode, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                mode.to_db_string(),
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                RunRow::from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))?;

        row.into_record()
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                RunRow::from_row,
            )
            .optional()?;

        row.map(RunRow::into_record).transpose()
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Discovered URLs =====

    fn save_discovered(&mut self, urls: &[String]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO discovered_urls (url, domain, discovered_at) VALUES (?1, ?2, ?3)",
            )?;
            for url in urls {
                inserted += stmt.execute(params![url, domain_key(url), now])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn load_discovered(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT url FROM discovered_urls")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut urls = Vec::new();
        for row in rows {
            urls.push(row?);
        }

        Ok(urls)
    }

    fn count_discovered(&self) -> StorageResult<u64> {
        self.count("discovered_urls")
    }

    fn clear_discovered(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM discovered_urls", [])?;
        Ok(())
    }

    // ===== Fetch Results =====

    fn record_page(&mut self, run_id: i64, page: &PageContent) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO pages (run_id, url, domain, title, text, link_count, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                page.url,
                domain_key(&page.url),
                page.title,
                page.text,
                page.links.len() as i64,
                now
            ],
        )?;
        let page_id = tx.last_insert_rowid();

        {
            let mut stmt =
                tx.prepare("INSERT INTO page_links (page_id, url, domain) VALUES (?1, ?2, ?3)")?;
            for link in &page.links {
                stmt.execute(params![page_id, link, domain_key(link)])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn load_link_edges(&self) -> StorageResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.url, l.url FROM page_links l
             JOIN pages p ON p.id = l.page_id
             ORDER BY l.rowid",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    fn count_page_links(&self) -> StorageResult<u64> {
        self.count("page_links")
    }

    fn record_fetch_error(&mut self, run_id: i64, url: &str, error: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO fetch_errors (run_id, url, error, failed_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, url, error, now],
        )?;
        Ok(())
    }

    fn count_pages(&self) -> StorageResult<u64> {
        self.count("pages")
    }

    fn count_fetch_errors(&self) -> StorageResult<u64> {
        self.count("fetch_errors")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str) -> PageContent {
        PageContent {
            url: url.to_string(),
            title: Some("Title".to_string()),
            text: "body".to_string(),
            links: vec!["http://b.onion/".to_string()],
        }
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStorage::new_in_memory().is_ok());
    }

    #[test]
    fn test_create_and_get_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run(RunMode::Create, "test_hash").unwrap();

        let run = storage.get_run(run_id).unwrap();
        assert_eq!(run.mode, RunMode::Create);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.config_hash, "test_hash");
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn test_get_missing_run() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.get_run(7),
            Err(StorageError::RunNotFound(7))
        ));
    }

    #[test]
    fn test_latest_run_and_finish() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.latest_run().unwrap().is_none());

        let first = storage.create_run(RunMode::Create, "h").unwrap();
        storage.finish_run(first, RunStatus::Interrupted).unwrap();
        let second = storage.create_run(RunMode::Restore, "h").unwrap();

        let latest = storage.latest_run().unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.mode, RunMode::Restore);

        let finished = storage.get_run(first).unwrap();
        assert_eq!(finished.status, RunStatus::Interrupted);
        assert!(finished.finished_at.is_some());
    }

    #[test]
    fn test_finish_missing_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.finish_run(3, RunStatus::Completed),
            Err(StorageError::RunNotFound(3))
        ));
    }

    #[test]
    fn test_save_discovered_ignores_duplicates() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        let first = vec!["http://a.onion/".to_string(), "http://b.onion/".to_string()];
        assert_eq!(storage.save_discovered(&first).unwrap(), 2);

        let second = vec!["http://b.onion/".to_string(), "http://c.onion/".to_string()];
        assert_eq!(storage.save_discovered(&second).unwrap(), 1);

        assert_eq!(storage.count_discovered().unwrap(), 3);

        let mut loaded = storage.load_discovered().unwrap();
        loaded.sort();
        assert_eq!(
            loaded,
            vec!["http://a.onion/", "http://b.onion/", "http://c.onion/"]
        );
    }

    #[test]
    fn test_clear_discovered() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .save_discovered(&["http://a.onion/".to_string()])
            .unwrap();

        storage.clear_discovered().unwrap();

        assert_eq!(storage.count_discovered().unwrap(), 0);
        assert!(storage.load_discovered().unwrap().is_empty());
    }

    #[test]
    fn test_save_empty_batch() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert_eq!(storage.save_discovered(&[]).unwrap(), 0);
    }

    #[test]
    fn test_record_pages_and_errors() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run(RunMode::Create, "h").unwrap();

        storage.record_page(run_id, &page("http://a.onion/")).unwrap();
        storage.record_page(run_id, &page("http://a.onion/x")).unwrap();
        storage
            .record_fetch_error(run_id, "http://c.onion/", "HTTP 404")
            .unwrap();

        assert_eq!(storage.count_pages().unwrap(), 2);
        assert_eq!(storage.count_fetch_errors().unwrap(), 1);
    }

    #[test]
    fn test_record_page_keeps_links() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run(RunMode::Create, "h").unwrap();

        let mut home = page("http://a.onion/");
        home.links = vec![
            "http://b.onion/".to_string(),
            "http://www.c.onion/forum".to_string(),
        ];
        storage.record_page(run_id, &home).unwrap();
        storage.record_page(run_id, &page("http://b.onion/")).unwrap();

        assert_eq!(storage.count_page_links().unwrap(), 3);
        assert_eq!(
            storage.load_link_edges().unwrap(),
            vec![
                ("http://a.onion/".to_string(), "http://b.onion/".to_string()),
                ("http://a.onion/".to_string(), "http://www.c.onion/forum".to_string()),
                ("http://b.onion/".to_string(), "http://b.onion/".to_string()),
            ]
        );

        let domain: String = storage
            .conn
            .query_row(
                "SELECT domain FROM page_links WHERE url = 'http://www.c.onion/forum'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(domain, "c.onion");
    }

    #[test]
    fn test_record_page_requires_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.record_page(99, &page("http://a.onion/")).is_err());
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.db");

        {
            let mut storage = SqliteStorage::new(&path).unwrap();
            storage
                .save_discovered(&["http://a.onion/".to_string()])
                .unwrap();
        }

        let storage = SqliteStorage::new(&path).unwrap();
        assert_eq!(storage.load_discovered().unwrap(), vec!["http://a.onion/"]);
    }
}
