// src/database.rs
//! SQLite persistence for a built index and its source table.

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{FingerprintError, Result};
use crate::index::{FingerprintIndex, Posting, SourceId, SourceTable};

pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    /// Opens (creating if needed) the database file and its schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        debug!(path = %path.display(), journal_mode = %journal_mode, "index store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS meta (
                 key TEXT PRIMARY KEY,
                 value INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS sources (
                 source_id INTEGER PRIMARY KEY,
                 name TEXT NOT NULL,
                 duration_seconds REAL NOT NULL
             );
             CREATE TABLE IF NOT EXISTS postings (
                 hash INTEGER NOT NULL,
                 anchor_time REAL NOT NULL,
                 source_id INTEGER NOT NULL,
                 FOREIGN KEY (source_id) REFERENCES sources(source_id) ON DELETE CASCADE
             );
             CREATE INDEX IF NOT EXISTS idx_postings_hash ON postings (hash);
             COMMIT;",
        )?;
        Ok(())
    }

    /// Replaces whatever the store held with `index` and `sources`.
    pub fn save(&mut self, index: &FingerprintIndex, sources: &SourceTable) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("DELETE FROM postings; DELETE FROM sources; DELETE FROM meta;")?;
        {
            let mut meta = tx.prepare("INSERT INTO meta (key, value) VALUES (?1, ?2)")?;
            meta.execute(params!["sample_rate", index.sample_rate() as i64])?;
            meta.execute(params!["hop_length", index.hop_length() as i64])?;

            let mut insert_source =
                tx.prepare("INSERT INTO sources (source_id, name, duration_seconds) VALUES (?1, ?2, ?3)")?;
            for source in sources.iter() {
                insert_source.execute(params![source.id.0 as i64, source.name, source.duration_seconds])?;
            }

            // Rowid order keeps each hash's postings in insertion order on reload.
            let mut entries: Vec<(u64, &[Posting])> = index.iter().collect();
            entries.sort_unstable_by_key(|(hash, _)| *hash);
            let mut insert_posting =
                tx.prepare("INSERT INTO postings (hash, anchor_time, source_id) VALUES (?1, ?2, ?3)")?;
            for (hash, postings) in entries {
                for posting in postings {
                    insert_posting.execute(params![hash as i64, posting.anchor_time, posting.source_id.0 as i64])?;
                }
            }
        }
        tx.commit()?;
        info!(
            sources = sources.len(),
            hashes = index.len(),
            postings = index.posting_count(),
            "index saved"
        );
        Ok(())
    }

    /// Rebuilds the index and source table exactly as they were saved.
    pub fn load(&self) -> Result<(FingerprintIndex, SourceTable)> {
        let sample_rate = self.meta("sample_rate")?;
        let hop_length = self.meta("hop_length")?;
        let mut index = FingerprintIndex::empty(sample_rate as u32, hop_length as usize);

        let mut sources = SourceTable::default();
        let mut stmt = self
            .conn
            .prepare("SELECT source_id, name, duration_seconds FROM sources ORDER BY source_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
        })?;
        for row in rows {
            let (stored_id, name, duration) = row?;
            let id = sources.register(name, duration);
            if id.0 as i64 != stored_id {
                return Err(FingerprintError::CorruptStore(format!(
                    "source ids are not dense: expected {}, found {}",
                    id, stored_id
                )));
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT hash, anchor_time, source_id FROM postings ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (hash, anchor_time, source_id) = row?;
            index.append(
                hash as u64,
                Posting {
                    anchor_time,
                    source_id: SourceId(source_id as u32),
                },
            );
        }

        info!(
            sources = sources.len(),
            hashes = index.len(),
            postings = index.posting_count(),
            "index loaded"
        );
        Ok((index, sources))
    }

    /// Postings for one hash straight from the database, in insertion order.
    pub fn lookup(&self, hash: u64) -> Result<Vec<Posting>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT anchor_time, source_id FROM postings WHERE hash = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![hash as i64], |row| {
            Ok(Posting {
                anchor_time: row.get(0)?,
                source_id: SourceId(row.get::<_, i64>(1)? as u32),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn meta(&self, key: &str) -> Result<i64> {
        self.conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?
            .ok_or_else(|| FingerprintError::CorruptStore(format!("missing meta entry '{}'", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> (FingerprintIndex, SourceTable) {
        let mut sources = SourceTable::default();
        let a = sources.register("jingle".to_string(), 3.25);
        let b = sources.register("promo".to_string(), 12.0);
        let mut index = FingerprintIndex::empty(22050, 5513);
        for (hash, time, id) in [(5u64, 0.75, a), (5, 0.25, b), (9, 1.0, a), (5, 0.5, a), (1 << 40, 2.0, b)] {
            index.append(hash, Posting { anchor_time: time, source_id: id });
        }
        (index, sources)
    }

    #[test]
    fn save_then_load_round_trips() {
        let (index, sources) = sample_index();
        let mut store = IndexStore::open_in_memory().unwrap();
        store.save(&index, &sources).unwrap();

        let (loaded, loaded_sources) = store.load().unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded_sources, sources);
        for hash in index.hashes() {
            assert_eq!(loaded.lookup(hash), index.lookup(hash));
            assert_eq!(store.lookup(hash).unwrap(), index.lookup(hash));
        }
    }

    #[test]
    fn save_replaces_previous_contents() {
        let (index, sources) = sample_index();
        let mut store = IndexStore::open_in_memory().unwrap();
        store.save(&index, &sources).unwrap();
        store
            .save(&FingerprintIndex::empty(22050, 5513), &SourceTable::default())
            .unwrap();
        let (loaded, loaded_sources) = store.load().unwrap();
        assert!(loaded.is_empty());
        assert!(loaded_sources.is_empty());
        assert!(store.lookup(5).unwrap().is_empty());
    }

    #[test]
    fn unsaved_store_reports_missing_meta() {
        let store = IndexStore::open_in_memory().unwrap();
        assert!(matches!(store.load(), Err(FingerprintError::CorruptStore(_))));
    }
}
