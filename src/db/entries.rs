use super::models::{CompletedSource, METADATA_COLUMNS, NewEntry, SourceSummary, metadata_from_row};
use super::{StoreError, VectorStore, serialize_vector};
use crate::loader::Metadata;
use chrono::{DateTime, Utc};
use rusqlite::{Transaction, params};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Remove vectors, entries and completion records for `ids` inside `tx`.
fn delete_ids(tx: &Transaction<'_>, ids: &[i64]) -> Result<usize, StoreError> {
    // Virtual table has no cascade; remove vectors explicitly.
    let mut delete_vector = tx.prepare_cached("DELETE FROM vec_entries WHERE rowid = ?")?;
    let mut delete_completed = tx.prepare_cached(
        "DELETE FROM sources WHERE source_path IN (SELECT source_path FROM entries WHERE id = ?)",
    )?;
    let mut delete_entry = tx.prepare_cached("DELETE FROM entries WHERE id = ?")?;

    let mut removed = 0;
    for id in ids {
        delete_vector.execute(params![id])?;
        delete_completed.execute(params![id])?;
        removed += delete_entry.execute(params![id])?;
    }
    Ok(removed)
}

impl VectorStore {
    /// Append entries in one transaction and return their new ids.
    ///
    /// Either every entry of the call is committed or none is.
    pub fn add(&mut self, entries: &[NewEntry]) -> Result<Vec<i64>, StoreError> {
        self.commit_batch(entries, &[])
    }

    /// Like [`add`](Self::add), and in the same transaction record each of
    /// `completed` as fully indexed. Only recorded sources are reported by
    /// [`sources`](Self::sources).
    pub fn commit_batch(
        &mut self,
        entries: &[NewEntry],
        completed: &[CompletedSource],
    ) -> Result<Vec<i64>, StoreError> {
        for entry in entries {
            self.check_vector(&entry.vector)?;
        }

        let now = Utc::now();
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(entries.len());
        {
            let mut insert_entry = tx.prepare_cached(
                r#"
                INSERT INTO entries (
                    source, source_path, title, page, section, url,
                    content_type, fingerprint, position, content, indexed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            let mut insert_vector =
                tx.prepare_cached("INSERT INTO vec_entries (rowid, embedding) VALUES (?, ?)")?;

            for entry in entries {
                let m = &entry.metadata;
                insert_entry.execute(params![
                    m.source,
                    m.source_path,
                    m.title,
                    m.page,
                    m.section,
                    m.url,
                    m.content_type.as_str(),
                    m.fingerprint,
                    entry.position as i64,
                    entry.content,
                    now,
                ])?;
                let id = tx.last_insert_rowid();
                insert_vector.execute(params![id, serialize_vector(&entry.vector)])?;
                ids.push(id);
            }

            let mut complete = tx.prepare_cached(
                r#"
                INSERT OR REPLACE INTO sources (source_path, fingerprint, chunks, completed_at)
                VALUES (?, ?, ?, ?)
                "#,
            )?;
            for source in completed {
                complete.execute(params![
                    source.source_path,
                    source.fingerprint,
                    source.chunks as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Added {} entries to {}, {} source(s) complete",
            ids.len(),
            self.path().display(),
            completed.len()
        );
        Ok(ids)
    }

    /// Delete entries by id. Unknown ids are ignored; returns the number
    /// of entries removed. A source losing any entry is no longer complete.
    pub fn delete(&mut self, ids: &[i64]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let removed = delete_ids(&tx, ids)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Ids of every entry derived from `source_path`, in insertion order.
    pub fn ids_for_source(&self, source_path: &str) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM entries WHERE source_path = ? ORDER BY id")?;
        let ids = stmt
            .query_map(params![source_path], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Delete every entry derived from `source_path`, and its completion
    /// record, in one transaction.
    pub fn delete_source(&mut self, source_path: &str) -> Result<usize, StoreError> {
        let ids = self.ids_for_source(source_path)?;
        let tx = self.conn.transaction()?;
        let removed = delete_ids(&tx, &ids)?;
        tx.execute("DELETE FROM sources WHERE source_path = ?", params![source_path])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Delete every entry. Ids are not reused afterwards.
    pub fn clear(&mut self) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM sources", [])?;
        tx.execute("DELETE FROM vec_entries", [])?;
        let removed = tx.execute("DELETE FROM entries", [])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Metadata of every stored entry, in insertion order.
    pub fn list_metadata(&self) -> Result<Vec<Metadata>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {METADATA_COLUMNS} FROM entries e ORDER BY e.id"))?;
        let rows = stmt
            .query_map([], |row| metadata_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Map of fully indexed source path -> fingerprint recorded at indexing
    /// time. Sources whose last chunk was never committed are absent.
    pub fn sources(&self) -> Result<HashMap<String, Option<String>>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT source_path, fingerprint FROM sources")?;
        let rows = stmt.query_map([], |row| {
            let source_path: String = row.get(0)?;
            let fingerprint: Option<String> = row.get(1)?;
            Ok((source_path, fingerprint))
        })?;

        let mut sources = HashMap::new();
        for row in rows {
            let (source_path, fingerprint) = row?;
            sources.insert(source_path, fingerprint);
        }
        Ok(sources)
    }

    /// Paths that have entries but no completion record, left behind by an
    /// interrupted run.
    pub fn partial_sources(&self) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT source_path FROM entries
            WHERE source_path NOT IN (SELECT source_path FROM sources)
            "#,
        )?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(paths)
    }

    /// One summary row per indexed source, sorted by path.
    pub fn source_summaries(&self) -> Result<Vec<SourceSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT source_path, MIN(title), COUNT(*), MAX(fingerprint), MAX(indexed_at)
            FROM entries
            GROUP BY source_path
            ORDER BY source_path
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                let indexed_at: DateTime<Utc> = row.get(4)?;
                Ok(SourceSummary {
                    source_path: row.get(0)?,
                    title: row.get(1)?,
                    chunks: row.get::<_, i64>(2)? as usize,
                    fingerprint: row.get(3)?,
                    indexed_at,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Number of stored entries.
    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
