use super::models::{METADATA_COLUMNS, SearchHit, metadata_from_row};
use super::{StoreError, VectorStore, serialize_vector};
use rusqlite::params;

/// `None` for rows without a defined distance (zero-norm vectors).
fn map_search_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<SearchHit>> {
    let Some(distance) = row.get::<_, Option<f64>>(3)? else {
        return Ok(None);
    };
    let score = (1.0 - distance / 2.0) as f32;

    Ok(Some(SearchHit {
        id: row.get(0)?,
        content: row.get(1)?,
        position: row.get::<_, i64>(2)? as usize,
        metadata: metadata_from_row(row, 4)?,
        score,
    }))
}

impl VectorStore {
    /// Nearest entries to `query_vector` by cosine distance.
    ///
    /// Returns at most `top_k` hits ordered by descending score, ties in
    /// insertion order. With a `score_threshold`, hits scoring below it
    /// are dropped even when they are inside the top `top_k`.
    pub fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.check_vector(query_vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            SELECT * FROM (
                SELECT
                    e.id,
                    e.content,
                    e.position,
                    vec_distance_cosine(v.embedding, ?) AS distance,
                    {METADATA_COLUMNS}
                FROM vec_entries v
                JOIN entries e ON v.rowid = e.id
            )
            WHERE distance IS NOT NULL
            ORDER BY distance ASC, id ASC
            LIMIT ?
            "#
        );

        let mut stmt = self.conn.prepare_cached(&query)?;
        let rows = stmt.query_map(
            params![serialize_vector(query_vector), top_k as i64],
            map_search_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            let Some(hit) = row? else {
                continue;
            };
            if score_threshold.is_some_and(|t| hit.score < t) {
                continue;
            }
            results.push(hit);
        }

        Ok(results)
    }
}
