//! Read interface over the performance-results database.
//!
//! The table is written by the evaluation harness; this crate only reads
//! it. Rows are scored per run and aggregated per strategy hash; the router
//! uses the winner to recommend a strategy for an input type.

use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Aggregate standing of one strategy for a `(model, input_type)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyScore {
    pub strategy_hash: String,
    pub mean_score: f64,
    pub success_count: u64,
    pub mean_latency_ms: f64,
    pub mean_tokens: f64,
    pub runs: u64,
}

/// SQLite-backed reader.
pub struct PerformanceDb {
    conn: Arc<Mutex<Connection>>,
}

impl PerformanceDb {
    /// Open a database file, creating the table when absent so a fresh
    /// deployment starts with an empty (not missing) table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Store(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests and ephemeral deployments.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("failed to lock connection: {e}")))?;
        f(&conn).map_err(|e| Error::Store(e.to_string()))
    }

    /// Best strategy hash for a model and input type, or `None` when the
    /// table has no matching rows.
    pub fn best_strategy(
        &self,
        llm_model_id: &str,
        input_type: &str,
    ) -> Result<Option<StrategyScore>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT strategy_hash, metrics, latency_ms, cost
                 FROM performance_results
                 WHERE (llm_model_id = ?1 OR llm_model_id IS NULL OR llm_model_id = '')
                   AND input_type = ?2",
            )?;
            let mapped = stmt.query_map(params![llm_model_id, input_type], |row| {
                Ok(RawRow {
                    strategy_hash: row.get(0)?,
                    metrics: row.get::<_, Option<String>>(1)?,
                    latency_ms: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    cost: row.get::<_, Option<String>>(3)?,
                })
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        Ok(pick_best(&rows))
    }

    /// Test/seed helper; production writes come from the evaluation harness.
    #[cfg(test)]
    pub(crate) fn record_row(
        &self,
        strategy_hash: &str,
        llm_model_id: Option<&str>,
        input_type: &str,
        metrics: &Value,
        latency_ms: i64,
        cost: &Value,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO performance_results
                 (strategy_hash, llm_model_id, input_type, metrics, latency_ms, cost)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    strategy_hash,
                    llm_model_id,
                    input_type,
                    metrics.to_string(),
                    latency_ms,
                    cost.to_string(),
                ],
            )?;
            Ok(())
        })
    }
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS performance_results (
            strategy_hash TEXT NOT NULL,
            llm_model_id TEXT,
            input_type TEXT NOT NULL,
            metrics TEXT,
            latency_ms INTEGER,
            cost TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_perf_lookup
         ON performance_results(input_type, llm_model_id)",
        [],
    )?;
    Ok(())
}

struct RawRow {
    strategy_hash: String,
    metrics: Option<String>,
    latency_ms: i64,
    cost: Option<String>,
}

fn metric_value(metrics: &Value, key: &str) -> f64 {
    match metrics.get(key) {
        Some(Value::Bool(true)) => 1.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn token_count(cost: &Value) -> f64 {
    for key in ["total_tokens", "tokenCount"] {
        if let Some(n) = cost.get(key).and_then(Value::as_f64) {
            return n;
        }
    }
    0.0
}

struct ScoredRow {
    success: f64,
    composite: f64,
    latency_ms: f64,
    tokens: f64,
}

/// Per-row score: exact matches worth 1 each, structural match 0.5;
/// latency and token counts contribute hyperbolically.
fn score_row(row: &RawRow) -> ScoredRow {
    let metrics: Value = row
        .metrics
        .as_deref()
        .and_then(|m| serde_json::from_str(m).ok())
        .unwrap_or(Value::Null);
    let cost: Value = row
        .cost
        .as_deref()
        .and_then(|c| serde_json::from_str(c).ok())
        .unwrap_or(Value::Null);

    let success = metric_value(&metrics, "exactMatchProlog")
        + metric_value(&metrics, "exactMatchAnswer")
        + 0.5 * metric_value(&metrics, "prologStructureMatch");
    let latency_ms = row.latency_ms.max(0) as f64;
    let tokens = token_count(&cost);

    let latency_score = 1000.0 / (latency_ms + 1.0);
    let cost_score = 1000.0 / (tokens + 1.0);
    let composite = 100.0 * success + 10.0 * latency_score + cost_score;

    ScoredRow {
        success,
        composite,
        latency_ms,
        tokens,
    }
}

fn pick_best(rows: &[RawRow]) -> Option<StrategyScore> {
    use std::collections::BTreeMap;

    // BTreeMap keeps hash iteration deterministic
    let mut groups: BTreeMap<&str, Vec<ScoredRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(row.strategy_hash.as_str())
            .or_default()
            .push(score_row(row));
    }

    let mut scores: Vec<StrategyScore> = groups
        .into_iter()
        .map(|(hash, scored)| {
            let runs = scored.len() as u64;
            let n = scored.len() as f64;
            StrategyScore {
                strategy_hash: hash.to_string(),
                mean_score: scored.iter().map(|s| s.composite).sum::<f64>() / n,
                success_count: scored.iter().filter(|s| s.success > 0.0).count() as u64,
                mean_latency_ms: scored.iter().map(|s| s.latency_ms).sum::<f64>() / n,
                mean_tokens: scored.iter().map(|s| s.tokens).sum::<f64>() / n,
                runs,
            }
        })
        .collect();

    // highest mean score; ties by success count, then latency, then cost,
    // then hash for full determinism
    scores.sort_by(|a, b| {
        b.mean_score
            .partial_cmp(&a.mean_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.success_count.cmp(&a.success_count))
            .then(
                a.mean_latency_ms
                    .partial_cmp(&b.mean_latency_ms)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(
                a.mean_tokens
                    .partial_cmp(&b.mean_tokens)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.strategy_hash.cmp(&b.strategy_hash))
    });
    scores.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn metrics(prolog: bool, answer: bool, structure: bool) -> Value {
        json!({
            "exactMatchProlog": prolog,
            "exactMatchAnswer": answer,
            "prologStructureMatch": structure,
        })
    }

    #[test]
    fn test_empty_table_returns_none() {
        let db = PerformanceDb::in_memory().unwrap();
        assert_eq!(db.best_strategy("model", "assert").unwrap(), None);
    }

    #[test]
    fn test_success_dominates_latency_and_cost() {
        let db = PerformanceDb::in_memory().unwrap();
        // winner: both exact matches despite being slow and expensive
        db.record_row(
            "hash-good",
            Some("model"),
            "assert",
            &metrics(true, true, false),
            5000,
            &json!({"total_tokens": 50_000}),
        )
        .unwrap();
        // fast and cheap but wrong
        db.record_row(
            "hash-fast",
            Some("model"),
            "assert",
            &metrics(false, false, false),
            200,
            &json!({"total_tokens": 100}),
        )
        .unwrap();

        let best = db.best_strategy("model", "assert").unwrap().unwrap();
        assert_eq!(best.strategy_hash, "hash-good");
        assert_eq!(best.success_count, 1);
    }

    #[test]
    fn test_model_filter_accepts_null_and_empty() {
        let db = PerformanceDb::in_memory().unwrap();
        db.record_row("h1", None, "query", &metrics(true, false, false), 100, &json!({}))
            .unwrap();
        db.record_row("h1", Some(""), "query", &metrics(true, false, false), 100, &json!({}))
            .unwrap();
        db.record_row(
            "h2",
            Some("other-model"),
            "query",
            &metrics(true, true, true),
            1,
            &json!({}),
        )
        .unwrap();

        // rows for other models are excluded; NULL and '' match any model
        let best = db.best_strategy("my-model", "query").unwrap().unwrap();
        assert_eq!(best.strategy_hash, "h1");
        assert_eq!(best.runs, 2);
    }

    #[test]
    fn test_input_type_filter() {
        let db = PerformanceDb::in_memory().unwrap();
        db.record_row("h1", None, "assert", &metrics(true, true, false), 10, &json!({}))
            .unwrap();
        assert!(db.best_strategy("m", "query").unwrap().is_none());
    }

    #[test]
    fn test_tie_broken_by_success_count_then_latency() {
        let db = PerformanceDb::in_memory().unwrap();
        // identical composite profile per run, but h2 has two successful runs
        for _ in 0..2 {
            db.record_row("h2", None, "assert", &metrics(true, false, false), 100, &json!({"total_tokens": 10}))
                .unwrap();
        }
        db.record_row("h1", None, "assert", &metrics(true, false, false), 100, &json!({"total_tokens": 10}))
            .unwrap();

        let best = db.best_strategy("m", "assert").unwrap().unwrap();
        assert_eq!(best.strategy_hash, "h2");
        assert_eq!(best.success_count, 2);
    }

    #[test]
    fn test_deterministic_on_full_tie() {
        let db = PerformanceDb::in_memory().unwrap();
        for hash in ["zz", "aa", "mm"] {
            db.record_row(hash, None, "assert", &metrics(true, false, false), 100, &json!({"total_tokens": 10}))
                .unwrap();
        }
        let best = db.best_strategy("m", "assert").unwrap().unwrap();
        assert_eq!(best.strategy_hash, "aa");
    }

    #[test]
    fn test_structure_match_worth_half() {
        let row = RawRow {
            strategy_hash: "h".into(),
            metrics: Some(metrics(false, false, true).to_string()),
            latency_ms: 999,
            cost: Some(json!({"tokenCount": 999}).to_string()),
        };
        let scored = score_row(&row);
        assert!((scored.success - 0.5).abs() < 1e-9);
        assert!((scored.composite - (50.0 + 10.0 + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_json_scores_zero() {
        let row = RawRow {
            strategy_hash: "h".into(),
            metrics: Some("not json".into()),
            latency_ms: 0,
            cost: None,
        };
        let scored = score_row(&row);
        assert_eq!(scored.success, 0.0);
        assert!((scored.composite - (10_000.0 + 1000.0)).abs() < 1e-6);
    }
}
