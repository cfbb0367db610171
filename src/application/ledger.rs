//! Durable predictions store. Single table, owned exclusively by this
//! module; every mutation is a single statement dispatched through a fixed
//! match on `Timeframe` rather than string-interpolated column names.

use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::domain::errors::PersistenceError;
use crate::domain::types::{LedgerStatistics, Prediction, Signal, Timeframe};

const UNAUDITED_PAGE_LIMIT: i64 = 100;

fn signal_str(signal: Signal) -> &'static str {
    match signal {
        Signal::Buy => "BUY",
        Signal::Sell => "SELL",
        Signal::Hold => "HOLD",
    }
}

fn signal_from_str(s: &str) -> Signal {
    match s {
        "BUY" => Signal::Buy,
        "SELL" => Signal::Sell,
        _ => Signal::Hold,
    }
}

pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub async fn open(db_url: &str) -> Result<Self, PersistenceError> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = std::path::Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| PersistenceError::Io { path: db_url.to_string(), source: e })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(|e| PersistenceError::Corrupt { path: db_url.to_string(), reason: e.to_string() })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Test-only hook for backdating rows directly; production code never
    /// touches the pool outside the methods below.
    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: i64, hours_ago: i64) -> Result<(), PersistenceError> {
        let ts = (Utc::now() - ChronoDuration::hours(hours_ago)).to_rfc3339();
        sqlx::query("UPDATE predictions SET timestamp = ? WHERE id = ?").bind(ts).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                predicted_bias TEXT NOT NULL,
                predicted_outcome TEXT NOT NULL,
                confidence REAL NOT NULL,
                market_regime TEXT NOT NULL,
                archetype TEXT NOT NULL,
                signal TEXT NOT NULL,
                price_at_prediction REAL NOT NULL,
                actual_price_1h REAL,
                actual_price_4h REAL,
                actual_price_12h REAL,
                success_score_1h REAL,
                success_score_4h REAL,
                success_score_12h REAL,
                audited INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_predictions_timestamp ON predictions (timestamp);")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_predictions_audited ON predictions (audited);")
            .execute(&self.pool)
            .await?;

        info!("ledger schema initialized");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        predicted_bias: &str,
        predicted_outcome: &str,
        confidence: f64,
        market_regime: &str,
        archetype: &str,
        signal: Signal,
        price_at_prediction: f64,
    ) -> Result<i64, PersistenceError> {
        let row = sqlx::query(
            r#"
            INSERT INTO predictions
                (timestamp, predicted_bias, predicted_outcome, confidence, market_regime, archetype, signal, price_at_prediction, audited)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            RETURNING id
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(predicted_bias)
        .bind(predicted_outcome)
        .bind(confidence)
        .bind(market_regime)
        .bind(archetype)
        .bind(signal_str(signal))
        .bind(price_at_prediction)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    pub async fn set_actual_price(&self, id: i64, tf: Timeframe, price: f64) -> Result<(), PersistenceError> {
        match tf {
            Timeframe::OneHour => {
                sqlx::query("UPDATE predictions SET actual_price_1h = ? WHERE id = ?").bind(price).bind(id)
            }
            Timeframe::FourHour => {
                sqlx::query("UPDATE predictions SET actual_price_4h = ? WHERE id = ?").bind(price).bind(id)
            }
            Timeframe::TwelveHour => {
                sqlx::query("UPDATE predictions SET actual_price_12h = ? WHERE id = ?").bind(price).bind(id)
            }
        }
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_score(&self, id: i64, tf: Timeframe, score: f64) -> Result<(), PersistenceError> {
        match tf {
            Timeframe::OneHour => {
                sqlx::query("UPDATE predictions SET success_score_1h = ? WHERE id = ?").bind(score).bind(id)
            }
            Timeframe::FourHour => {
                sqlx::query("UPDATE predictions SET success_score_4h = ? WHERE id = ?").bind(score).bind(id)
            }
            Timeframe::TwelveHour => {
                sqlx::query("UPDATE predictions SET success_score_12h = ? WHERE id = ?").bind(score).bind(id)
            }
        }
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT success_score_1h, success_score_4h, success_score_12h FROM predictions WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let all_present = row.try_get::<Option<f64>, _>("success_score_1h")?.is_some()
            && row.try_get::<Option<f64>, _>("success_score_4h")?.is_some()
            && row.try_get::<Option<f64>, _>("success_score_12h")?.is_some();
        if all_present {
            self.mark_audited(id).await?;
        }
        Ok(())
    }

    pub async fn mark_audited(&self, id: i64) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE predictions SET audited = 1 WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    /// Rows at least `min_age_hours` old, not yet audited, still missing
    /// the given timeframe's actual price. Capped at 100 rows, ordered most
    /// recent first, to keep a single reconciliation pass bounded.
    pub async fn unaudited(&self, tf: Timeframe, min_age_hours: i64) -> Result<Vec<Prediction>, PersistenceError> {
        let cutoff = Utc::now() - ChronoDuration::hours(min_age_hours);
        let actual_col = match tf {
            Timeframe::OneHour => "actual_price_1h",
            Timeframe::FourHour => "actual_price_4h",
            Timeframe::TwelveHour => "actual_price_12h",
        };
        let sql = format!(
            "SELECT * FROM predictions WHERE audited = 0 AND timestamp <= ? AND {actual_col} IS NULL ORDER BY timestamp DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff.to_rfc3339())
            .bind(UNAUDITED_PAGE_LIMIT)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_prediction).collect()
    }

    pub async fn failed(&self, limit: i64, min_confidence: f64) -> Result<Vec<Prediction>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE confidence >= ?
              AND (success_score_1h IS NOT NULL OR success_score_4h IS NOT NULL OR success_score_12h IS NOT NULL)
            "#,
        )
        .bind(min_confidence)
        .fetch_all(&self.pool)
        .await?;

        let mut predictions: Vec<Prediction> = rows.into_iter().map(row_to_prediction).collect::<Result<_, _>>()?;
        predictions.sort_by(|a, b| avg_score(a).partial_cmp(&avg_score(b)).unwrap_or(std::cmp::Ordering::Equal));
        predictions.truncate(limit.max(0) as usize);
        Ok(predictions)
    }

    pub async fn statistics(&self) -> Result<LedgerStatistics, PersistenceError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS c FROM predictions")
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;
        let audited: i64 = sqlx::query("SELECT COUNT(*) AS c FROM predictions WHERE audited = 1")
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;
        let avg_score_1h: Option<f64> =
            sqlx::query("SELECT AVG(success_score_1h) AS a FROM predictions WHERE success_score_1h IS NOT NULL")
                .fetch_one(&self.pool)
                .await?
                .try_get("a")?;
        Ok(LedgerStatistics { total, audited, avg_score_1h })
    }
}

fn avg_score(p: &Prediction) -> f64 {
    let scores: Vec<f64> = [p.success_score_1h, p.success_score_4h, p.success_score_12h].into_iter().flatten().collect();
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

fn row_to_prediction(row: sqlx::sqlite::SqliteRow) -> Result<Prediction, PersistenceError> {
    let timestamp_raw: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_raw)
        .map_err(|e| PersistenceError::Corrupt { path: "predictions.timestamp".to_string(), reason: e.to_string() })?
        .with_timezone(&Utc);
    let signal_raw: String = row.try_get("signal")?;

    Ok(Prediction {
        id: row.try_get("id")?,
        timestamp,
        predicted_bias: row.try_get("predicted_bias")?,
        predicted_outcome: row.try_get("predicted_outcome")?,
        confidence: row.try_get("confidence")?,
        market_regime: row.try_get("market_regime")?,
        archetype: row.try_get("archetype")?,
        signal: signal_from_str(&signal_raw),
        price_at_prediction: row.try_get("price_at_prediction")?,
        actual_price_1h: row.try_get("actual_price_1h")?,
        actual_price_4h: row.try_get("actual_price_4h")?,
        actual_price_12h: row.try_get("actual_price_12h")?,
        success_score_1h: row.try_get("success_score_1h")?,
        success_score_4h: row.try_get("success_score_4h")?,
        success_score_12h: row.try_get("success_score_12h")?,
        audited: row.try_get::<i64, _>("audited")? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger() -> Ledger {
        Ledger::open("sqlite::memory:").await.expect("open in-memory ledger")
    }

    #[tokio::test]
    async fn record_then_full_audit_round_trip() {
        let ledger = ledger().await;
        let id = ledger.record("bullish", "reversal expected", 0.8, "TRENDING_UP", "NEUTRAL", Signal::Buy, 100.0).await.unwrap();

        ledger.set_actual_price(id, Timeframe::OneHour, 101.0).await.unwrap();
        ledger.set_score(id, Timeframe::OneHour, 0.2).await.unwrap();
        ledger.set_actual_price(id, Timeframe::FourHour, 103.0).await.unwrap();
        ledger.set_score(id, Timeframe::FourHour, 0.4).await.unwrap();
        ledger.set_actual_price(id, Timeframe::TwelveHour, 105.0).await.unwrap();
        ledger.set_score(id, Timeframe::TwelveHour, 0.6).await.unwrap();

        let remaining = ledger.unaudited(Timeframe::OneHour, 0).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn unaudited_respects_min_age() {
        let ledger = ledger().await;
        ledger.record("bullish", "x", 0.8, "TRENDING_UP", "NEUTRAL", Signal::Buy, 100.0).await.unwrap();
        let rows = ledger.unaudited(Timeframe::OneHour, 24).await.unwrap();
        assert!(rows.is_empty(), "a fresh row should not be eligible for a 24h-old audit pass");
        let rows_now = ledger.unaudited(Timeframe::OneHour, 0).await.unwrap();
        assert_eq!(rows_now.len(), 1);
    }

    #[tokio::test]
    async fn failed_orders_worst_scores_first() {
        let ledger = ledger().await;
        let good = ledger.record("b", "x", 0.9, "TRENDING_UP", "NEUTRAL", Signal::Buy, 100.0).await.unwrap();
        let bad = ledger.record("b", "x", 0.9, "TRENDING_UP", "NEUTRAL", Signal::Buy, 100.0).await.unwrap();
        ledger.set_score(good, Timeframe::OneHour, 0.9).await.unwrap();
        ledger.set_score(bad, Timeframe::OneHour, -0.9).await.unwrap();

        let failed = ledger.failed(5, 0.5).await.unwrap();
        assert_eq!(failed[0].id, bad);
    }

    #[tokio::test]
    async fn failed_filters_by_min_confidence() {
        let ledger = ledger().await;
        let low_conf = ledger.record("b", "x", 0.1, "TRENDING_UP", "NEUTRAL", Signal::Buy, 100.0).await.unwrap();
        ledger.set_score(low_conf, Timeframe::OneHour, -0.9).await.unwrap();

        let failed = ledger.failed(5, 0.5).await.unwrap();
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn statistics_distinguish_no_data_from_zero_average() {
        let ledger = ledger().await;
        let stats = ledger.statistics().await.unwrap();
        assert_eq!(stats.total, 0);
        assert!(stats.avg_score_1h.is_none());

        let id = ledger.record("b", "x", 0.8, "TRENDING_UP", "NEUTRAL", Signal::Buy, 100.0).await.unwrap();
        ledger.set_score(id, Timeframe::OneHour, 0.0).await.unwrap();
        let stats = ledger.statistics().await.unwrap();
        assert_eq!(stats.avg_score_1h, Some(0.0));
    }
}
