use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::adaptive::settings::Settings;
use crate::adaptive::types::{AlgorithmConfig, AlgorithmType, StateKey};
use crate::db::{
    BanditStatsRow, ConfigSource, ContextualStatsRow, CustomStatsRow, OptimizerStatsRow,
    StatsBatch, StatsStore, StoreError, StoredStats,
};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// SQLite-backed stats store and configuration source.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let in_memory = url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            })
            .busy_timeout(Duration::from_secs(30));

        // An in-memory database lives and dies with its single connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies `sql/schema.sql`. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for stmt in split_sql_statements(SCHEMA_SQL) {
            let sql: String = stmt
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            let trimmed = sql.trim();
            if trimmed.is_empty() {
                continue;
            }
            sqlx::query(trimmed).execute(&self.pool).await?;
        }
        tracing::debug!("sqlite schema applied");
        Ok(())
    }

    pub async fn put_config(&self, config: &AlgorithmConfig) -> Result<(), StoreError> {
        let settings = serde_json::to_string(&config.settings.to_json())?;
        let variants = serde_json::to_string(&config.variants)?;
        sqlx::query(
            r#"
            INSERT INTO "feature_algorithms"
                ("feature_key", "environment_key", "algorithm", "enabled", "is_optimizer",
                 "settings", "variants", "initial_value", "updated_at")
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT ("feature_key", "environment_key") DO UPDATE SET
                "algorithm" = excluded."algorithm",
                "enabled" = excluded."enabled",
                "is_optimizer" = excluded."is_optimizer",
                "settings" = excluded."settings",
                "variants" = excluded."variants",
                "initial_value" = excluded."initial_value",
                "updated_at" = excluded."updated_at"
            "#,
        )
        .bind(&config.feature_key)
        .bind(&config.environment_key)
        .bind(config.algorithm.id())
        .bind(config.enabled)
        .bind(config.is_optimizer)
        .bind(settings)
        .bind(variants)
        .bind(config.initial_value.map(|v| v.to_string()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_config(&self, key: &StateKey) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"DELETE FROM "feature_algorithms" WHERE "feature_key" = ? AND "environment_key" = ?"#,
        )
        .bind(&key.feature)
        .bind(&key.environment)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl StatsStore for SqliteStore {
    async fn upsert(&self, batch: &StatsBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        for row in &batch.bandit {
            sqlx::query(
                r#"
                INSERT INTO "bandit_stats"
                    ("feature_key", "environment_key", "algorithm", "variant_key",
                     "evaluations", "successes", "failures", "metric_sum", "updated_at")
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT ("feature_key", "environment_key", "algorithm", "variant_key") DO UPDATE SET
                    "evaluations" = excluded."evaluations",
                    "successes" = excluded."successes",
                    "failures" = excluded."failures",
                    "metric_sum" = excluded."metric_sum",
                    "updated_at" = excluded."updated_at"
                "#,
            )
            .bind(&row.feature)
            .bind(&row.environment)
            .bind(&row.algorithm)
            .bind(&row.variant)
            .bind(to_i64(row.evaluations))
            .bind(to_i64(row.successes))
            .bind(to_i64(row.failures))
            .bind(row.metric_sum.to_string())
            .bind(row.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for row in &batch.optimizer {
            sqlx::query(
                r#"
                INSERT INTO "optimizer_stats"
                    ("feature_key", "environment_key", "algorithm", "iteration", "current_value",
                     "best_value", "best_reward", "metric_sum", "last_error", "integral",
                     "step_size", "temperature", "direction", "updated_at")
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT ("feature_key", "environment_key", "algorithm") DO UPDATE SET
                    "iteration" = excluded."iteration",
                    "current_value" = excluded."current_value",
                    "best_value" = excluded."best_value",
                    "best_reward" = excluded."best_reward",
                    "metric_sum" = excluded."metric_sum",
                    "last_error" = excluded."last_error",
                    "integral" = excluded."integral",
                    "step_size" = excluded."step_size",
                    "temperature" = excluded."temperature",
                    "direction" = excluded."direction",
                    "updated_at" = excluded."updated_at"
                "#,
            )
            .bind(&row.feature)
            .bind(&row.environment)
            .bind(&row.algorithm)
            .bind(to_i64(row.iteration))
            .bind(row.current_value.to_string())
            .bind(opt_text(row.best_value))
            .bind(opt_text(row.best_reward))
            .bind(row.metric_sum.to_string())
            .bind(opt_text(row.last_error))
            .bind(opt_text(row.integral))
            .bind(opt_text(row.step_size))
            .bind(opt_text(row.temperature))
            .bind(opt_text(row.direction))
            .bind(row.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for row in &batch.contextual {
            sqlx::query(
                r#"
                INSERT INTO "contextual_stats"
                    ("feature_key", "environment_key", "algorithm", "variant_key", "feature_dim",
                     "matrix_a", "vector_b", "pulls", "total_reward", "evaluations",
                     "successes", "failures", "metric_sum", "updated_at")
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT ("feature_key", "environment_key", "algorithm", "variant_key") DO UPDATE SET
                    "feature_dim" = excluded."feature_dim",
                    "matrix_a" = excluded."matrix_a",
                    "vector_b" = excluded."vector_b",
                    "pulls" = excluded."pulls",
                    "total_reward" = excluded."total_reward",
                    "evaluations" = excluded."evaluations",
                    "successes" = excluded."successes",
                    "failures" = excluded."failures",
                    "metric_sum" = excluded."metric_sum",
                    "updated_at" = excluded."updated_at"
                "#,
            )
            .bind(&row.feature)
            .bind(&row.environment)
            .bind(&row.algorithm)
            .bind(&row.variant)
            .bind(to_i64(row.feature_dim as u64))
            .bind(serde_json::to_string(&row.matrix_a)?)
            .bind(serde_json::to_string(&row.vector_b)?)
            .bind(to_i64(row.pulls))
            .bind(row.total_reward.to_string())
            .bind(to_i64(row.evaluations))
            .bind(to_i64(row.successes))
            .bind(to_i64(row.failures))
            .bind(row.metric_sum.to_string())
            .bind(row.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for row in &batch.custom {
            sqlx::query(
                r#"
                INSERT INTO "custom_stats"
                    ("feature_key", "environment_key", "algorithm", "state",
                     "evaluations", "successes", "failures", "updated_at")
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT ("feature_key", "environment_key", "algorithm") DO UPDATE SET
                    "state" = excluded."state",
                    "evaluations" = excluded."evaluations",
                    "successes" = excluded."successes",
                    "failures" = excluded."failures",
                    "updated_at" = excluded."updated_at"
                "#,
            )
            .bind(&row.feature)
            .bind(&row.environment)
            .bind(&row.algorithm)
            .bind(serde_json::to_string(&row.state)?)
            .bind(to_i64(row.evaluations))
            .bind(to_i64(row.successes))
            .bind(to_i64(row.failures))
            .bind(row.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, key: &StateKey, algorithm: &str) -> Result<StoredStats, StoreError> {
        let bandit = sqlx::query(
            r#"
            SELECT * FROM "bandit_stats"
            WHERE "feature_key" = ? AND "environment_key" = ? AND "algorithm" = ?
            ORDER BY "variant_key"
            "#,
        )
        .bind(&key.feature)
        .bind(&key.environment)
        .bind(algorithm)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(bandit_row)
        .collect::<Result<Vec<_>, _>>()?;

        let optimizer = sqlx::query(
            r#"
            SELECT * FROM "optimizer_stats"
            WHERE "feature_key" = ? AND "environment_key" = ? AND "algorithm" = ?
            "#,
        )
        .bind(&key.feature)
        .bind(&key.environment)
        .bind(algorithm)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(optimizer_row)
        .transpose()?;

        let contextual = sqlx::query(
            r#"
            SELECT * FROM "contextual_stats"
            WHERE "feature_key" = ? AND "environment_key" = ? AND "algorithm" = ?
            ORDER BY "variant_key"
            "#,
        )
        .bind(&key.feature)
        .bind(&key.environment)
        .bind(algorithm)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(contextual_row)
        .collect::<Result<Vec<_>, _>>()?;

        let custom = sqlx::query(
            r#"
            SELECT * FROM "custom_stats"
            WHERE "feature_key" = ? AND "environment_key" = ? AND "algorithm" = ?
            "#,
        )
        .bind(&key.feature)
        .bind(&key.environment)
        .bind(algorithm)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(custom_row)
        .transpose()?;

        Ok(StoredStats {
            bandit,
            optimizer,
            contextual,
            custom,
        })
    }

    async fn delete(&self, key: &StateKey) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for table in ["bandit_stats", "optimizer_stats", "contextual_stats", "custom_stats"] {
            let sql = format!(
                r#"DELETE FROM "{table}" WHERE "feature_key" = ? AND "environment_key" = ?"#
            );
            deleted += sqlx::query(&sql)
                .bind(&key.feature)
                .bind(&key.environment)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }
}

#[async_trait]
impl ConfigSource for SqliteStore {
    async fn list_configs(&self) -> Result<Vec<AlgorithmConfig>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT * FROM "feature_algorithms" ORDER BY "feature_key", "environment_key""#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut configs = Vec::with_capacity(rows.len());
        for row in &rows {
            match config_row(row) {
                Ok(config) => configs.push(config),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable algorithm config");
                }
            }
        }
        Ok(configs)
    }

    async fn get_config(&self, key: &StateKey) -> Result<Option<AlgorithmConfig>, StoreError> {
        sqlx::query(
            r#"SELECT * FROM "feature_algorithms" WHERE "feature_key" = ? AND "environment_key" = ?"#,
        )
        .bind(&key.feature)
        .bind(&key.environment)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(config_row)
        .transpose()
    }
}

fn config_row(row: &SqliteRow) -> Result<AlgorithmConfig, StoreError> {
    let key = StateKey::new(
        row.try_get::<String, _>("feature_key")?,
        row.try_get::<String, _>("environment_key")?,
    );
    let algorithm_raw: String = row.try_get("algorithm")?;
    let algorithm = AlgorithmType::from_str(&algorithm_raw).map_err(|source| StoreError::Algorithm {
        key: key.clone(),
        source,
    })?;

    let settings_raw: String = row.try_get("settings")?;
    let settings = match serde_json::from_str::<serde_json::Value>(&settings_raw)? {
        serde_json::Value::Object(map) => Settings::from_json(&map),
        _ => Settings::new(),
    };
    let variants: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("variants")?)?;

    Ok(AlgorithmConfig {
        feature_key: key.feature,
        environment_key: key.environment,
        algorithm,
        enabled: row.try_get("enabled")?,
        is_optimizer: row.try_get("is_optimizer")?,
        settings,
        variants,
        initial_value: opt_decimal("initial_value", row.try_get("initial_value")?)?,
    })
}

fn bandit_row(row: &SqliteRow) -> Result<BanditStatsRow, StoreError> {
    Ok(BanditStatsRow {
        feature: row.try_get("feature_key")?,
        environment: row.try_get("environment_key")?,
        algorithm: row.try_get("algorithm")?,
        variant: row.try_get("variant_key")?,
        evaluations: to_u64("evaluations", row.try_get("evaluations")?)?,
        successes: to_u64("successes", row.try_get("successes")?)?,
        failures: to_u64("failures", row.try_get("failures")?)?,
        metric_sum: decimal("metric_sum", row.try_get("metric_sum")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

fn optimizer_row(row: &SqliteRow) -> Result<OptimizerStatsRow, StoreError> {
    Ok(OptimizerStatsRow {
        feature: row.try_get("feature_key")?,
        environment: row.try_get("environment_key")?,
        algorithm: row.try_get("algorithm")?,
        iteration: to_u64("iteration", row.try_get("iteration")?)?,
        current_value: decimal("current_value", row.try_get("current_value")?)?,
        best_value: opt_decimal("best_value", row.try_get("best_value")?)?,
        best_reward: opt_decimal("best_reward", row.try_get("best_reward")?)?,
        metric_sum: decimal("metric_sum", row.try_get("metric_sum")?)?,
        last_error: opt_decimal("last_error", row.try_get("last_error")?)?,
        integral: opt_decimal("integral", row.try_get("integral")?)?,
        step_size: opt_decimal("step_size", row.try_get("step_size")?)?,
        temperature: opt_decimal("temperature", row.try_get("temperature")?)?,
        direction: opt_decimal("direction", row.try_get("direction")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

fn contextual_row(row: &SqliteRow) -> Result<ContextualStatsRow, StoreError> {
    let feature_dim = to_u64("feature_dim", row.try_get("feature_dim")?)?;
    Ok(ContextualStatsRow {
        feature: row.try_get("feature_key")?,
        environment: row.try_get("environment_key")?,
        algorithm: row.try_get("algorithm")?,
        variant: row.try_get("variant_key")?,
        feature_dim: feature_dim as usize,
        matrix_a: float_vec(&row.try_get::<String, _>("matrix_a")?)?,
        vector_b: float_vec(&row.try_get::<String, _>("vector_b")?)?,
        pulls: to_u64("pulls", row.try_get("pulls")?)?,
        total_reward: decimal("total_reward", row.try_get("total_reward")?)?,
        evaluations: to_u64("evaluations", row.try_get("evaluations")?)?,
        successes: to_u64("successes", row.try_get("successes")?)?,
        failures: to_u64("failures", row.try_get("failures")?)?,
        metric_sum: decimal("metric_sum", row.try_get("metric_sum")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

/// JSON writes non-finite floats as `null`; read them back as NaN so the row
/// still loads and the model can be rebuilt.
fn float_vec(json: &str) -> Result<Vec<f64>, StoreError> {
    let values: Vec<Option<f64>> = serde_json::from_str(json)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn custom_row(row: &SqliteRow) -> Result<CustomStatsRow, StoreError> {
    Ok(CustomStatsRow {
        feature: row.try_get("feature_key")?,
        environment: row.try_get("environment_key")?,
        algorithm: row.try_get("algorithm")?,
        state: serde_json::from_str(&row.try_get::<String, _>("state")?)?,
        evaluations: to_u64("evaluations", row.try_get("evaluations")?)?,
        successes: to_u64("successes", row.try_get("successes")?)?,
        failures: to_u64("failures", row.try_get("failures")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

fn decimal(field: &'static str, value: String) -> Result<Decimal, StoreError> {
    Decimal::from_str(value.trim()).map_err(|_| StoreError::Decode { field, value })
}

fn opt_decimal(field: &'static str, value: Option<String>) -> Result<Option<Decimal>, StoreError> {
    value.map(|v| decimal(field, v)).transpose()
}

fn opt_text(value: Option<Decimal>) -> Option<String> {
    value.map(|v| v.to_string())
}

fn to_u64(field: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Decode {
        field,
        value: value.to_string(),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn timestamp(value: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Decode {
            field: "updated_at",
            value,
        })
}

/// Splits a SQL script on `;` outside of quoted text.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            ';' if !in_single_quote && !in_double_quote => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}
