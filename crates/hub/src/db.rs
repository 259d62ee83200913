use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;

use crate::flags::SystemFlags;

/// Settings key holding the best-effort system flag mirror.
const FLAGS_KEY: &str = "system_flags";

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct AirRow {
    pub ts: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub co2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct WaterRow {
    pub ts: i64,
    pub watertemperature: f64,
    pub ph: f64,
    pub ec: f64,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/farmsmart/farmsmart.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    /// Check that a connection can be taken from the pool.
    pub async fn ping(&self) -> Result<()> {
        self.pool
            .acquire()
            .await
            .context("failed to acquire db connection")?;
        Ok(())
    }

    // ----------------------------
    // Air environment
    // ----------------------------

    pub async fn insert_air(&self, ts: i64, temperature: f64, humidity: f64, co2: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO airenvtbl (ts, temperature, humidity, co2)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(ts)
        .bind(temperature)
        .bind(humidity)
        .bind(co2)
        .execute(&self.pool)
        .await
        .context("insert_air failed")?;
        Ok(())
    }

    pub async fn latest_air(&self) -> Result<Option<AirRow>> {
        sqlx::query_as::<_, AirRow>(
            r#"
            SELECT ts, temperature, humidity, co2
            FROM airenvtbl
            ORDER BY ts DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("latest_air failed")
    }

    /// Newest first.
    pub async fn air_records(&self, limit: i64, offset: i64) -> Result<Vec<AirRow>> {
        sqlx::query_as::<_, AirRow>(
            r#"
            SELECT ts, temperature, humidity, co2
            FROM airenvtbl
            ORDER BY ts DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("air_records failed")
    }

    pub async fn count_air(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM airenvtbl")
            .fetch_one(&self.pool)
            .await
            .context("count_air failed")
    }

    // ----------------------------
    // Water environment
    // ----------------------------

    pub async fn insert_water(&self, ts: i64, water_temperature: f64, ph: f64, ec: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO waterenvtbl (ts, watertemperature, ph, ec)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(ts)
        .bind(water_temperature)
        .bind(ph)
        .bind(ec)
        .execute(&self.pool)
        .await
        .context("insert_water failed")?;
        Ok(())
    }

    pub async fn latest_water(&self) -> Result<Option<WaterRow>> {
        sqlx::query_as::<_, WaterRow>(
            r#"
            SELECT ts, watertemperature, ph, ec
            FROM waterenvtbl
            ORDER BY ts DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("latest_water failed")
    }

    /// Newest first.
    pub async fn water_records(&self, limit: i64, offset: i64) -> Result<Vec<WaterRow>> {
        sqlx::query_as::<_, WaterRow>(
            r#"
            SELECT ts, watertemperature, ph, ec
            FROM waterenvtbl
            ORDER BY ts DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("water_records failed")
    }

    pub async fn count_water(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM waterenvtbl")
            .fetch_one(&self.pool)
            .await
            .context("count_water failed")
    }

    // ----------------------------
    // System flag mirror
    // ----------------------------

    pub async fn save_system_flags(&self, flags: SystemFlags) -> Result<()> {
        let value = serde_json::to_string(&flags).context("serialize system flags")?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value=excluded.value
            "#,
        )
        .bind(FLAGS_KEY)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("save_system_flags failed")?;
        Ok(())
    }

    /// Best-effort mirror: failures are logged and otherwise ignored.
    pub async fn mirror_system_flags(&self, flags: SystemFlags) {
        if let Err(e) = self.save_system_flags(flags).await {
            tracing::warn!("system flag mirror failed: {e:#}");
        }
    }

    pub async fn load_system_flags(&self) -> Result<Option<SystemFlags>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(FLAGS_KEY)
            .fetch_optional(&self.pool)
            .await
            .context("load_system_flags failed")?;

        value
            .map(|v| serde_json::from_str(&v).context("stored system flags are invalid"))
            .transpose()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
