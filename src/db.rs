use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::ingest::{self, IngestRow};
use crate::models::Record;
use crate::store::{RecordStore, Session};

pub async fn connect(config: &StoreConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn insert_row(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    row: &IngestRow,
) -> anyhow::Result<()> {
    let record = &row.record;
    sqlx::query(
        r#"
        INSERT INTO student_health_records (
            age, gender, university, department, academic_year, cgpa, scholarship,
            anxiety_score, anxiety_label, stress_score, stress_label,
            depression_score, depression_label
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(record.age.as_deref())
    .bind(record.gender.as_deref())
    .bind(&record.university)
    .bind(record.department.as_deref())
    .bind(record.academic_year.as_deref())
    .bind(record.cgpa.as_deref())
    .bind(row.scholarship.as_deref())
    .bind(record.anxiety_score)
    .bind(row.anxiety_label.as_deref())
    .bind(record.stress_score)
    .bind(row.stress_label.as_deref())
    .bind(record.depression_score)
    .bind(row.depression_label.as_deref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Replaces the table contents in one transaction so a failed load leaves the
/// previous rows in place.
async fn replace_rows(pool: &PgPool, rows: &[IngestRow]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    sqlx::query("TRUNCATE TABLE student_health_records RESTART IDENTITY")
        .execute(&mut *tx)
        .await?;

    for row in rows {
        insert_row(&mut tx, row).await?;
    }

    tx.commit().await?;
    Ok(rows.len())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let rows: Vec<IngestRow> = ingest::seed_records()
        .into_iter()
        .map(|record| IngestRow {
            record,
            scholarship: None,
            anxiety_label: None,
            stress_label: None,
            depression_label: None,
        })
        .collect();
    replace_rows(pool, &rows).await
}

pub async fn import_csv(pool: &PgPool, csv_path: &Path) -> anyhow::Result<(usize, usize)> {
    let outcome = ingest::read_csv(csv_path)?;
    let inserted = replace_rows(pool, &outcome.rows).await?;
    info!(inserted, skipped = outcome.skipped, "survey export loaded");
    Ok((inserted, outcome.skipped))
}

fn record_from_row(row: &PgRow) -> std::result::Result<Record, sqlx::Error> {
    Ok(Record {
        id: row.try_get("id")?,
        university: row.try_get("university")?,
        anxiety_score: row.try_get("anxiety_score")?,
        stress_score: row.try_get("stress_score")?,
        depression_score: row.try_get("depression_score")?,
        age: row.try_get("age")?,
        gender: row.try_get("gender")?,
        department: row.try_get("department")?,
        academic_year: row.try_get("academic_year")?,
        cgpa: row.try_get("cgpa")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn session(&self) -> Result<Box<dyn Session>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }
}

/// One pooled connection, returned to the pool when dropped.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl Session for PgSession {
    async fn scan_records(&mut self) -> Result<Vec<Record>> {
        let rows = sqlx::query(
            "SELECT id, university, anxiety_score, stress_score, depression_score, \
             age, gender, department, academic_year, cgpa \
             FROM student_health_records",
        )
        .fetch_all(&mut *self.conn)
        .await?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
