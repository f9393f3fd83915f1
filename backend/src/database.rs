//! PostgreSQL storage for user risk reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{DangerLevel, RiskReportEntry};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use crate::models::Coordinate;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Risk report not found: {0}")]
    NotFound(i64),

    #[error("Invalid report data: {0}")]
    InvalidData(String),
}

/// Row of `risk_reports`.
#[derive(Debug, Clone, FromRow)]
pub struct RiskReport {
    pub id: i64,
    pub reason: String,
    pub category: Option<String>,
    pub start_lat: f64,
    pub start_lng: f64,
    pub end_lat: f64,
    pub end_lng: f64,
    pub danger_score: i32,
    pub danger_level: String,
    pub user_type: Option<String>,
    pub age: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl RiskReport {
    pub fn level(&self) -> Result<DangerLevel, DatabaseError> {
        match self.danger_level.as_str() {
            "low" => Ok(DangerLevel::Low),
            "medium" => Ok(DangerLevel::Medium),
            "high" => Ok(DangerLevel::High),
            other => Err(DatabaseError::InvalidData(format!(
                "unknown danger level {other:?} on report {}",
                self.id
            ))),
        }
    }

    pub fn to_entry(&self) -> Result<RiskReportEntry, DatabaseError> {
        Ok(RiskReportEntry {
            id: self.id,
            reason: self.reason.clone(),
            category: self.category.clone(),
            danger_score: self.danger_score,
            danger_level: self.level()?,
            route_coords: vec![[self.start_lng, self.start_lat], [self.end_lng, self.end_lat]],
            user_type: self.user_type.clone(),
            age: self.age,
            created_at: self.created_at.to_rfc3339(),
        })
    }
}

/// A validated, scored report ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRiskReport {
    pub reason: String,
    pub category: Option<String>,
    pub start: Coordinate,
    pub end: Coordinate,
    pub danger_score: i32,
    pub danger_level: DangerLevel,
    pub user_type: Option<String>,
    pub age: Option<i32>,
}

/// Persistence for risk reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert_report(&self, report: NewRiskReport) -> Result<RiskReport, DatabaseError>;

    /// All reports, newest first.
    async fn list_reports(&self) -> Result<Vec<RiskReport>, DatabaseError>;

    async fn get_report(&self, id: i64) -> Result<RiskReport, DatabaseError>;
}

/// Database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool created");

        Ok(Self { pool })
    }

    /// Run database migrations
    ///
    /// # Errors
    /// Returns DatabaseError if migration fails
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        // sqlx::query() rejects multiple statements; raw_sql does not.
        let mut conn = self.pool.acquire().await?;

        let migration_sql = include_str!("../migrations/20250301_create_risk_reports.sql");

        sqlx::raw_sql(migration_sql).execute(&mut *conn).await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

}

#[async_trait]
impl ReportStore for Database {
    async fn insert_report(&self, report: NewRiskReport) -> Result<RiskReport, DatabaseError> {
        let saved = sqlx::query_as::<_, RiskReport>(
            r#"
            INSERT INTO risk_reports (
                reason, category, start_lat, start_lng, end_lat, end_lng,
                danger_score, danger_level, user_type, age
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&report.reason)
        .bind(&report.category)
        .bind(report.start.latitude)
        .bind(report.start.longitude)
        .bind(report.end.latitude)
        .bind(report.end.longitude)
        .bind(report.danger_score)
        .bind(report.danger_level.as_str())
        .bind(&report.user_type)
        .bind(report.age)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            "Risk report saved: ID {} ({} / {})",
            saved.id,
            saved.danger_score,
            saved.danger_level
        );
        Ok(saved)
    }

    async fn list_reports(&self) -> Result<Vec<RiskReport>, DatabaseError> {
        let reports = sqlx::query_as::<_, RiskReport>(
            "SELECT * FROM risk_reports ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        tracing::info!("Retrieved {} risk reports", reports.len());
        Ok(reports)
    }

    async fn get_report(&self, id: i64) -> Result<RiskReport, DatabaseError> {
        sqlx::query_as::<_, RiskReport>("SELECT * FROM risk_reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DatabaseError::NotFound(id))
    }
}
