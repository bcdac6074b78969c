//! Prediction persistence
//!
//! Relational rows are append-only and written in one transaction per run.
//! The document mirror upserts one prediction document per (date, town) and
//! appends an alert document for every alerting town.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{document_key, PredictionRecord, Provenance, Severity, Town};

pub const PREDICTIONS_COLLECTION: &str = "predictions";
pub const ALERTS_COLLECTION: &str = "alerts";

// ============================================================================
// Relational store
// ============================================================================

/// Append-only store of prediction rows
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Insert every record of one run atomically
    async fn insert_run(&self, records: &[PredictionRecord]) -> AppResult<()>;
}

/// PostgreSQL prediction store
#[derive(Clone)]
pub struct PgPredictionStore {
    db: PgPool,
}

impl PgPredictionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PredictionStore for PgPredictionStore {
    async fn insert_run(&self, records: &[PredictionRecord]) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO predictions (
                    run_id, run_ts, start_date, end_date, town,
                    probability, alert, details_json
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.run_id)
            .bind(record.run_ts.with_timezone(&Utc))
            .bind(record.start_date)
            .bind(record.end_date)
            .bind(record.town.name())
            .bind(record.probability)
            .bind(record.alert)
            .bind(record.details_json())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Process-local prediction store, used when no database is configured
#[derive(Clone, Default)]
pub struct InMemoryPredictionStore {
    rows: Arc<Mutex<Vec<PredictionRecord>>>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> Vec<PredictionRecord> {
        self.rows.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl PredictionStore for InMemoryPredictionStore {
    async fn insert_run(&self, records: &[PredictionRecord]) -> AppResult<()> {
        self.rows.lock().await.extend_from_slice(records);
        Ok(())
    }
}

// ============================================================================
// Document store
// ============================================================================

/// Published view of one prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionDocument {
    pub town: Town,
    pub date: NaiveDate,
    pub probability: f64,
    pub alert: bool,
    pub severity: Severity,
    pub provenance: Provenance,
    pub message: String,
    pub timestamp: DateTime<FixedOffset>,
}

impl From<&PredictionRecord> for PredictionDocument {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            town: record.town,
            date: record.start_date,
            probability: record.probability,
            alert: record.alert,
            severity: record.severity,
            provenance: record.provenance,
            message: record.message(),
            timestamp: record.run_ts,
        }
    }
}

/// Keyed document collections
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or replace the document `id` in `collection`
    async fn upsert(&self, collection: &str, id: &str, document: &PredictionDocument)
        -> AppResult<()>;

    /// Add a document under a generated id
    async fn append(&self, collection: &str, document: &PredictionDocument) -> AppResult<()>;
}

type Collections = BTreeMap<String, BTreeMap<String, PredictionDocument>>;

/// Process-local document store
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<Mutex<Collections>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn documents(&self, collection: &str) -> BTreeMap<String, PredictionDocument> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        document: &PredictionDocument,
    ) -> AppResult<()> {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn append(&self, collection: &str, document: &PredictionDocument) -> AppResult<()> {
        let id = Uuid::new_v4().to_string();
        self.upsert(collection, &id, document).await
    }
}

// ============================================================================
// Mirror
// ============================================================================

/// A town whose mirror write failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorFailure {
    pub town: Town,
    /// Stable error code, see [`crate::error::AppError::code`]
    pub code: &'static str,
    pub reason: String,
}

/// Best-effort publisher of committed predictions to the document store
#[derive(Clone)]
pub struct PredictionMirror {
    store: Arc<dyn DocumentStore>,
}

impl PredictionMirror {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Upsert the prediction document and append an alert when raised
    pub async fn publish(&self, record: &PredictionRecord) -> AppResult<()> {
        let document = PredictionDocument::from(record);
        let key = document_key(record.start_date, record.town);

        self.store
            .upsert(PREDICTIONS_COLLECTION, &key, &document)
            .await?;

        if record.alert {
            self.store.append(ALERTS_COLLECTION, &document).await?;
        }
        Ok(())
    }

    /// Publish every record; a failing town never stops the others
    pub async fn publish_all(&self, records: &[PredictionRecord]) -> Vec<MirrorFailure> {
        let mut failures = Vec::new();
        for record in records {
            if let Err(e) = self.publish(record).await {
                tracing::warn!(
                    town = %record.town,
                    code = e.code(),
                    error = %e,
                    "Document mirror write failed"
                );
                failures.push(MirrorFailure {
                    town: record.town,
                    code: e.code(),
                    reason: e.to_string(),
                });
            }
        }
        failures
    }
}
