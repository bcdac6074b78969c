//! Firestore REST document store
//!
//! Documents are written with typed Firestore values. Upserts use `PATCH`
//! on the document path; appends `POST` to the collection and let Firestore
//! assign the id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::external::google_auth::GoogleAuth;
use crate::services::persistence::{DocumentStore, PredictionDocument};

/// Firestore client scoped to one project's default database
#[derive(Clone)]
pub struct FirestoreDocumentStore {
    client: Client,
    base_url: String,
    project_id: String,
    auth: Option<GoogleAuth>,
}

impl FirestoreDocumentStore {
    /// Create a client whose requests time out after `timeout`
    pub fn new(
        base_url: String,
        project_id: String,
        auth: GoogleAuth,
        timeout: Duration,
    ) -> AppResult<Self> {
        let mut store = Self::with_base_url(base_url, project_id, timeout)?;
        store.auth = Some(auth);
        Ok(store)
    }

    /// Create an unauthenticated client (for the emulator and tests)
    pub fn with_base_url(base_url: String, project_id: String, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::DocumentStore(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url,
            project_id,
            auth: None,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.base_url.trim_end_matches('/'),
            self.project_id,
            collection
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> AppResult<()> {
        let request = match &self.auth {
            Some(auth) => request.bearer_auth(auth.access_token().await?),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| AppError::DocumentStore(format!("{} request failed: {}", action, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::DocumentStore(format!(
                "{} rejected: {} - {}",
                action, status, body
            )));
        }
        Ok(())
    }
}

/// Encode a document as a Firestore `fields` object
pub fn encode_document(document: &PredictionDocument) -> Value {
    let mut fields = Map::new();
    fields.insert("town".into(), json!({ "stringValue": document.town.name() }));
    fields.insert(
        "date".into(),
        json!({ "stringValue": document.date.format("%Y-%m-%d").to_string() }),
    );
    fields.insert("probability".into(), json!({ "doubleValue": document.probability }));
    fields.insert("alert".into(), json!({ "booleanValue": document.alert }));
    fields.insert(
        "severity".into(),
        json!({ "stringValue": document.severity.to_string() }),
    );
    fields.insert(
        "provenance".into(),
        json!({ "stringValue": document.provenance.as_str() }),
    );
    fields.insert("message".into(), json!({ "stringValue": document.message }));
    fields.insert(
        "timestamp".into(),
        json!({ "timestampValue": document.timestamp.to_rfc3339() }),
    );
    json!({ "fields": fields })
}

#[async_trait]
impl DocumentStore for FirestoreDocumentStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        document: &PredictionDocument,
    ) -> AppResult<()> {
        let url = format!("{}/{}", self.collection_url(collection), id);
        let request = self.client.patch(&url).json(&encode_document(document));
        self.send(request, "Upsert").await
    }

    async fn append(&self, collection: &str, document: &PredictionDocument) -> AppResult<()> {
        let url = self.collection_url(collection);
        let request = self.client.post(&url).json(&encode_document(document));
        self.send(request, "Append").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provenance, Severity, Town};
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    fn document() -> PredictionDocument {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        PredictionDocument {
            town: Town::Bentiu,
            date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            probability: 0.72,
            alert: true,
            severity: Severity::Moderate,
            provenance: Provenance::Nudged,
            message: "msg".into(),
            timestamp: tz.with_ymd_and_hms(2025, 3, 4, 6, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_encode_uses_typed_values() {
        let encoded = encode_document(&document());
        let fields = &encoded["fields"];
        assert_eq!(fields["town"]["stringValue"], "Bentiu");
        assert_eq!(fields["date"]["stringValue"], "2025-03-04");
        assert_eq!(fields["probability"]["doubleValue"], 0.72);
        assert_eq!(fields["alert"]["booleanValue"], true);
        assert_eq!(fields["severity"]["stringValue"], "Moderate");
        assert_eq!(fields["provenance"]["stringValue"], "nudged");
        assert_eq!(
            fields["timestamp"]["timestampValue"],
            "2025-03-04T06:00:00+02:00"
        );
    }

    #[test]
    fn test_collection_url() {
        let store = FirestoreDocumentStore::with_base_url(
            "https://firestore.googleapis.com/v1/".into(),
            "harara".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            store.collection_url("predictions"),
            "https://firestore.googleapis.com/v1/projects/harara/databases/(default)/documents/predictions"
        );
    }

    /// Accepts connections and never answers
    async fn silent_listener() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let addr = silent_listener().await;
        let store = FirestoreDocumentStore::with_base_url(
            format!("http://{}", addr),
            "harara".into(),
            Duration::from_millis(200),
        )
        .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            store.upsert("predictions", "2025-03-04_Bentiu", &document()),
        )
        .await
        .expect("upsert should give up on its own");
        assert!(matches!(result, Err(AppError::DocumentStore(_))));
    }
}
