//! Geospatial provider client
//!
//! Requests spatial-mean reductions of daily image collections over a town
//! polygon. Each response feature is one day that the collection covers.
//!
//! The endpoint is a reduction sidecar in front of Earth Engine, not the
//! Earth Engine REST API itself. Its contract is a single `POST
//! {base_url}/reduce` taking a [`ReduceRequest`] and answering
//! `{"features": [{"properties": {"date": "YYYY-MM-DD", "<band>": value}}]}`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::external::google_auth::GoogleAuth;

/// One reduction request: a collection, its bands, an inclusive date range
/// and a GeoJSON polygon
#[derive(Debug, Clone, Serialize)]
pub struct ReduceRequest {
    pub collection: String,
    pub bands: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub geometry: serde_json::Value,
    pub scale_meters: f64,
    pub reducer: &'static str,
}

/// Spatial means for one covered day, keyed by band name
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedDay {
    pub date: NaiveDate,
    pub values: BTreeMap<String, Option<f64>>,
}

/// Source of daily spatial-mean reductions
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn reduce_daily(&self, request: &ReduceRequest) -> AppResult<Vec<ReducedDay>>;
}

#[derive(Debug, Deserialize)]
struct ReduceResponse {
    #[serde(default)]
    features: Vec<ReduceFeature>,
}

#[derive(Debug, Deserialize)]
struct ReduceFeature {
    properties: serde_json::Map<String, serde_json::Value>,
}

/// HTTP client for the reduction sidecar
#[derive(Clone)]
pub struct EarthEngineClient {
    client: Client,
    base_url: String,
    auth: Option<GoogleAuth>,
}

impl EarthEngineClient {
    /// Create a client whose requests time out after `timeout`
    pub fn new(base_url: String, timeout: Duration, auth: Option<GoogleAuth>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    fn convert_response(data: ReduceResponse) -> Vec<ReducedDay> {
        data.features
            .into_iter()
            .filter_map(|feature| {
                let mut properties = feature.properties;
                let date = properties
                    .remove("date")
                    .and_then(|d| d.as_str().map(str::to_string))
                    .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())?;
                let values = properties
                    .into_iter()
                    .map(|(band, value)| (band, value.as_f64()))
                    .collect();
                Some(ReducedDay { date, values })
            })
            .collect()
    }
}

#[async_trait]
impl GeoProvider for EarthEngineClient {
    async fn reduce_daily(&self, request: &ReduceRequest) -> AppResult<Vec<ReducedDay>> {
        let url = format!("{}/reduce", self.base_url.trim_end_matches('/'));

        let mut builder = self.client.post(&url).json(request);
        if let Some(auth) = &self.auth {
            builder = builder.bearer_auth(auth.access_token().await?);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Reduce request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Provider error for {}: {} - {}",
                request.collection, status, body
            )));
        }

        let data: ReduceResponse = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse reduce response: {}", e)))?;

        Ok(Self::convert_response(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_response_parses_dates_and_nulls() {
        let data: ReduceResponse = serde_json::from_value(serde_json::json!({
            "features": [
                {"properties": {"date": "2025-03-01", "NDVI": 4210.0}},
                {"properties": {"date": "2025-03-02", "NDVI": null}},
                {"properties": {"NDVI": 1.0}},
            ]
        }))
        .unwrap();

        let days = EarthEngineClient::convert_response(data);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(days[0].values.get("NDVI"), Some(&Some(4210.0)));
        assert_eq!(days[1].values.get("NDVI"), Some(&None));
        assert!(!days[0].values.contains_key("date"));
    }

    #[test]
    fn test_missing_features_is_empty() {
        let data: ReduceResponse = serde_json::from_str("{}").unwrap();
        assert!(EarthEngineClient::convert_response(data).is_empty());
    }

    #[test]
    fn test_request_serializes_dates_as_iso() {
        let request = ReduceRequest {
            collection: "MODIS/061/MOD11A1".into(),
            bands: vec!["LST_Day_1km".into()],
            start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 22).unwrap(),
            geometry: serde_json::json!({"type": "Polygon", "coordinates": []}),
            scale_meters: 1000.0,
            reducer: "mean",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["start_date"], "2025-03-01");
        assert_eq!(json["reducer"], "mean");
    }

    fn request() -> ReduceRequest {
        ReduceRequest {
            collection: "MODIS/061/MOD13Q1".into(),
            bands: vec!["NDVI".into()],
            start_date: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 22).unwrap(),
            geometry: serde_json::json!({"type": "Polygon", "coordinates": []}),
            scale_meters: 250.0,
            reducer: "mean",
        }
    }

    /// Answer one request with `status` and `body` after reading it fully
    async fn respond_once(status: &'static str, body: &'static str) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_reduce_daily_over_http() {
        let addr = respond_once(
            "200 OK",
            r#"{"features":[{"properties":{"date":"2025-03-06","NDVI":4325.0}}]}"#,
        )
        .await;
        let client =
            EarthEngineClient::new(format!("http://{}/", addr), Duration::from_secs(5), None)
                .unwrap();

        let days = client.reduce_daily(&request()).await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2025, 3, 6).unwrap());
        assert_eq!(days[0].values.get("NDVI"), Some(&Some(4325.0)));
    }

    #[tokio::test]
    async fn test_reduce_daily_error_status_is_provider_error() {
        let addr = respond_once("429 Too Many Requests", r#"{"error":"quota"}"#).await;
        let client =
            EarthEngineClient::new(format!("http://{}", addr), Duration::from_secs(5), None)
                .unwrap();

        let result = client.reduce_daily(&request()).await;
        assert!(matches!(result, Err(AppError::Provider(msg)) if msg.contains("429")));
    }
}
