//! REST client for a remote observation service.
//!
//! This is an alternate data-access path: it speaks conventional REST verbs
//! with JSON bodies against a configurable base URL. The application wires
//! the local [`crate::storage::Storage`] by default.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::observation::{now_millis, CreateObservation, Observation, UpdateObservation};
use crate::repository::ObservationRepository;

/// HTTP client for `/observations` endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    /// Create a client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Create a client from the `[api]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if no base URL is configured, or
    /// an error if the HTTP client cannot be built.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::ConfigValidation {
                message: "api.base_url is not set".to_string(),
            })?;
        Self::new(base_url, Duration::from_secs(config.timeout_secs))
    }

    /// The base URL requests are made against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an endpoint path such as `/observations`.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: RequestBuilder, id: Option<&str>) -> Result<Response> {
        let response = request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }
        if let (StatusCode::NOT_FOUND, Some(id)) = (status, id) {
            return Err(Error::not_found(id));
        }

        let message = response.text().await.unwrap_or_default();
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder, id: Option<&str>) -> Result<T> {
        Ok(self.execute(request, id).await?.json().await?)
    }
}

/// Request body for a create: the payload stamped with record times.
fn create_body(input: &CreateObservation, now: i64) -> Result<Value> {
    let mut body = serde_json::to_value(input)?;
    #[allow(clippy::cast_precision_loss)]
    let timestamp = input.timestamp.unwrap_or(now as f64);
    body["timestamp"] = json!(timestamp);
    body["createdAt"] = json!(now);
    body["updatedAt"] = json!(now);
    Ok(body)
}

/// Request body for an update: the changed fields plus `updatedAt`.
fn update_body(update: &UpdateObservation, now: i64) -> Result<Value> {
    let mut body = serde_json::to_value(update)?;
    body["updatedAt"] = json!(now);
    Ok(body)
}

#[async_trait]
impl ObservationRepository for ApiClient {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn list(&self) -> Result<Vec<Observation>> {
        self.json(self.http.get(self.endpoint("/observations")), None)
            .await
    }

    async fn get(&self, id: &str) -> Result<Observation> {
        let url = self.endpoint(&format!("/observations/{id}"));
        self.json(self.http.get(url), Some(id)).await
    }

    async fn create(&self, input: CreateObservation) -> Result<Observation> {
        input.validate()?;
        let body = create_body(&input, now_millis())?;
        debug!("POST observation for {}", input.species);
        self.json(self.http.post(self.endpoint("/observations")).json(&body), None)
            .await
    }

    async fn update(&self, id: &str, update: UpdateObservation) -> Result<Observation> {
        update.validate()?;
        let body = update_body(&update, now_millis())?;
        let url = self.endpoint(&format!("/observations/{id}"));
        self.json(self.http.put(url).json(&body), Some(id)).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("/observations/{id}"));
        self.execute(self.http.delete(url), Some(id)).await?;
        Ok(())
    }

    async fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<Observation>> {
        let url = self.endpoint(&format!(
            "/observations/near?lat={latitude}&lng={longitude}&radius={radius_km}"
        ));
        self.json(self.http.get(url), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Duration::from_secs(2)).expect("failed to build client")
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let api = client("https://example.org/api/");
        assert_eq!(api.base_url(), "https://example.org/api");
        assert_eq!(
            api.endpoint("/observations"),
            "https://example.org/api/observations"
        );
    }

    #[test]
    fn test_from_config_requires_base_url() {
        let err = ApiClient::from_config(&ApiConfig::default()).unwrap_err();
        assert!(err.to_string().contains("api.base_url"));

        let config = ApiConfig {
            base_url: Some("http://localhost:8080/api".to_string()),
            timeout_secs: 5,
        };
        let api = ApiClient::from_config(&config).unwrap();
        assert_eq!(api.base_url(), "http://localhost:8080/api");
    }

    #[test]
    fn test_create_body_is_stamped() {
        let input = CreateObservation::new("Renard roux", 45.5, -73.6);
        let body = create_body(&input, 1_000).unwrap();

        assert_eq!(body["species"], "Renard roux");
        assert_eq!(body["createdAt"], 1_000);
        assert_eq!(body["updatedAt"], 1_000);
        assert_eq!(body["timestamp"], 1_000.0);
    }

    #[test]
    fn test_update_body_only_has_changes() {
        let body = update_body(&UpdateObservation::species("Renard argenté"), 2_000).unwrap();
        let object = body.as_object().unwrap();

        assert_eq!(object.len(), 2);
        assert_eq!(body["species"], "Renard argenté");
        assert_eq!(body["updatedAt"], 2_000);
    }

    #[tokio::test]
    async fn test_validation_happens_before_request() {
        let api = client("http://127.0.0.1:1");
        let err = api
            .create(CreateObservation::new(" ", 0.0, 0.0))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        let api = client("http://127.0.0.1:1");
        assert_eq!(api.name(), "remote");
        let err = api.list().await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
