use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Backend REST surface the domain services talk to. Trait-shaped so tests
/// can substitute a scripted fake for the wire.
#[async_trait]
pub trait RentalApi: Send + Sync {
    async fn fetch_vehicles(&self, filter: &[(&str, &str)]) -> Result<Value>;
    async fn create_vehicle(&self, vehicle: &Value) -> Result<Value>;
    async fn update_vehicle(&self, vehicle_id: &str, update_data: &Value) -> Result<Value>;
    async fn delete_vehicle(&self, vehicle_id: &str) -> Result<()>;
    async fn fetch_profile(&self) -> Result<Value>;
    async fn update_profile(&self, profile_data: &Value) -> Result<Value>;
    async fn upload_document(&self, doc_type: &str, document: &Value) -> Result<Value>;
}

/// Rental backend client over HTTP.
#[derive(Clone)]
pub struct HttpRentalApi {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpRentalApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRentalApi")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpRentalApi {
    /// `base_url` must end with a slash so relative endpoint paths join
    /// under it instead of replacing the last segment.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid api.base_url")?;
        let http = Client::builder()
            .user_agent("rentsync/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path {path}"))
    }

    async fn read_json(res: reqwest::Response) -> Result<Value> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("backend error {status}: {body}"));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        res.json().await.context("invalid JSON in backend response")
    }

    async fn check_status(res: reqwest::Response) -> Result<()> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("backend error {status}: {body}"));
        }
        Ok(())
    }
}

#[async_trait]
impl RentalApi for HttpRentalApi {
    async fn fetch_vehicles(&self, filter: &[(&str, &str)]) -> Result<Value> {
        let mut url = self.endpoint("vehicles")?;
        for (key, value) in filter {
            url.query_pairs_mut().append_pair(key, value);
        }
        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to reach backend")?;
        Self::read_json(res).await
    }

    async fn create_vehicle(&self, vehicle: &Value) -> Result<Value> {
        let res = self
            .http
            .post(self.endpoint("vehicles")?)
            .json(vehicle)
            .send()
            .await
            .context("failed to reach backend")?;
        Self::read_json(res).await
    }

    async fn update_vehicle(&self, vehicle_id: &str, update_data: &Value) -> Result<Value> {
        let res = self
            .http
            .patch(self.endpoint(&format!("vehicles/{vehicle_id}"))?)
            .json(update_data)
            .send()
            .await
            .context("failed to reach backend")?;
        Self::read_json(res).await
    }

    async fn delete_vehicle(&self, vehicle_id: &str) -> Result<()> {
        let res = self
            .http
            .delete(self.endpoint(&format!("vehicles/{vehicle_id}"))?)
            .send()
            .await
            .context("failed to reach backend")?;
        Self::check_status(res).await
    }

    async fn fetch_profile(&self) -> Result<Value> {
        let res = self
            .http
            .get(self.endpoint("profile")?)
            .send()
            .await
            .context("failed to reach backend")?;
        Self::read_json(res).await
    }

    async fn update_profile(&self, profile_data: &Value) -> Result<Value> {
        let res = self
            .http
            .put(self.endpoint("profile")?)
            .json(profile_data)
            .send()
            .await
            .context("failed to reach backend")?;
        Self::read_json(res).await
    }

    async fn upload_document(&self, doc_type: &str, document: &Value) -> Result<Value> {
        let body = json!({ "docType": doc_type, "document": document });
        let res = self
            .http
            .post(self.endpoint("profile/documents")?)
            .json(&body)
            .send()
            .await
            .context("failed to reach backend")?;
        Self::read_json(res).await
    }
}
