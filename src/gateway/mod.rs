use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Marketplace;
use crate::gateway::model::{
    flatten_categories, BatchStatusResp, BrandsResp, CategoriesResp, CategoryAttributesResp,
    CreateProductsResp,
};
use crate::model::{BatchReport, Brand, Category, CategoryAttribute, SubmissionPayload};

pub mod model;

const BRAND_PAGE_SIZE: usize = 1000;
const MAX_BRAND_PAGES: usize = 50;
const MAX_LOGGED_BODY: usize = 300;

/// Failure talking to the marketplace. Never fatal to a sync cycle: the
/// caller turns it into record state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Operations the sync engine needs from the marketplace.
#[async_trait]
pub trait MarketplaceGateway: Send + Sync {
    /// Submit a chunk; returns the opaque batch handle to poll later.
    async fn create_or_update_products(
        &self,
        items: &[SubmissionPayload],
    ) -> Result<String, GatewayError>;

    async fn get_batch_status(&self, handle: &str) -> Result<BatchReport, GatewayError>;

    async fn list_categories(&self) -> Result<Vec<Category>, GatewayError>;

    async fn list_brands(&self) -> Result<Vec<Brand>, GatewayError>;

    async fn get_category_attributes(
        &self,
        category_id: i64,
    ) -> Result<Vec<CategoryAttribute>, GatewayError>;
}

/// Bound a gateway call regardless of the implementation's own timeouts.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(res) => res,
        Err(_) => Err(GatewayError::Timeout(format!(
            "no response within {}ms",
            limit.as_millis()
        ))),
    }
}

/// HTTP client for the seller product integration API.
#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
    supplier_id: String,
    api_key: String,
    api_secret: String,
}

impl fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("supplier_id", &self.supplier_id)
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    pub fn from_config(cfg: &Marketplace, timeout: Duration) -> Result<Self, GatewayError> {
        let mut raw = cfg.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)
            .map_err(|e| GatewayError::Transport(format!("invalid base url {raw}: {e}")))?;
        Self::with_base_url(
            base_url,
            cfg.supplier_id.clone(),
            cfg.api_key.clone(),
            cfg.api_secret.clone(),
            timeout,
        )
    }

    pub fn with_base_url(
        base_url: Url,
        supplier_id: String,
        api_key: String,
        api_secret: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .user_agent(format!("{supplier_id} - SelfIntegration"))
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            supplier_id,
            api_key,
            api_secret,
        })
    }

    fn products_path(&self) -> String {
        format!("integration/product/sellers/{}/products", self.supplier_id)
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, GatewayError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| GatewayError::Transport(format!("invalid endpoint {path}: {e}")))?;
        let mut builder = self
            .http
            .request(method, url)
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build request: {e}")))
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T, GatewayError> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "marketplace request");

        let res = self.http.execute(request).await.map_err(classify)?;
        let status = res.status();
        let body = res.text().await.map_err(classify)?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(%method, %url, %status, "marketplace rejected credentials");
            return Err(GatewayError::AuthFailure(format!(
                "{}: {}",
                status,
                clip(&body)
            )));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(%method, %url, "rate limited by marketplace");
            return Err(GatewayError::RateLimited(clip(&body)));
        }
        if !status.is_success() {
            warn!(%method, %url, %status, body = %clip(&body), "marketplace error");
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: clip(&body),
            });
        }

        debug!(%status, body = %clip(&body), "marketplace response");
        serde_json::from_str(&body)
            .map_err(|e| GatewayError::Malformed(format!("{e}: {}", clip(&body))))
    }
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else {
        GatewayError::Transport(err.to_string())
    }
}

fn clip(body: &str) -> String {
    body.chars().take(MAX_LOGGED_BODY).collect()
}

#[async_trait]
impl MarketplaceGateway for HttpGateway {
    async fn create_or_update_products(
        &self,
        items: &[SubmissionPayload],
    ) -> Result<String, GatewayError> {
        let items = serde_json::to_value(items)
            .map_err(|e| GatewayError::Malformed(format!("unserializable payload: {e}")))?;
        let body = json!({ "items": items });
        let request = self.build_request(Method::POST, &self.products_path(), Some(&body))?;
        let resp: CreateProductsResp = self.execute(request).await?;
        match resp.batch_request_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                info!(batch_request_id = %id, "marketplace accepted products");
                Ok(id)
            }
            None => Err(GatewayError::Malformed(
                "response carried no batchRequestId".into(),
            )),
        }
    }

    async fn get_batch_status(&self, handle: &str) -> Result<BatchReport, GatewayError> {
        let path = format!("{}/batch-requests/{}", self.products_path(), handle);
        let request = self.build_request(Method::GET, &path, None)?;
        let resp: BatchStatusResp = self.execute(request).await?;
        Ok(resp.into_report())
    }

    async fn list_categories(&self) -> Result<Vec<Category>, GatewayError> {
        let request =
            self.build_request(Method::GET, "integration/product/product-categories", None)?;
        let resp: CategoriesResp = self.execute(request).await?;
        let mut out = Vec::new();
        flatten_categories(&resp.categories, None, &mut out);
        Ok(out)
    }

    async fn list_brands(&self) -> Result<Vec<Brand>, GatewayError> {
        let mut brands = Vec::new();
        for page in 0..MAX_BRAND_PAGES {
            let path = format!("integration/product/brands?page={page}&size={BRAND_PAGE_SIZE}");
            let request = self.build_request(Method::GET, &path, None)?;
            let resp: BrandsResp = self.execute(request).await?;
            let fetched = resp.brands.len();
            brands.extend(resp.brands.into_iter().map(Brand::from));
            if fetched < BRAND_PAGE_SIZE {
                break;
            }
        }
        Ok(brands)
    }

    async fn get_category_attributes(
        &self,
        category_id: i64,
    ) -> Result<Vec<CategoryAttribute>, GatewayError> {
        let path = format!("integration/product/product-categories/{category_id}/attributes");
        let request = self.build_request(Method::GET, &path, None)?;
        let resp: CategoryAttributesResp = self.execute(request).await?;
        Ok(resp
            .category_attributes
            .into_iter()
            .map(CategoryAttribute::from)
            .collect())
    }
}
