//! reqwest-backed clients for the storefront API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::{CartItem, Coupon, CreatedOrder, OrderSubmission, Region};
use crate::domain::value_objects::{AddressCode, AddressLevel, CouponCode, Money};
use crate::pricing::Ineligibility;
use crate::services::{AddressService, CartLinePayload, CouponService, OrderService, RemoteAutoApply, RemoteCouponVerdict};
use crate::{Result, StorefrontError};

/// HTTP client for one storefront API base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorefrontError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url: base_url.into(), token: None })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn base_url(&self) -> &str { &self.base_url }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let request = self.authorize(self.client.get(self.url(path)).query(query));
        Self::handle_response(request.send().await?).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, query: &[(&str, String)], body: &B) -> Result<T> {
        let request = self.authorize(self.client.post(self.url(path)).query(query).json(body));
        Self::handle_response(request.send().await?).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| StorefrontError::Upstream {
                status: status.as_u16(),
                message: format!("malformed response body: {e}"),
            });
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify(status, error_detail(&text)))
    }
}

fn classify(status: StatusCode, message: String) -> StorefrontError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => StorefrontError::Validation(message),
        StatusCode::NOT_FOUND => StorefrontError::NotFound(message),
        StatusCode::CONFLICT => StorefrontError::Conflict(message),
        _ => StorefrontError::Upstream { status: status.as_u16(), message },
    }
}

/// A 400 from the Order service means stock ran out or the coupon lapsed
/// after the cart was priced.
fn order_rejection(err: StorefrontError) -> StorefrontError {
    match err {
        StorefrontError::Validation(message) => StorefrontError::Conflict(message),
        other => other,
    }
}

/// Pulls the `detail` field out of an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: serde_json::Value,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { detail: serde_json::Value::String(s) }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Area codes arrive as JSON strings or bare numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCode {
    Num(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawRegion {
    code: RawCode,
    name: String,
}

impl RawRegion {
    fn into_region(self, level: AddressLevel) -> Region {
        let code = match self.code {
            RawCode::Num(n) => AddressCode::numeric(level, n),
            RawCode::Text(s) => AddressCode::normalize(level, &s),
        };
        Region { code, name: self.name }
    }
}

fn regions(raw: Vec<RawRegion>, level: AddressLevel) -> Vec<Region> {
    raw.into_iter().map(|r| r.into_region(level)).collect()
}

fn cart_lines(items: &[CartItem]) -> Vec<CartLinePayload> {
    items.iter().map(CartLinePayload::from).collect()
}

#[async_trait]
impl CouponService for ApiClient {
    #[tracing::instrument(skip(self))]
    async fn active_coupons(&self) -> Result<Vec<Coupon>> {
        self.get("/coupons/active", &[]).await
    }

    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    async fn validate_code(&self, code: &CouponCode, order_total: Money, items: &[CartItem]) -> Result<RemoteCouponVerdict> {
        #[derive(Serialize)]
        struct ValidateBody {
            cart_items: Vec<CartLinePayload>,
        }

        let query = [("code", code.to_string()), ("order_total", order_total.amount().to_string())];
        let body = ValidateBody { cart_items: cart_lines(items) };
        match self.post("/coupons/validate", &query, &body).await {
            Err(StorefrontError::Validation(message) | StorefrontError::NotFound(message)) => {
                Err(StorefrontError::CouponIneligible { code: code.clone(), reason: Ineligibility::Rejected { message } })
            }
            other => other,
        }
    }

    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    async fn auto_apply(&self, order_total: Money, items: &[CartItem]) -> Result<Option<RemoteAutoApply>> {
        let cart_items = serde_json::to_string(&cart_lines(items))?;
        let query = [("order_total", order_total.amount().to_string()), ("cart_items", cart_items)];
        self.get("/coupons/auto-apply", &query).await
    }
}

#[async_trait]
impl AddressService for ApiClient {
    async fn provinces(&self) -> Result<Vec<Region>> {
        let raw: Vec<RawRegion> = self.get("/provinces", &[]).await?;
        Ok(regions(raw, AddressLevel::Province))
    }

    async fn districts(&self, province: &AddressCode) -> Result<Vec<Region>> {
        let raw: Vec<RawRegion> = self.get(&format!("/provinces/{province}/districts"), &[]).await?;
        Ok(regions(raw, AddressLevel::District))
    }

    async fn wards(&self, district: &AddressCode) -> Result<Vec<Region>> {
        let raw: Vec<RawRegion> = self.get(&format!("/districts/{district}/wards"), &[]).await?;
        Ok(regions(raw, AddressLevel::Ward))
    }
}

#[async_trait]
impl OrderService for ApiClient {
    #[tracing::instrument(skip_all, fields(total = %submission.total))]
    async fn create_order(&self, submission: &OrderSubmission) -> Result<CreatedOrder> {
        self.post("/orders", &[], submission).await.map_err(order_rejection)
    }
}
