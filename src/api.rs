//! HTTP surface.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::checkout::CheckoutView;
use crate::domain::aggregates::{CartItem, Coupon, CreatedOrder, LineKey, PaymentMethod, Region, ShippingAddressInput, Variant};
use crate::domain::value_objects::{AddressCode, AddressLevel, Money};
use crate::session::SessionView;
use crate::storefront::{CouponOffer, ReviewView, Storefront};
use crate::{ErrorKind, StorefrontError};

pub fn router(storefront: Storefront) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-checkout"})) }))
        .route("/api/v1/coupons", get(list_coupons))
        .route("/api/v1/sessions", post(open_session))
        .route("/api/v1/sessions/:session/cart", get(get_cart).delete(clear_cart))
        .route("/api/v1/sessions/:session/cart/items", post(add_item))
        .route("/api/v1/sessions/:session/cart/items/:product_id", put(update_item).delete(remove_item))
        .route("/api/v1/sessions/:session/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/api/v1/sessions/:session/coupon/auto", post(auto_apply))
        .route("/api/v1/sessions/:session/coupons", get(coupon_offers))
        .route("/api/v1/sessions/:session/checkout", get(get_checkout).delete(abandon_checkout))
        .route("/api/v1/sessions/:session/checkout/address", post(checkout_address))
        .route("/api/v1/sessions/:session/checkout/payment", post(checkout_payment))
        .route("/api/v1/sessions/:session/checkout/review", post(checkout_review))
        .route("/api/v1/sessions/:session/checkout/back", post(checkout_back))
        .route("/api/v1/sessions/:session/checkout/submit", post(submit_order))
        .route("/api/v1/addresses/provinces", get(provinces))
        .route("/api/v1/addresses/provinces/:code/districts", get(districts))
        .route("/api/v1/addresses/districts/:code/wards", get(wards))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(storefront)
}

/// Error response: the crate error mapped onto an HTTP status.
pub struct ApiError(StorefrontError);

impl From<StorefrontError> for ApiError {
    fn from(e: StorefrontError) -> Self { Self(e) }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.0.kind() {
            ErrorKind::Validation => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            ErrorKind::Network => (StatusCode::BAD_GATEWAY, "network"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string(), kind })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub name: String,
    pub price: Money,
    #[serde(default)]
    pub sale_price: Option<Money>,
    pub quantity: u32,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub stock: Option<u32>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl From<AddItemRequest> for CartItem {
    fn from(r: AddItemRequest) -> Self {
        Self {
            product_id: r.product_id, name: r.name, unit_price: r.price, sale_price: r.sale_price,
            quantity: r.quantity, variant: Variant::new(r.size, r.color), stock: r.stock,
            category_id: r.category_id, image: r.image,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VariantQuery {
    pub size: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuantityRequest { pub quantity: u32 }

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest { pub code: String }

#[derive(Debug, Deserialize)]
pub struct PaymentRequest { pub payment_method: PaymentMethod }

async fn list_coupons(State(s): State<Storefront>) -> Json<Vec<Coupon>> {
    Json(s.displayable_coupons())
}

async fn open_session(State(s): State<Storefront>) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    Ok((StatusCode::CREATED, Json(s.open_session().await?)))
}

async fn get_cart(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<SessionView> {
    Ok(Json(s.cart(&session).await?))
}

async fn clear_cart(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<SessionView> {
    Ok(Json(s.clear_cart(&session).await?))
}

async fn add_item(State(s): State<Storefront>, Path(session): Path<String>, Json(r): Json<AddItemRequest>) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    Ok((StatusCode::CREATED, Json(s.add_item(&session, r.into()).await?)))
}

async fn update_item(
    State(s): State<Storefront>,
    Path((session, product_id)): Path<(String, String)>,
    Query(v): Query<VariantQuery>,
    Json(r): Json<QuantityRequest>,
) -> ApiResult<SessionView> {
    let key = LineKey::new(product_id, v.size, v.color);
    Ok(Json(s.update_quantity(&session, &key, r.quantity).await?))
}

async fn remove_item(
    State(s): State<Storefront>,
    Path((session, product_id)): Path<(String, String)>,
    Query(v): Query<VariantQuery>,
) -> ApiResult<SessionView> {
    let key = LineKey::new(product_id, v.size, v.color);
    Ok(Json(s.remove_item(&session, &key).await?))
}

async fn apply_coupon(State(s): State<Storefront>, Path(session): Path<String>, Json(r): Json<ApplyCouponRequest>) -> ApiResult<SessionView> {
    Ok(Json(s.apply_coupon(&session, &r.code).await?))
}

async fn remove_coupon(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<SessionView> {
    Ok(Json(s.remove_coupon(&session).await?))
}

async fn auto_apply(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<SessionView> {
    Ok(Json(s.auto_apply_remote(&session).await?))
}

async fn coupon_offers(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<Vec<CouponOffer>> {
    Ok(Json(s.coupon_offers(&session).await?))
}

async fn get_checkout(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<CheckoutView> {
    Ok(Json(s.checkout(&session).await?))
}

async fn abandon_checkout(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<CheckoutView> {
    Ok(Json(s.checkout_abandon(&session).await?))
}

async fn checkout_address(State(s): State<Storefront>, Path(session): Path<String>, Json(r): Json<ShippingAddressInput>) -> ApiResult<CheckoutView> {
    Ok(Json(s.checkout_address(&session, &r).await?))
}

async fn checkout_payment(State(s): State<Storefront>, Path(session): Path<String>, Json(r): Json<PaymentRequest>) -> ApiResult<CheckoutView> {
    Ok(Json(s.checkout_payment(&session, r.payment_method).await?))
}

async fn checkout_review(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<ReviewView> {
    Ok(Json(s.checkout_review(&session).await?))
}

async fn checkout_back(State(s): State<Storefront>, Path(session): Path<String>) -> ApiResult<CheckoutView> {
    Ok(Json(s.checkout_back(&session).await?))
}

async fn submit_order(State(s): State<Storefront>, Path(session): Path<String>) -> Result<(StatusCode, Json<CreatedOrder>), ApiError> {
    Ok((StatusCode::CREATED, Json(s.submit_order(&session).await?)))
}

async fn provinces(State(s): State<Storefront>) -> Json<Vec<Region>> {
    Json(s.addresses().provinces().await)
}

async fn districts(State(s): State<Storefront>, Path(code): Path<String>) -> Json<Vec<Region>> {
    Json(s.addresses().districts(&AddressCode::normalize(AddressLevel::Province, &code)).await)
}

async fn wards(State(s): State<Storefront>, Path(code): Path<String>) -> Json<Vec<Region>> {
    Json(s.addresses().wards(&AddressCode::normalize(AddressLevel::District, &code)).await)
}
