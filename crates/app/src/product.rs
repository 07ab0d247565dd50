use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{error, info};

use fulfil_core::types::Product;
use fulfil_storage::{NewProduct, ProductError};

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Payload accepted by the create and update endpoints.
///
/// Every field is optional so that shape errors surface as domain messages
/// instead of deserialization failures.
#[derive(Debug, Deserialize)]
pub struct ProductPayload {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Product>>, ProblemResponse> {
    let products = state
        .storage()
        .products()
        .list()
        .await
        .map_err(storage_failure)?;
    Ok(Json(products))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, ProblemResponse> {
    let product = state
        .storage()
        .products()
        .find(id)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(product))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<ProductPayload>,
) -> Result<(StatusCode, Json<Product>), ProblemResponse> {
    if payload.id.is_some() {
        return Err(ProblemResponse::unprocessable("Id was invalidly set"));
    }
    let name = require_name(payload.name.as_deref())?;

    let product = state
        .storage()
        .products()
        .insert(NewProduct {
            name,
            description: payload.description.as_deref(),
            price: payload.price,
            stock: payload.stock,
        })
        .await
        .map_err(storage_failure)?;

    info!(stage = "product", id = product.id, name = %product.name, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ProductPayload>,
) -> Result<Json<Product>, ProblemResponse> {
    let name = require_name(payload.name.as_deref())?;

    let product = state
        .storage()
        .products()
        .update(
            id,
            NewProduct {
                name,
                description: payload.description.as_deref(),
                price: payload.price,
                stock: payload.stock,
            },
        )
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| not_found(id))?;

    Ok(Json(product))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    let removed = state
        .storage()
        .products()
        .delete(id)
        .await
        .map_err(storage_failure)?;

    if !removed {
        return Err(not_found(id));
    }

    counter!("db_rows_deleted_total", "table" => "product").increment(1);
    info!(stage = "product", id, "product deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn require_name(name: Option<&str>) -> Result<&str, ProblemResponse> {
    name.ok_or_else(|| ProblemResponse::unprocessable("Product Name was not set"))
}

fn not_found(id: i64) -> ProblemResponse {
    ProblemResponse::not_found(format!("product with id {id} does not exist"))
}

fn storage_failure(err: ProductError) -> ProblemResponse {
    error!(stage = "product", error = %err, "storage failure");
    ProblemResponse::internal("storage failure")
}
