use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{error, info, warn};

use fulfil_core::rules;
use fulfil_core::types::Warehouse;
use fulfil_storage::{NewWarehouse, WarehouseError};

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Payload accepted when creating a warehouse.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehousePayload {
    pub business_unit_code: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<i64>,
    pub stock: Option<i64>,
}

/// Payload accepted when replacing a warehouse. Absent capacity and stock
/// values are written through verbatim; an absent location keeps the
/// stored one.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementPayload {
    pub location: Option<String>,
    pub capacity: Option<i64>,
    pub stock: Option<i64>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Warehouse>>, ProblemResponse> {
    let warehouses = state
        .storage()
        .warehouses()
        .list()
        .await
        .map_err(storage_failure)?;
    Ok(Json(warehouses))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Warehouse>, ProblemResponse> {
    let warehouse = state
        .storage()
        .warehouses()
        .find(&code)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| not_found(&code))?;
    Ok(Json(warehouse))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<WarehousePayload>,
) -> Result<(StatusCode, Json<Warehouse>), ProblemResponse> {
    let code = payload
        .business_unit_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or_else(|| {
            ProblemResponse::bad_request("business unit code must not be null or empty")
        })?;
    let location_input = payload
        .location
        .as_deref()
        .ok_or_else(|| ProblemResponse::bad_request("location is required"))?;
    let capacity = payload
        .capacity
        .ok_or_else(|| ProblemResponse::bad_request("capacity is required"))?;
    let stock = payload
        .stock
        .ok_or_else(|| ProblemResponse::bad_request("stock is required"))?;

    let repo = state.storage().warehouses();
    if repo.find(code).await.map_err(storage_failure)?.is_some() {
        return Err(ProblemResponse::conflict(format!(
            "warehouse with business unit code {code} already exists"
        )));
    }

    let location = state
        .locations()
        .resolve(location_input)
        .map_err(|err| ProblemResponse::unprocessable(err.to_string()))?;

    let hosted = repo
        .count_at_location(&location.identification)
        .await
        .map_err(storage_failure)?;
    rules::validate_creation(capacity, stock, location, hosted).map_err(|violation| {
        counter!("constraint_rejections_total", "rule" => violation.rule()).increment(1);
        warn!(stage = "warehouse", code, rule = violation.rule(), "warehouse creation rejected");
        ProblemResponse::unprocessable(violation.to_string())
    })?;

    let warehouse = repo
        .insert(NewWarehouse {
            business_unit_code: code,
            location: &location.identification,
            capacity,
            stock,
            created_at: state.now(),
        })
        .await
        .map_err(|err| match err {
            WarehouseError::DuplicateCode => ProblemResponse::conflict(format!(
                "warehouse with business unit code {code} already exists"
            )),
            other => storage_failure(other),
        })?;

    counter!("warehouses_created_total").increment(1);
    info!(
        stage = "warehouse",
        code = %warehouse.business_unit_code,
        location = %warehouse.location,
        "warehouse created"
    );
    Ok((StatusCode::CREATED, Json(warehouse)))
}

pub async fn replace(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<ReplacementPayload>,
) -> Result<Json<Warehouse>, ProblemResponse> {
    let repo = state.storage().warehouses();
    let existing = repo
        .find(&code)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| not_found(&code))?;

    rules::validate_replacement(existing.stock, payload.stock, payload.capacity).map_err(
        |violation| {
            counter!("constraint_rejections_total", "rule" => violation.rule()).increment(1);
            warn!(stage = "warehouse", code = %code, rule = violation.rule(), "replacement rejected");
            ProblemResponse::unprocessable(violation.to_string())
        },
    )?;

    let replaced = repo
        .replace(
            &code,
            payload.location.as_deref(),
            payload.capacity,
            payload.stock,
        )
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| not_found(&code))?;

    counter!("warehouses_replaced_total").increment(1);
    info!(stage = "warehouse", code = %code, "warehouse replaced");
    Ok(Json(replaced))
}

/// Archiving a warehouse removes its row; the `archivedAt` column exists
/// but this path never populates it.
pub async fn archive(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    let removed = state
        .storage()
        .warehouses()
        .delete(&code)
        .await
        .map_err(storage_failure)?;

    if !removed {
        return Err(not_found(&code));
    }

    counter!("db_rows_deleted_total", "table" => "warehouse").increment(1);
    info!(stage = "warehouse", code = %code, "warehouse archived");
    Ok(StatusCode::NO_CONTENT)
}

fn not_found(code: &str) -> ProblemResponse {
    ProblemResponse::not_found(format!(
        "warehouse with business unit code {code} does not exist"
    ))
}

fn storage_failure(err: WarehouseError) -> ProblemResponse {
    error!(stage = "warehouse", error = %err, "storage failure");
    ProblemResponse::internal("storage failure")
}
