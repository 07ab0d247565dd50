use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{error, info};

use fulfil_core::types::Store;
use fulfil_storage::{NewStore, StoreError};

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Payload accepted by the create, update, and patch endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePayload {
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(default)]
    pub quantity_products_in_stock: i64,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Store>>, ProblemResponse> {
    let stores = state
        .storage()
        .stores()
        .list()
        .await
        .map_err(storage_failure)?;
    Ok(Json(stores))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Store>, ProblemResponse> {
    let store = state
        .storage()
        .stores()
        .find(id)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(store))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<StorePayload>,
) -> Result<(StatusCode, Json<Store>), ProblemResponse> {
    if payload.id.is_some() {
        return Err(ProblemResponse::unprocessable("Id was invalidly set"));
    }
    let name = require_name(payload.name.as_deref())?;

    let store = state
        .storage()
        .stores()
        .insert(NewStore {
            name,
            quantity_products_in_stock: payload.quantity_products_in_stock,
        })
        .await
        .map_err(|err| duplicate_or_failure(err, name))?;

    info!(stage = "store", id = store.id, name = %store.name, "store created");
    Ok((StatusCode::CREATED, Json(store)))
}

/// Shared by PUT and PATCH; both overwrite the mutable fields.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<StorePayload>,
) -> Result<Json<Store>, ProblemResponse> {
    let name = require_name(payload.name.as_deref())?;

    let store = state
        .storage()
        .stores()
        .update(
            id,
            NewStore {
                name,
                quantity_products_in_stock: payload.quantity_products_in_stock,
            },
        )
        .await
        .map_err(|err| duplicate_or_failure(err, name))?
        .ok_or_else(|| not_found(id))?;

    Ok(Json(store))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    let removed = state
        .storage()
        .stores()
        .delete(id)
        .await
        .map_err(storage_failure)?;

    if !removed {
        return Err(not_found(id));
    }

    counter!("db_rows_deleted_total", "table" => "store").increment(1);
    info!(stage = "store", id, "store deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn require_name(name: Option<&str>) -> Result<&str, ProblemResponse> {
    name.ok_or_else(|| ProblemResponse::unprocessable("Store Name was not set"))
}

fn not_found(id: i64) -> ProblemResponse {
    ProblemResponse::not_found(format!("store with id {id} does not exist"))
}

fn duplicate_or_failure(err: StoreError, name: &str) -> ProblemResponse {
    match err {
        StoreError::DuplicateName => {
            ProblemResponse::conflict(format!("a store named {name} already exists"))
        }
        other => storage_failure(other),
    }
}

fn storage_failure(err: StoreError) -> ProblemResponse {
    error!(stage = "store", error = %err, "storage failure");
    ProblemResponse::internal("storage failure")
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::router::{app_router, test_support};

    #[tokio::test]
    async fn crud_round_trip() {
        let app = app_router(test_support::setup_state().await);

        let (status, created) = test_support::send(
            &app,
            "POST",
            "/store",
            Some(json!({ "name": "PuneStore", "quantityProductsInStock": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "PuneStore");
        assert_eq!(created["quantityProductsInStock"], 10);
        let id = created["id"].as_i64().expect("id assigned");

        let (status, fetched) = test_support::send(&app, "GET", &format!("/store/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, updated) = test_support::send(
            &app,
            "PUT",
            &format!("/store/{id}"),
            Some(json!({ "name": "UpdatedStore", "quantityProductsInStock": 20 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "UpdatedStore");
        assert_eq!(updated["quantityProductsInStock"], 20);

        let (status, patched) = test_support::send(
            &app,
            "PATCH",
            &format!("/store/{id}"),
            Some(json!({ "name": "PatchedName", "quantityProductsInStock": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["name"], "PatchedName");
        assert_eq!(patched["quantityProductsInStock"], 0);

        let (status, _) = test_support::send(&app, "DELETE", &format!("/store/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = test_support::send(&app, "GET", &format!("/store/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_rejects_preset_id_and_missing_name() {
        let app = app_router(test_support::setup_state().await);

        let (status, body) = test_support::send(
            &app,
            "POST",
            "/store",
            Some(json!({ "id": 999, "name": "InvalidStore", "quantityProductsInStock": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("Id was invalidly set"));

        let (status, body) = test_support::send(
            &app,
            "POST",
            "/store",
            Some(json!({ "quantityProductsInStock": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("Store Name was not set"));
    }

    #[tokio::test]
    async fn duplicate_store_name_conflicts() {
        let app = app_router(test_support::setup_state().await);

        let (status, _) = test_support::send(
            &app,
            "POST",
            "/store",
            Some(json!({ "name": "Duplicate", "quantityProductsInStock": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = test_support::send(
            &app,
            "POST",
            "/store",
            Some(json!({ "name": "Duplicate", "quantityProductsInStock": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("already exists"));
    }

    #[tokio::test]
    async fn update_and_patch_require_name_and_existing_store() {
        let app = app_router(test_support::setup_state().await);

        let (status, created) = test_support::send(
            &app,
            "POST",
            "/store",
            Some(json!({ "name": "ValidStore", "quantityProductsInStock": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().expect("id assigned");

        for method in ["PUT", "PATCH"] {
            let (status, body) = test_support::send(
                &app,
                method,
                &format!("/store/{id}"),
                Some(json!({ "name": null, "quantityProductsInStock": 20 })),
            )
            .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert!(body["detail"]
                .as_str()
                .expect("detail")
                .contains("Store Name was not set"));

            let (status, body) = test_support::send(
                &app,
                method,
                "/store/999999",
                Some(json!({ "name": "UpdatedName", "quantityProductsInStock": 10 })),
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body["detail"]
                .as_str()
                .expect("detail")
                .contains("does not exist"));
        }
    }

    #[tokio::test]
    async fn delete_missing_store_is_not_found() {
        let app = app_router(test_support::setup_state().await);

        let (status, _) = test_support::send(&app, "DELETE", "/store/999999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
