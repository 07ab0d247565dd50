use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{error, info, warn};

use fulfil_core::rules::{self, AssociationCounts};
use fulfil_core::types::{
    FulfillmentAnalytics, FulfillmentAssociation, FulfillmentConstraints, Product, Store,
};
use fulfil_storage::{FulfillmentError, NewAssociation};

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Payload accepted when declaring a fulfillment association.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationPayload {
    pub product_id: Option<i64>,
    pub warehouse_business_unit_code: Option<String>,
    pub store_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairQuery {
    pub product_id: Option<i64>,
    pub store_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub product_id: Option<i64>,
    pub store_id: Option<i64>,
}

/// Creates an association after running the duplicate check and the three
/// counting constraints against the pre-insertion state. The checks and
/// the insert share one transaction; concurrent requests can still race
/// each other past the limits before either commits.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<AssociationPayload>,
) -> Result<(StatusCode, Json<FulfillmentAssociation>), ProblemResponse> {
    let product_id = payload
        .product_id
        .filter(|id| *id > 0)
        .ok_or_else(|| ProblemResponse::bad_request("invalid product id"))?;
    let code = payload
        .warehouse_business_unit_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or_else(|| {
            ProblemResponse::bad_request("warehouse business unit code must not be null or empty")
        })?;
    let store_id = payload
        .store_id
        .filter(|id| *id > 0)
        .ok_or_else(|| ProblemResponse::bad_request("invalid store id"))?;

    let product = find_product(&state, product_id).await?;
    let store = find_store(&state, store_id).await?;

    let repo = state.storage().fulfillments();
    let mut tx = repo.begin().await.map_err(transaction_failure)?;

    let exists = repo
        .exists(&mut tx, product.id, code, store.id)
        .await
        .map_err(storage_failure)?;
    if exists {
        counter!("association_duplicates_total").increment(1);
        return Err(ProblemResponse::conflict(format!(
            "association already exists for product {} in warehouse {code} for store {}",
            product.name, store.name
        )));
    }

    let counts = AssociationCounts {
        warehouses_for_product_in_store: repo
            .count_warehouses_for_product_in_store(&mut tx, product.id, store.id)
            .await
            .map_err(storage_failure)?,
        warehouses_for_store: repo
            .count_warehouses_for_store(&mut tx, store.id)
            .await
            .map_err(storage_failure)?,
        product_types_in_warehouse: repo
            .count_product_types_in_warehouse(&mut tx, code)
            .await
            .map_err(storage_failure)?,
    };
    rules::check_association(counts).map_err(|violation| {
        counter!("constraint_rejections_total", "rule" => violation.rule()).increment(1);
        warn!(
            stage = "fulfillment",
            product_id = product.id,
            store_id = store.id,
            warehouse = code,
            rule = violation.rule(),
            "association rejected"
        );
        ProblemResponse::unprocessable(violation.to_string())
    })?;

    let association = repo
        .insert(
            &mut tx,
            NewAssociation {
                product_id: product.id,
                warehouse_business_unit_code: code,
                store_id: store.id,
                created_at: state.now(),
            },
        )
        .await
        .map_err(|err| match err {
            FulfillmentError::DuplicateAssociation => {
                counter!("association_duplicates_total").increment(1);
                ProblemResponse::conflict("association already exists")
            }
            FulfillmentError::MissingReference => {
                ProblemResponse::not_found("product or store no longer exists")
            }
            other => storage_failure(other),
        })?;
    tx.commit().await.map_err(transaction_failure)?;

    counter!("associations_created_total").increment(1);
    info!(
        stage = "fulfillment",
        id = association.id,
        product_id = association.product_id,
        store_id = association.store_id,
        warehouse = %association.warehouse_business_unit_code,
        "association created"
    );
    Ok((StatusCode::CREATED, Json(association)))
}

pub async fn list_for_product_in_store(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> Result<Json<Vec<FulfillmentAssociation>>, ProblemResponse> {
    let (Some(product_id), Some(store_id)) = (query.product_id, query.store_id) else {
        return Err(ProblemResponse::bad_request(
            "both productId and storeId query parameters are required",
        ));
    };

    let product = find_product(&state, product_id).await?;
    let store = find_store(&state, store_id).await?;

    let associations = state
        .storage()
        .fulfillments()
        .list_by_product_and_store(product.id, store.id)
        .await
        .map_err(storage_failure)?;
    Ok(Json(associations))
}

pub async fn list_for_store(
    State(state): State<AppState>,
    Path(store_id): Path<i64>,
) -> Result<Json<Vec<FulfillmentAssociation>>, ProblemResponse> {
    let store = find_store(&state, store_id).await?;

    let associations = state
        .storage()
        .fulfillments()
        .list_by_store(store.id)
        .await
        .map_err(storage_failure)?;
    Ok(Json(associations))
}

pub async fn list_for_warehouse(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Vec<FulfillmentAssociation>>, ProblemResponse> {
    let associations = state
        .storage()
        .fulfillments()
        .list_by_warehouse(&code)
        .await
        .map_err(storage_failure)?;
    Ok(Json(associations))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    let repo = state.storage().fulfillments();
    let removed = repo.delete(id).await.map_err(storage_failure)?;

    if !removed {
        return Err(ProblemResponse::not_found(format!(
            "association with id {id} does not exist"
        )));
    }

    counter!("db_rows_deleted_total", "table" => "fulfillment_association").increment(1);
    info!(stage = "fulfillment", id, "association deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn constraints() -> Json<FulfillmentConstraints> {
    Json(FulfillmentConstraints::current())
}

pub async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<FulfillmentAnalytics>, ProblemResponse> {
    let repo = state.storage().fulfillments();

    let average_warehouses_per_product = repo
        .average_warehouses_per_product()
        .await
        .map_err(storage_failure)?;

    let product_association_count = match query.product_id {
        Some(product_id) => Some(
            repo.count_for_product(product_id)
                .await
                .map_err(storage_failure)?,
        ),
        None => None,
    };
    let store_association_count = match query.store_id {
        Some(store_id) => Some(
            repo.count_for_store(store_id)
                .await
                .map_err(storage_failure)?,
        ),
        None => None,
    };

    Ok(Json(FulfillmentAnalytics {
        average_warehouses_per_product,
        product_association_count,
        store_association_count,
    }))
}

async fn find_product(state: &AppState, id: i64) -> Result<Product, ProblemResponse> {
    state
        .storage()
        .products()
        .find(id)
        .await
        .map_err(|err| {
            error!(stage = "fulfillment", error = %err, "storage failure");
            ProblemResponse::internal("storage failure")
        })?
        .ok_or_else(|| {
            ProblemResponse::not_found(format!("product with id {id} does not exist"))
        })
}

async fn find_store(state: &AppState, id: i64) -> Result<Store, ProblemResponse> {
    state
        .storage()
        .stores()
        .find(id)
        .await
        .map_err(|err| {
            error!(stage = "fulfillment", error = %err, "storage failure");
            ProblemResponse::internal("storage failure")
        })?
        .ok_or_else(|| ProblemResponse::not_found(format!("store with id {id} does not exist")))
}

fn transaction_failure(err: sqlx::Error) -> ProblemResponse {
    error!(stage = "fulfillment", error = %err, "transaction failure");
    ProblemResponse::internal("storage failure")
}

fn storage_failure(err: FulfillmentError) -> ProblemResponse {
    error!(stage = "fulfillment", error = %err, "storage failure");
    ProblemResponse::internal("storage failure")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::Router;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use crate::router::{app_router, test_support};

    async fn create_product(app: &Router, name: &str) -> i64 {
        let (status, body) = test_support::send(
            app,
            "POST",
            "/product",
            Some(json!({ "name": name, "price": 10.0, "stock": 100 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().expect("id assigned")
    }

    async fn create_store(app: &Router, name: &str) -> i64 {
        let (status, body) = test_support::send(
            app,
            "POST",
            "/store",
            Some(json!({ "name": name, "quantityProductsInStock": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().expect("id assigned")
    }

    async fn associate(
        app: &Router,
        product_id: i64,
        code: &str,
        store_id: i64,
    ) -> (StatusCode, serde_json::Value) {
        test_support::send(
            app,
            "POST",
            "/fulfillment",
            Some(json!({
                "productId": product_id,
                "warehouseBusinessUnitCode": code,
                "storeId": store_id
            })),
        )
        .await
    }

    #[tokio::test]
    async fn association_round_trip() {
        let app = app_router(test_support::setup_state().await);
        let product_id = create_product(&app, "assoc-rt-product").await;
        let store_id = create_store(&app, "assoc-rt-store").await;

        let (status, created) = associate(&app, product_id, "MWH.RT", store_id).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["productId"], product_id);
        assert_eq!(created["storeId"], store_id);
        assert_eq!(created["warehouseBusinessUnitCode"], "MWH.RT");
        assert!(created["createdAt"].is_string());
        let id = created["id"].as_i64().expect("id assigned");

        let (status, listed) = test_support::send(
            &app,
            "GET",
            &format!("/fulfillment?productId={product_id}&storeId={store_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().expect("array body").len(), 1);

        let (status, by_store) =
            test_support::send(&app, "GET", &format!("/fulfillment/store/{store_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_store.as_array().expect("array body").len(), 1);

        let (status, by_warehouse) =
            test_support::send(&app, "GET", "/fulfillment/warehouse/MWH.RT", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_warehouse.as_array().expect("array body").len(), 1);

        let (status, _) =
            test_support::send(&app, "DELETE", &format!("/fulfillment/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) =
            test_support::send(&app, "DELETE", &format!("/fulfillment/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn association_is_stamped_with_the_injected_clock() {
        let pinned: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        let state = test_support::setup_state()
            .await
            .with_clock(Arc::new(move || pinned));
        let app = app_router(state);

        let product_id = create_product(&app, "clock-product").await;
        let store_id = create_store(&app, "clock-store").await;

        let (status, created) = associate(&app, product_id, "MWH.CLOCK", store_id).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created["createdAt"]
            .as_str()
            .expect("createdAt")
            .starts_with("2024-05-01T12:00:00"));
    }

    #[tokio::test]
    async fn third_warehouse_for_product_in_store_is_rejected() {
        let app = app_router(test_support::setup_state().await);
        let product_id = create_product(&app, "limit2-product").await;
        let store_id = create_store(&app, "limit2-store").await;

        for code in ["MWH.L2A", "MWH.L2B"] {
            let (status, _) = associate(&app, product_id, code, store_id).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = associate(&app, product_id, "MWH.L2C", store_id).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("2 warehouses"));
    }

    #[tokio::test]
    async fn fourth_warehouse_for_store_is_rejected() {
        let app = app_router(test_support::setup_state().await);
        let store_id = create_store(&app, "limit3-store").await;

        for (idx, code) in ["MWH.L3A", "MWH.L3B", "MWH.L3C"].iter().enumerate() {
            let product_id = create_product(&app, &format!("limit3-product-{idx}")).await;
            let (status, _) = associate(&app, product_id, code, store_id).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let product_id = create_product(&app, "limit3-product-final").await;
        let (status, body) = associate(&app, product_id, "MWH.L3D", store_id).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("3 warehouses"));
    }

    #[tokio::test]
    async fn sixth_product_type_in_warehouse_is_rejected() {
        let app = app_router(test_support::setup_state().await);

        for idx in 0..5 {
            let product_id = create_product(&app, &format!("limit5-product-{idx}")).await;
            let store_id = create_store(&app, &format!("limit5-store-{idx}")).await;
            let (status, _) = associate(&app, product_id, "MWH.L5", store_id).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let product_id = create_product(&app, "limit5-product-final").await;
        let store_id = create_store(&app, "limit5-store-final").await;
        let (status, body) = associate(&app, product_id, "MWH.L5", store_id).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("5 different product types"));
    }

    #[tokio::test]
    async fn duplicate_triple_conflicts() {
        let app = app_router(test_support::setup_state().await);
        let product_id = create_product(&app, "dup-product").await;
        let store_id = create_store(&app, "dup-store").await;

        let (status, _) = associate(&app, product_id, "MWH.DUPA", store_id).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = associate(&app, product_id, "MWH.DUPA", store_id).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("already exists"));
    }

    #[tokio::test]
    async fn create_validates_payload_shape() {
        let app = app_router(test_support::setup_state().await);
        let product_id = create_product(&app, "shape-product").await;
        let store_id = create_store(&app, "shape-store").await;

        let cases = [
            json!({ "warehouseBusinessUnitCode": "MWH.S", "storeId": store_id }),
            json!({ "productId": 0, "warehouseBusinessUnitCode": "MWH.S", "storeId": store_id }),
            json!({ "productId": product_id, "storeId": store_id }),
            json!({ "productId": product_id, "warehouseBusinessUnitCode": "  ", "storeId": store_id }),
            json!({ "productId": product_id, "warehouseBusinessUnitCode": "MWH.S" }),
            json!({ "productId": product_id, "warehouseBusinessUnitCode": "MWH.S", "storeId": -1 }),
        ];
        for payload in cases {
            let (status, _) = test_support::send(&app, "POST", "/fulfillment", Some(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn create_requires_existing_product_and_store() {
        let app = app_router(test_support::setup_state().await);
        let product_id = create_product(&app, "exists-product").await;
        let store_id = create_store(&app, "exists-store").await;

        let (status, body) = associate(&app, 999999, "MWH.E", store_id).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("product with id"));

        let (status, body) = associate(&app, product_id, "MWH.E", 999999).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("store with id"));
    }

    #[tokio::test]
    async fn pair_listing_requires_both_parameters() {
        let app = app_router(test_support::setup_state().await);
        let product_id = create_product(&app, "pair-product").await;

        let (status, body) = test_support::send(
            &app,
            "GET",
            &format!("/fulfillment?productId={product_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"]
            .as_str()
            .expect("detail")
            .contains("productId and storeId"));
    }

    #[tokio::test]
    async fn store_listing_requires_existing_store() {
        let app = app_router(test_support::setup_state().await);

        let (status, _) =
            test_support::send(&app, "GET", "/fulfillment/store/999999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn warehouse_listing_returns_empty_for_unknown_code() {
        let app = app_router(test_support::setup_state().await);

        let (status, body) =
            test_support::send(&app, "GET", "/fulfillment/warehouse/MWH.NONE", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().expect("array body").is_empty());
    }

    #[tokio::test]
    async fn constraints_reports_the_limits() {
        let app = app_router(test_support::setup_state().await);

        let (status, body) =
            test_support::send(&app, "GET", "/fulfillment/constraints", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["maxWarehousesPerProductPerStore"], 2);
        assert_eq!(body["maxWarehousesPerStore"], 3);
        assert_eq!(body["maxProductTypesPerWarehouse"], 5);
    }

    #[tokio::test]
    async fn analytics_reports_average_and_optional_counts() {
        let app = app_router(test_support::setup_state().await);

        let (status, body) = test_support::send(&app, "GET", "/fulfillment/analytics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["averageWarehousesPerProduct"], 0.0);
        assert!(body.get("productAssociationCount").is_none());
        assert!(body.get("storeAssociationCount").is_none());

        let product_a = create_product(&app, "ana-product-a").await;
        let product_b = create_product(&app, "ana-product-b").await;
        let store_id = create_store(&app, "ana-store").await;

        for (pid, code) in [
            (product_a, "MWH.ANA1"),
            (product_a, "MWH.ANA2"),
            (product_b, "MWH.ANA1"),
        ] {
            let (status, _) = associate(&app, pid, code, store_id).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = test_support::send(
            &app,
            "GET",
            &format!("/fulfillment/analytics?productId={product_a}&storeId={store_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["averageWarehousesPerProduct"], 1.5);
        assert_eq!(body["productAssociationCount"], 2);
        assert_eq!(body["storeAssociationCount"], 3);
    }
}
