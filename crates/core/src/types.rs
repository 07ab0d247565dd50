use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules;

/// A catalog product tracked for fulfillment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
}

/// A retail store that warehouses fulfill products for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: i64,
    pub name: String,
    pub quantity_products_in_stock: i64,
}

/// A warehouse unit identified by its business-unit code rather than a
/// surrogate id. Capacity and stock are nullable in the persistence tier,
/// which is what makes the replacement escape hatch possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub business_unit_code: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

/// Declares that a warehouse may fulfill a product for a store.
///
/// The warehouse side is the business-unit code string, not a foreign key,
/// mirroring how codes travel through the rest of the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentAssociation {
    pub id: i64,
    pub product_id: i64,
    pub warehouse_business_unit_code: String,
    pub store_id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The three association limits, as reported by the constraints endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentConstraints {
    pub max_warehouses_per_product_per_store: u32,
    pub max_warehouses_per_store: u32,
    pub max_product_types_per_warehouse: u32,
}

impl FulfillmentConstraints {
    /// Returns the limits currently enforced on association creation.
    pub fn current() -> Self {
        Self {
            max_warehouses_per_product_per_store: rules::MAX_WAREHOUSES_PER_PRODUCT_PER_STORE,
            max_warehouses_per_store: rules::MAX_WAREHOUSES_PER_STORE,
            max_product_types_per_warehouse: rules::MAX_PRODUCT_TYPES_PER_WAREHOUSE,
        }
    }
}

/// Read-side figures over the association table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentAnalytics {
    pub average_warehouses_per_product: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_association_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_association_count: Option<i64>,
}
