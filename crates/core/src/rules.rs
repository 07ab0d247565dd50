use thiserror::Error;

use crate::location::Location;

/// How many distinct warehouses may fulfill one product for one store.
pub const MAX_WAREHOUSES_PER_PRODUCT_PER_STORE: u32 = 2;
/// How many distinct warehouses may fulfill any product for one store.
pub const MAX_WAREHOUSES_PER_STORE: u32 = 3;
/// How many distinct product types one warehouse may hold.
pub const MAX_PRODUCT_TYPES_PER_WAREHOUSE: u32 = 5;

/// Distinct-count snapshot taken from the association table before an
/// insert. The counts describe the pre-insertion state; two requests
/// validated concurrently can both pass before either commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationCounts {
    pub warehouses_for_product_in_store: i64,
    pub warehouses_for_store: i64,
    pub product_types_in_warehouse: i64,
}

/// Checks the three association limits against the observed counts.
pub fn check_association(counts: AssociationCounts) -> Result<(), ConstraintViolation> {
    if counts.warehouses_for_product_in_store >= MAX_WAREHOUSES_PER_PRODUCT_PER_STORE as i64 {
        return Err(ConstraintViolation::WarehousesPerProductPerStore {
            limit: MAX_WAREHOUSES_PER_PRODUCT_PER_STORE,
        });
    }

    if counts.warehouses_for_store >= MAX_WAREHOUSES_PER_STORE as i64 {
        return Err(ConstraintViolation::WarehousesPerStore {
            limit: MAX_WAREHOUSES_PER_STORE,
        });
    }

    if counts.product_types_in_warehouse >= MAX_PRODUCT_TYPES_PER_WAREHOUSE as i64 {
        return Err(ConstraintViolation::ProductTypesPerWarehouse {
            limit: MAX_PRODUCT_TYPES_PER_WAREHOUSE,
        });
    }

    Ok(())
}

/// One of the association limits would be exceeded.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolation {
    #[error("product is already fulfilled by {limit} warehouses in this store, maximum reached")]
    WarehousesPerProductPerStore { limit: u32 },
    #[error("store is already fulfilled by {limit} warehouses, maximum reached")]
    WarehousesPerStore { limit: u32 },
    #[error("warehouse already holds {limit} different product types, maximum reached")]
    ProductTypesPerWarehouse { limit: u32 },
}

impl ConstraintViolation {
    /// Returns the metrics label for the violated rule.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::WarehousesPerProductPerStore { .. } => "warehouses_per_product_per_store",
            Self::WarehousesPerStore { .. } => "warehouses_per_store",
            Self::ProductTypesPerWarehouse { .. } => "product_types_per_warehouse",
        }
    }
}

/// Validates a warehouse about to be created at a resolved location.
///
/// `existing_at_location` is the number of warehouses already hosted there.
pub fn validate_creation(
    capacity: i64,
    stock: i64,
    location: &Location,
    existing_at_location: i64,
) -> Result<(), WarehouseRuleViolation> {
    if existing_at_location >= location.max_number_of_warehouses {
        return Err(WarehouseRuleViolation::LocationFull {
            identification: location.identification.clone(),
            limit: location.max_number_of_warehouses,
        });
    }

    if capacity > location.max_capacity {
        return Err(WarehouseRuleViolation::CapacityExceedsLocation {
            capacity,
            max_capacity: location.max_capacity,
        });
    }

    if stock > capacity {
        return Err(WarehouseRuleViolation::StockExceedsCapacity { stock, capacity });
    }

    Ok(())
}

/// Validates a replacement against the stored warehouse.
///
/// Stock is immutable through replacement and the incoming capacity must
/// accommodate the stored stock. Either comparison is skipped when one of
/// its operands is absent.
pub fn validate_replacement(
    existing_stock: Option<i64>,
    new_stock: Option<i64>,
    new_capacity: Option<i64>,
) -> Result<(), WarehouseRuleViolation> {
    if let (Some(existing), Some(incoming)) = (existing_stock, new_stock) {
        if existing != incoming {
            return Err(WarehouseRuleViolation::StockMismatch {
                existing,
                incoming,
            });
        }
    }

    if let (Some(capacity), Some(stock)) = (new_capacity, existing_stock) {
        if capacity < stock {
            return Err(WarehouseRuleViolation::CapacityBelowStock { capacity, stock });
        }
    }

    Ok(())
}

/// A warehouse create/replace rule was broken.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WarehouseRuleViolation {
    #[error("location {identification} already hosts its maximum of {limit} warehouses")]
    LocationFull { identification: String, limit: i64 },
    #[error("capacity {capacity} exceeds the location limit of {max_capacity}")]
    CapacityExceedsLocation { capacity: i64, max_capacity: i64 },
    #[error("stock {stock} exceeds capacity {capacity}")]
    StockExceedsCapacity { stock: i64, capacity: i64 },
    #[error("stock {incoming} must match the existing stock {existing}")]
    StockMismatch { existing: i64, incoming: i64 },
    #[error("capacity {capacity} cannot accommodate the existing stock {stock}")]
    CapacityBelowStock { capacity: i64, stock: i64 },
}

impl WarehouseRuleViolation {
    /// Returns the metrics label for the violated rule.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::LocationFull { .. } => "location_full",
            Self::CapacityExceedsLocation { .. } => "capacity_exceeds_location",
            Self::StockExceedsCapacity { .. } => "stock_exceeds_capacity",
            Self::StockMismatch { .. } => "stock_mismatch",
            Self::CapacityBelowStock { .. } => "capacity_below_stock",
        }
    }
}
