use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use fulfil_core::types::{FulfillmentAssociation, Product, Store, Warehouse};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to operate on products.
    pub fn products(&self) -> ProductRepository {
        ProductRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on stores.
    pub fn stores(&self) -> StoreRepository {
        StoreRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on warehouses.
    pub fn warehouses(&self) -> WarehouseRepository {
        WarehouseRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on fulfillment associations.
    pub fn fulfillments(&self) -> FulfillmentRepository {
        FulfillmentRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Repository for the `product` table.
#[derive(Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Lists all products ordered by name.
    pub async fn list(&self) -> Result<Vec<Product>, ProductError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, description, price, stock FROM product ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProductRow::into_domain).collect())
    }

    /// Fetches a single product by id.
    pub async fn find(&self, id: i64) -> Result<Option<Product>, ProductError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, description, price, stock FROM product WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProductRow::into_domain))
    }

    /// Inserts a new product and returns the persisted row.
    pub async fn insert(&self, record: NewProduct<'_>) -> Result<Product, ProductError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "INSERT INTO product (name, description, price, stock) \
             VALUES (?, ?, ?, ?) \
             RETURNING id, name, description, price, stock",
        )
        .bind(record.name)
        .bind(record.description)
        .bind(record.price)
        .bind(record.stock)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_domain())
    }

    /// Overwrites every mutable field of a product, returning the updated
    /// row or `None` when the id is unknown.
    pub async fn update(
        &self,
        id: i64,
        record: NewProduct<'_>,
    ) -> Result<Option<Product>, ProductError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "UPDATE product SET name = ?, description = ?, price = ?, stock = ? \
             WHERE id = ? \
             RETURNING id, name, description, price, stock",
        )
        .bind(record.name)
        .bind(record.description)
        .bind(record.price)
        .bind(record.stock)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProductRow::into_domain))
    }

    /// Deletes a product, returning whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, ProductError> {
        let result = sqlx::query("DELETE FROM product WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Data required to insert or fully update a product.
#[derive(Clone, Copy)]
pub struct NewProduct<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub price: f64,
    pub stock: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    description: Option<String>,
    price: f64,
    stock: i64,
}

impl ProductRow {
    fn into_domain(self) -> Product {
        Product {
            id: self.id,
            name: self.name,
            description: self.description,
            price: self.price,
            stock: self.stock,
        }
    }
}

/// Error type for operations on the product repository.
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `store` table.
#[derive(Clone)]
pub struct StoreRepository {
    pool: SqlitePool,
}

impl StoreRepository {
    /// Lists all stores ordered by name.
    pub async fn list(&self) -> Result<Vec<Store>, StoreError> {
        let rows = sqlx::query_as::<_, StoreRow>(
            "SELECT id, name, quantity_products_in_stock FROM store ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoreRow::into_domain).collect())
    }

    /// Fetches a single store by id.
    pub async fn find(&self, id: i64) -> Result<Option<Store>, StoreError> {
        let row = sqlx::query_as::<_, StoreRow>(
            "SELECT id, name, quantity_products_in_stock FROM store WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StoreRow::into_domain))
    }

    /// Inserts a new store. Store names are unique.
    pub async fn insert(&self, record: NewStore<'_>) -> Result<Store, StoreError> {
        let row = sqlx::query_as::<_, StoreRow>(
            "INSERT INTO store (name, quantity_products_in_stock) \
             VALUES (?, ?) \
             RETURNING id, name, quantity_products_in_stock",
        )
        .bind(record.name)
        .bind(record.quantity_products_in_stock)
        .fetch_one(&self.pool)
        .await
        .map_err(map_store_error)?;

        Ok(row.into_domain())
    }

    /// Overwrites the mutable fields of a store.
    pub async fn update(
        &self,
        id: i64,
        record: NewStore<'_>,
    ) -> Result<Option<Store>, StoreError> {
        let row = sqlx::query_as::<_, StoreRow>(
            "UPDATE store SET name = ?, quantity_products_in_stock = ? \
             WHERE id = ? \
             RETURNING id, name, quantity_products_in_stock",
        )
        .bind(record.name)
        .bind(record.quantity_products_in_stock)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_store_error)?;

        Ok(row.map(StoreRow::into_domain))
    }

    /// Deletes a store, returning whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM store WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) {
                StoreError::DuplicateName
            } else {
                StoreError::Database(sqlx::Error::Database(db_err))
            }
        }
        other => StoreError::Database(other),
    }
}

/// Data required to insert or fully update a store.
#[derive(Clone, Copy)]
pub struct NewStore<'a> {
    pub name: &'a str,
    pub quantity_products_in_stock: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct StoreRow {
    id: i64,
    name: String,
    quantity_products_in_stock: i64,
}

impl StoreRow {
    fn into_domain(self) -> Store {
        Store {
            id: self.id,
            name: self.name,
            quantity_products_in_stock: self.quantity_products_in_stock,
        }
    }
}

/// Error type for operations on the store repository.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a store with the same name already exists")]
    DuplicateName,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `warehouse` table, keyed by business-unit code.
#[derive(Clone)]
pub struct WarehouseRepository {
    pool: SqlitePool,
}

impl WarehouseRepository {
    /// Lists all warehouses ordered by business-unit code.
    pub async fn list(&self) -> Result<Vec<Warehouse>, WarehouseError> {
        let rows = sqlx::query_as::<_, WarehouseRow>(
            "SELECT business_unit_code, location, capacity, stock, created_at, archived_at \
             FROM warehouse ORDER BY business_unit_code",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WarehouseRow::into_domain).collect())
    }

    /// Fetches a warehouse by its business-unit code.
    pub async fn find(&self, business_unit_code: &str) -> Result<Option<Warehouse>, WarehouseError> {
        let row = sqlx::query_as::<_, WarehouseRow>(
            "SELECT business_unit_code, location, capacity, stock, created_at, archived_at \
             FROM warehouse WHERE business_unit_code = ?",
        )
        .bind(business_unit_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WarehouseRow::into_domain))
    }

    /// Counts warehouses hosted at a location.
    pub async fn count_at_location(&self, location: &str) -> Result<i64, WarehouseError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM warehouse WHERE location = ?")
            .bind(location)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.get("cnt");
        Ok(count)
    }

    /// Inserts a new warehouse row.
    pub async fn insert(&self, record: NewWarehouse<'_>) -> Result<Warehouse, WarehouseError> {
        let row = sqlx::query_as::<_, WarehouseRow>(
            "INSERT INTO warehouse (business_unit_code, location, capacity, stock, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING business_unit_code, location, capacity, stock, created_at, archived_at",
        )
        .bind(record.business_unit_code)
        .bind(record.location)
        .bind(record.capacity)
        .bind(record.stock)
        .bind(to_rfc3339(record.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) {
                    WarehouseError::DuplicateCode
                } else {
                    WarehouseError::Database(sqlx::Error::Database(db_err))
                }
            }
            other => WarehouseError::Database(other),
        })?;

        Ok(row.into_domain())
    }

    /// Overwrites a warehouse in place as part of a replacement.
    ///
    /// Capacity and stock are written verbatim (absent values become NULL);
    /// an absent location keeps the stored one. Returns `None` when the
    /// business-unit code is unknown.
    pub async fn replace(
        &self,
        business_unit_code: &str,
        location: Option<&str>,
        capacity: Option<i64>,
        stock: Option<i64>,
    ) -> Result<Option<Warehouse>, WarehouseError> {
        let row = sqlx::query_as::<_, WarehouseRow>(
            "UPDATE warehouse \
             SET location = COALESCE(?, location), capacity = ?, stock = ? \
             WHERE business_unit_code = ? \
             RETURNING business_unit_code, location, capacity, stock, created_at, archived_at",
        )
        .bind(location)
        .bind(capacity)
        .bind(stock)
        .bind(business_unit_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WarehouseRow::into_domain))
    }

    /// Removes a warehouse row, returning whether one existed.
    pub async fn delete(&self, business_unit_code: &str) -> Result<bool, WarehouseError> {
        let result = sqlx::query("DELETE FROM warehouse WHERE business_unit_code = ?")
            .bind(business_unit_code)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Data required to insert a warehouse.
#[derive(Clone, Copy)]
pub struct NewWarehouse<'a> {
    pub business_unit_code: &'a str,
    pub location: &'a str,
    pub capacity: i64,
    pub stock: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct WarehouseRow {
    business_unit_code: String,
    location: String,
    capacity: Option<i64>,
    stock: Option<i64>,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl WarehouseRow {
    fn into_domain(self) -> Warehouse {
        Warehouse {
            business_unit_code: self.business_unit_code,
            location: self.location,
            capacity: self.capacity,
            stock: self.stock,
            created_at: self.created_at,
            archived_at: self.archived_at,
        }
    }
}

/// Error type for operations on the warehouse repository.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("a warehouse with the same business unit code already exists")]
    DuplicateCode,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `fulfillment_association` table.
///
/// The duplicate check, the distinct-count queries, and the insert are run
/// inside one caller-held transaction so a single request observes a
/// consistent pre-insertion state.
#[derive(Clone)]
pub struct FulfillmentRepository {
    pool: SqlitePool,
}

impl FulfillmentRepository {
    /// Begins a SQLite transaction.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns whether the exact (product, warehouse, store) triple exists.
    pub async fn exists(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        product_id: i64,
        warehouse_business_unit_code: &str,
        store_id: i64,
    ) -> Result<bool, FulfillmentError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM fulfillment_association \
             WHERE product_id = ? AND warehouse_business_unit_code = ? AND store_id = ?",
        )
        .bind(product_id)
        .bind(warehouse_business_unit_code)
        .bind(store_id)
        .fetch_one(&mut **tx)
        .await?;

        let count: i64 = row.get("cnt");
        Ok(count > 0)
    }

    /// Counts distinct warehouses fulfilling a product in a store.
    pub async fn count_warehouses_for_product_in_store(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        product_id: i64,
        store_id: i64,
    ) -> Result<i64, FulfillmentError> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT warehouse_business_unit_code) AS cnt \
             FROM fulfillment_association WHERE product_id = ? AND store_id = ?",
        )
        .bind(product_id)
        .bind(store_id)
        .fetch_one(&mut **tx)
        .await?;

        let count: i64 = row.get("cnt");
        Ok(count)
    }

    /// Counts distinct warehouses fulfilling any product in a store.
    pub async fn count_warehouses_for_store(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        store_id: i64,
    ) -> Result<i64, FulfillmentError> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT warehouse_business_unit_code) AS cnt \
             FROM fulfillment_association WHERE store_id = ?",
        )
        .bind(store_id)
        .fetch_one(&mut **tx)
        .await?;

        let count: i64 = row.get("cnt");
        Ok(count)
    }

    /// Counts distinct product types held in a warehouse.
    pub async fn count_product_types_in_warehouse(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        warehouse_business_unit_code: &str,
    ) -> Result<i64, FulfillmentError> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT product_id) AS cnt \
             FROM fulfillment_association WHERE warehouse_business_unit_code = ?",
        )
        .bind(warehouse_business_unit_code)
        .fetch_one(&mut **tx)
        .await?;

        let count: i64 = row.get("cnt");
        Ok(count)
    }

    /// Inserts a new association within the caller's transaction.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: NewAssociation<'_>,
    ) -> Result<FulfillmentAssociation, FulfillmentError> {
        let row = sqlx::query_as::<_, AssociationRow>(
            "INSERT INTO fulfillment_association \
             (product_id, warehouse_business_unit_code, store_id, created_at) \
             VALUES (?, ?, ?, ?) \
             RETURNING id, product_id, warehouse_business_unit_code, store_id, \
                       created_at, updated_at",
        )
        .bind(record.product_id)
        .bind(record.warehouse_business_unit_code)
        .bind(record.store_id)
        .bind(to_rfc3339(record.created_at))
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(SQLITE_CONSTRAINT_UNIQUE) => FulfillmentError::DuplicateAssociation,
                Some(SQLITE_CONSTRAINT_FOREIGNKEY) => FulfillmentError::MissingReference,
                _ => FulfillmentError::Database(sqlx::Error::Database(db_err)),
            },
            other => FulfillmentError::Database(other),
        })?;

        Ok(row.into_domain())
    }

    /// Fetches an association by id.
    pub async fn find(&self, id: i64) -> Result<Option<FulfillmentAssociation>, FulfillmentError> {
        let row = sqlx::query_as::<_, AssociationRow>(
            "SELECT id, product_id, warehouse_business_unit_code, store_id, \
                    created_at, updated_at \
             FROM fulfillment_association WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AssociationRow::into_domain))
    }

    /// Deletes an association, returning whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, FulfillmentError> {
        let result = sqlx::query("DELETE FROM fulfillment_association WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists associations for a (product, store) pair.
    pub async fn list_by_product_and_store(
        &self,
        product_id: i64,
        store_id: i64,
    ) -> Result<Vec<FulfillmentAssociation>, FulfillmentError> {
        let rows = sqlx::query_as::<_, AssociationRow>(
            "SELECT id, product_id, warehouse_business_unit_code, store_id, \
                    created_at, updated_at \
             FROM fulfillment_association \
             WHERE product_id = ? AND store_id = ? ORDER BY id",
        )
        .bind(product_id)
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AssociationRow::into_domain).collect())
    }

    /// Lists associations for a store.
    pub async fn list_by_store(
        &self,
        store_id: i64,
    ) -> Result<Vec<FulfillmentAssociation>, FulfillmentError> {
        let rows = sqlx::query_as::<_, AssociationRow>(
            "SELECT id, product_id, warehouse_business_unit_code, store_id, \
                    created_at, updated_at \
             FROM fulfillment_association WHERE store_id = ? ORDER BY id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AssociationRow::into_domain).collect())
    }

    /// Lists associations for a warehouse code.
    pub async fn list_by_warehouse(
        &self,
        warehouse_business_unit_code: &str,
    ) -> Result<Vec<FulfillmentAssociation>, FulfillmentError> {
        let rows = sqlx::query_as::<_, AssociationRow>(
            "SELECT id, product_id, warehouse_business_unit_code, store_id, \
                    created_at, updated_at \
             FROM fulfillment_association \
             WHERE warehouse_business_unit_code = ? ORDER BY id",
        )
        .bind(warehouse_business_unit_code)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AssociationRow::into_domain).collect())
    }

    /// Counts associations recorded for a store.
    pub async fn count_for_store(&self, store_id: i64) -> Result<i64, FulfillmentError> {
        let row =
            sqlx::query("SELECT COUNT(*) AS cnt FROM fulfillment_association WHERE store_id = ?")
                .bind(store_id)
                .fetch_one(&self.pool)
                .await?;

        let count: i64 = row.get("cnt");
        Ok(count)
    }

    /// Counts associations recorded for a product.
    pub async fn count_for_product(&self, product_id: i64) -> Result<i64, FulfillmentError> {
        let row =
            sqlx::query("SELECT COUNT(*) AS cnt FROM fulfillment_association WHERE product_id = ?")
                .bind(product_id)
                .fetch_one(&self.pool)
                .await?;

        let count: i64 = row.get("cnt");
        Ok(count)
    }

    /// Average number of associations per distinct product; 0.0 when the
    /// table references no products.
    pub async fn average_warehouses_per_product(&self) -> Result<f64, FulfillmentError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(DISTINCT product_id) AS products \
             FROM fulfillment_association",
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let products: i64 = row.get("products");
        if products == 0 {
            Ok(0.0)
        } else {
            Ok(total as f64 / products as f64)
        }
    }
}

/// Data required to insert an association.
#[derive(Clone, Copy)]
pub struct NewAssociation<'a> {
    pub product_id: i64,
    pub warehouse_business_unit_code: &'a str,
    pub store_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AssociationRow {
    id: i64,
    product_id: i64,
    warehouse_business_unit_code: String,
    store_id: i64,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl AssociationRow {
    fn into_domain(self) -> FulfillmentAssociation {
        FulfillmentAssociation {
            id: self.id,
            product_id: self.product_id,
            warehouse_business_unit_code: self.warehouse_business_unit_code,
            store_id: self.store_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Error type for operations on the fulfillment repository.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("an association for the same product, warehouse, and store already exists")]
    DuplicateAssociation,
    #[error("the referenced product or store does not exist")]
    MissingReference,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
