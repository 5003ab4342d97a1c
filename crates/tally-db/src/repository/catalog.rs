//! # Catalog Repository
//!
//! Read access to branches and products. The catalog belongs to the
//! surrounding storefront system; the upserts here exist for seeding and
//! tests.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

use crate::error::DbResult;
use tally_core::{Branch, CatalogProduct};

const PRODUCT_COLUMNS: &str =
    "id, name, selling_price_cents, tax_rate_bps, reorder_level, is_active";

/// Repository for branch and product lookups.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Gets a product by ID, active or not.
    pub async fn get_product(&self, id: i64) -> DbResult<Option<CatalogProduct>> {
        let product = sqlx::query_as::<_, CatalogProduct>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Lists products ordered by name.
    pub async fn list_products(&self, active_only: bool) -> DbResult<Vec<CatalogProduct>> {
        let products = sqlx::query_as::<_, CatalogProduct>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE (?1 = 0 OR is_active = 1) ORDER BY name"
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Gets a branch by ID.
    pub async fn get_branch(&self, id: i64) -> DbResult<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>("SELECT id, code, name FROM branches WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(branch)
    }

    /// Lists all branches ordered by ID.
    pub async fn list_branches(&self) -> DbResult<Vec<Branch>> {
        let branches = sqlx::query_as::<_, Branch>("SELECT id, code, name FROM branches ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(branches)
    }

    /// Gets a branch inside the caller's transaction.
    pub async fn branch_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>("SELECT id, code, name FROM branches WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(branch)
    }

    /// Loads the given products in one query, keyed by ID.
    ///
    /// Unknown IDs are simply absent from the map. Duplicate IDs are fine.
    pub async fn products_in(
        conn: &mut SqliteConnection,
        ids: &[i64],
    ) -> DbResult<HashMap<i64, CatalogProduct>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id IN ("));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let products: Vec<CatalogProduct> = builder
            .build_query_as::<CatalogProduct>()
            .fetch_all(&mut *conn)
            .await?;

        debug!(requested = ids.len(), found = products.len(), "Loaded products");

        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Inserts or replaces a branch.
    pub async fn upsert_branch(&self, branch: &Branch) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO branches (id, code, name) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET code = excluded.code, name = excluded.name
            "#,
        )
        .bind(branch.id)
        .bind(&branch.code)
        .bind(&branch.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts or replaces a product.
    pub async fn upsert_product(&self, product: &CatalogProduct) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, selling_price_cents, tax_rate_bps, reorder_level, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                selling_price_cents = excluded.selling_price_cents,
                tax_rate_bps = excluded.tax_rate_bps,
                reorder_level = excluded.reorder_level,
                is_active = excluded.is_active
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.selling_price_cents)
        .bind(product.tax_rate_bps)
        .bind(product.reorder_level)
        .bind(product.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
