use crate::auth::session::CurrentUser;
use crate::roles::Capability;
use crate::shared::schema::inventory_items;
use crate::shared::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = inventory_items)]
pub struct InventoryItem {
    pub id: Uuid,
    pub name: String,
    pub manufacturer: Option<String>,
    pub sku: Option<String>,
    pub bin_location: Option<String>,
    pub quantity: i32,
    pub min_quantity: i32,
    pub price: Option<BigDecimal>,
    pub cost: Option<BigDecimal>,
    pub supplier: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn is_out_of_stock(&self) -> bool {
        self.quantity <= 0
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity > 0 && self.quantity <= self.min_quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockFilter {
    Low,
    Out,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub stock: Option<StockFilter>,
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub name: String,
    pub manufacturer: Option<String>,
    pub sku: Option<String>,
    pub bin_location: Option<String>,
    pub quantity: Option<i32>,
    pub min_quantity: Option<i32>,
    pub price: Option<BigDecimal>,
    pub cost: Option<BigDecimal>,
    pub supplier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub sku: Option<String>,
    pub bin_location: Option<String>,
    pub quantity: Option<i32>,
    pub min_quantity: Option<i32>,
    pub price: Option<BigDecimal>,
    pub cost: Option<BigDecimal>,
    pub supplier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub delta: i32,
}

/// Case-insensitive substring match over name, sku and manufacturer,
/// the same semantics the part-search box has always had.
pub fn matches_search(item: &InventoryItem, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    let hit = |field: &str| field.to_lowercase().contains(&term);
    hit(&item.name)
        || item.sku.as_deref().is_some_and(hit)
        || item.manufacturer.as_deref().is_some_and(hit)
}

pub fn matches_stock(item: &InventoryItem, filter: Option<StockFilter>) -> bool {
    match filter {
        None => true,
        Some(StockFilter::Low) => item.is_low_stock(),
        Some(StockFilter::Out) => item.is_out_of_stock(),
    }
}

/// The active stock tab and the search box intersect.
pub fn apply_filters(
    items: Vec<InventoryItem>,
    search: Option<&str>,
    stock: Option<StockFilter>,
) -> Vec<InventoryItem> {
    items
        .into_iter()
        .filter(|item| search.map_or(true, |t| matches_search(item, t)))
        .filter(|item| matches_stock(item, stock))
        .collect()
}

pub async fn list_items(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<InventoryItem>>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let rows: Vec<InventoryItem> = inventory_items::table
        .order(inventory_items::name.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(apply_filters(rows, query.search.as_deref(), query.stock)))
}

pub async fn create_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateItemRequest>,
) -> Result<Json<InventoryItem>, (StatusCode, String)> {
    user.require(Capability::ManageInventory)?;
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Name is required".to_string()));
    }
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let item = InventoryItem {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        manufacturer: req.manufacturer,
        sku: req.sku,
        bin_location: req.bin_location,
        quantity: req.quantity.unwrap_or(0).max(0),
        min_quantity: req.min_quantity.unwrap_or(0).max(0),
        price: req.price,
        cost: req.cost,
        supplier: req.supplier,
        created_at: Utc::now(),
    };

    diesel::insert_into(inventory_items::table)
        .values(&item)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(item))
}

pub async fn get_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<InventoryItem>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let item: InventoryItem = inventory_items::table
        .find(id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Inventory item not found".to_string()))?;
    Ok(Json(item))
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<InventoryItem>, (StatusCode, String)> {
    user.require(Capability::ManageInventory)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    if let Some(name) = req.name {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::name.eq(name))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(manufacturer) = req.manufacturer {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::manufacturer.eq(manufacturer))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(sku) = req.sku {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::sku.eq(sku))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(bin_location) = req.bin_location {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::bin_location.eq(bin_location))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(quantity) = req.quantity {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::quantity.eq(quantity.max(0)))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(min_quantity) = req.min_quantity {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::min_quantity.eq(min_quantity.max(0)))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(price) = req.price {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::price.eq(price))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(cost) = req.cost {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::cost.eq(cost))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(supplier) = req.supplier {
        diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
            .set(inventory_items::supplier.eq(supplier))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    get_item(State(state), user, Path(id)).await
}

/// Signed stock adjustment, clamped at zero.
pub async fn adjust_quantity(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<InventoryItem>, (StatusCode, String)> {
    user.require(Capability::ManageInventory)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let item: InventoryItem = inventory_items::table
        .find(id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Inventory item not found".to_string()))?;

    let new_quantity = (item.quantity + req.delta).max(0);
    diesel::update(inventory_items::table.filter(inventory_items::id.eq(id)))
        .set(inventory_items::quantity.eq(new_quantity))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;

    get_item(State(state), user, Path(id)).await
}

pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    user.require(Capability::ManageInventory)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let removed = diesel::delete(inventory_items::table.filter(inventory_items::id.eq(id)))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    if removed == 0 {
        return Err((StatusCode::NOT_FOUND, "Inventory item not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_inventory_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/inventory", get(list_items).post(create_item))
        .route(
            "/api/inventory/:id",
            get(get_item).put(update_item).delete(delete_item),
        )
        .route("/api/inventory/:id/adjust", post(adjust_quantity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, manufacturer: &str, sku: &str, quantity: i32, min: i32) -> InventoryItem {
        InventoryItem {
            id: Uuid::new_v4(),
            name: name.to_string(),
            manufacturer: Some(manufacturer.to_string()),
            sku: Some(sku.to_string()),
            bin_location: None,
            quantity,
            min_quantity: min,
            price: None,
            cost: None,
            supplier: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn search_is_case_insensitive_over_three_fields() {
        let belt = item("Drive Belt", "Miele", "MB-220", 5, 2);
        assert!(matches_search(&belt, "drive"));
        assert!(matches_search(&belt, "MIELE"));
        assert!(matches_search(&belt, "mb-2"));
        assert!(!matches_search(&belt, "dyson"));
        assert!(matches_search(&belt, "  "));
    }

    #[test]
    fn stock_states_are_disjoint() {
        let out = item("Bag", "Generic", "B-1", 0, 3);
        let low = item("Belt", "Generic", "B-2", 2, 3);
        let ok = item("Filter", "Generic", "B-3", 9, 3);
        assert!(out.is_out_of_stock() && !out.is_low_stock());
        assert!(low.is_low_stock() && !low.is_out_of_stock());
        assert!(!ok.is_low_stock() && !ok.is_out_of_stock());
    }

    #[test]
    fn search_intersects_with_stock_tab() {
        let items = vec![
            item("Drive Belt", "Miele", "MB-220", 0, 2),
            item("Drive Belt XL", "Dyson", "DB-9", 8, 2),
            item("HEPA Filter", "Miele", "HF-1", 0, 1),
        ];
        let result = apply_filters(items, Some("belt"), Some(StockFilter::Out));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].sku.as_deref(), Some("MB-220"));
    }

    #[test]
    fn no_filters_returns_everything() {
        let items = vec![
            item("A", "m", "s", 1, 1),
            item("B", "m", "s", 0, 1),
        ];
        assert_eq!(apply_filters(items, None, None).len(), 2);
    }
}
