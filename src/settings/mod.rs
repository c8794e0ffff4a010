use crate::auth::session::CurrentUser;
use crate::estimates::calc::default_tax_rate;
use crate::roles::Capability;
use crate::shared::schema::shop_settings;
use crate::shared::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// The settings table is a singleton; every read and write targets this
/// fixed row id.
pub const SETTINGS_ID: Uuid = Uuid::nil();

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = shop_settings)]
pub struct ShopSettings {
    pub id: Uuid,
    pub tax_rate: BigDecimal,
    pub default_labor_rate: BigDecimal,
    pub shop_name: String,
    pub shop_phone: String,
    pub shop_email: String,
    pub shop_address: Option<String>,
    pub quick_replies: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Canned message shown in the staff reply picker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuickReply {
    pub label: String,
    pub body: String,
}

impl ShopSettings {
    fn defaults() -> Self {
        Self {
            id: SETTINGS_ID,
            tax_rate: default_tax_rate(),
            default_labor_rate: BigDecimal::from(0),
            shop_name: String::new(),
            shop_phone: String::new(),
            shop_email: String::new(),
            shop_address: None,
            quick_replies: serde_json::Value::Array(vec![]),
            updated_at: Utc::now(),
        }
    }

    pub fn quick_reply_list(&self) -> Vec<QuickReply> {
        serde_json::from_value(self.quick_replies.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub tax_rate: Option<BigDecimal>,
    pub default_labor_rate: Option<BigDecimal>,
    pub shop_name: Option<String>,
    pub shop_phone: Option<String>,
    pub shop_email: Option<String>,
    pub shop_address: Option<String>,
    pub quick_replies: Option<Vec<QuickReply>>,
}

pub fn load(conn: &mut PgConnection) -> ShopSettings {
    shop_settings::table
        .find(SETTINGS_ID)
        .first(conn)
        .unwrap_or_else(|_| ShopSettings::defaults())
}

/// Tax rate used by every estimate-total call site.
pub fn shop_tax_rate(conn: &mut PgConnection) -> BigDecimal {
    load(conn).tax_rate
}

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<ShopSettings>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    Ok(Json(load(&mut conn)))
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<ShopSettings>, (StatusCode, String)> {
    user.require(Capability::ManageSettings)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let mut current = load(&mut conn);
    if let Some(tax_rate) = req.tax_rate {
        current.tax_rate = tax_rate;
    }
    if let Some(default_labor_rate) = req.default_labor_rate {
        current.default_labor_rate = default_labor_rate;
    }
    if let Some(shop_name) = req.shop_name {
        current.shop_name = shop_name;
    }
    if let Some(shop_phone) = req.shop_phone {
        current.shop_phone = shop_phone;
    }
    if let Some(shop_email) = req.shop_email {
        current.shop_email = shop_email;
    }
    if let Some(shop_address) = req.shop_address {
        current.shop_address = Some(shop_address);
    }
    if let Some(quick_replies) = req.quick_replies {
        current.quick_replies = serde_json::to_value(quick_replies)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Bad quick replies: {e}")))?;
    }
    current.updated_at = Utc::now();

    diesel::insert_into(shop_settings::table)
        .values(&current)
        .on_conflict(shop_settings::id)
        .do_update()
        .set((
            shop_settings::tax_rate.eq(&current.tax_rate),
            shop_settings::default_labor_rate.eq(&current.default_labor_rate),
            shop_settings::shop_name.eq(&current.shop_name),
            shop_settings::shop_phone.eq(&current.shop_phone),
            shop_settings::shop_email.eq(&current.shop_email),
            shop_settings::shop_address.eq(&current.shop_address),
            shop_settings::quick_replies.eq(&current.quick_replies),
            shop_settings::updated_at.eq(current.updated_at),
        ))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;

    Ok(Json(load(&mut conn)))
}

pub fn configure_settings_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/settings", get(get_settings).put(update_settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn defaults_carry_seven_percent_tax() {
        let settings = ShopSettings::defaults();
        assert_eq!(settings.tax_rate, BigDecimal::from_str("0.07").unwrap());
        assert!(settings.quick_reply_list().is_empty());
    }

    #[test]
    fn quick_replies_round_trip_through_json() {
        let mut settings = ShopSettings::defaults();
        let replies = vec![QuickReply {
            label: "Ready".to_string(),
            body: "Your machine is ready for pickup.".to_string(),
        }];
        settings.quick_replies = serde_json::to_value(&replies).unwrap();
        assert_eq!(settings.quick_reply_list(), replies);
    }

    #[test]
    fn malformed_quick_replies_degrade_to_empty() {
        let mut settings = ShopSettings::defaults();
        settings.quick_replies = serde_json::json!({"not": "an array"});
        assert!(settings.quick_reply_list().is_empty());
    }
}
