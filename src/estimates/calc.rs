//! The single estimate-total formula.
//!
//! Every surface that shows money (staff detail, public status page,
//! estimate email) calls [`totals`]; the formula exists nowhere else.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, RoundingMode};
use serde::Serialize;

use super::EstimateItem;

/// 7%, applied when the shop settings row carries no rate.
pub fn default_tax_rate() -> BigDecimal {
    BigDecimal::new(BigInt::from(7), 2)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateTotals {
    pub subtotal: BigDecimal,
    pub tax: BigDecimal,
    pub total: BigDecimal,
}

pub fn subtotal(items: &[EstimateItem]) -> BigDecimal {
    items
        .iter()
        .fold(BigDecimal::from(0), |acc, item| {
            acc + &item.part_cost + &item.labor_cost
        })
}

pub fn totals(items: &[EstimateItem], tax_rate: &BigDecimal) -> EstimateTotals {
    let raw_subtotal = subtotal(items);
    let tax = (&raw_subtotal * tax_rate).with_scale_round(2, RoundingMode::HalfUp);
    let subtotal = raw_subtotal.with_scale_round(2, RoundingMode::HalfUp);
    let total = &subtotal + &tax;
    EstimateTotals {
        subtotal,
        tax,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn item(part: &str, labor: &str) -> EstimateItem {
        EstimateItem {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            description: "Brush Roll".to_string(),
            part_cost: BigDecimal::from_str(part).unwrap(),
            labor_cost: BigDecimal::from_str(labor).unwrap(),
            is_approved: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn brush_roll_fixture_at_default_rate() {
        let items = vec![item("20", "15")];
        let result = totals(&items, &default_tax_rate());
        assert_eq!(result.subtotal, BigDecimal::from_str("35.00").unwrap());
        assert_eq!(result.tax, BigDecimal::from_str("2.45").unwrap());
        assert_eq!(result.total, BigDecimal::from_str("37.45").unwrap());
    }

    #[test]
    fn total_is_subtotal_times_one_plus_rate() {
        let items = vec![item("12.50", "30"), item("0", "45.25"), item("3.99", "0")];
        let rate = BigDecimal::from_str("0.085").unwrap();
        let result = totals(&items, &rate);
        let expected = (subtotal(&items) * (BigDecimal::from(1) + &rate))
            .with_scale_round(2, bigdecimal::RoundingMode::HalfUp);
        assert_eq!(result.total, expected);
    }

    #[test]
    fn empty_estimate_is_all_zero() {
        let result = totals(&[], &default_tax_rate());
        assert_eq!(result.subtotal, BigDecimal::from_str("0.00").unwrap());
        assert_eq!(result.total, BigDecimal::from_str("0.00").unwrap());
    }

    #[test]
    fn zero_rate_means_total_equals_subtotal() {
        let items = vec![item("100", "50")];
        let result = totals(&items, &BigDecimal::from(0));
        assert_eq!(result.total, result.subtotal);
    }
}
