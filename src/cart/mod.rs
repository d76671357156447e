//! Cart state and total derivation.
//!
//! Totals are never stored: they are a pure function of the current item
//! snapshot, the fixed tax rate, and the selected delivery option, recomputed
//! on every mutation. The same function is what the checkout path uses, so
//! client and server arithmetic cannot drift apart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single line in the shopper's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// One entry of the closed delivery catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySelection {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub delivery_price: Decimal,
}

impl From<crate::entities::delivery_option::Model> for DeliverySelection {
    fn from(model: crate::entities::delivery_option::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            delivery_price: model.delivery_price,
        }
    }
}

/// Derived totals. `total == subtotal + tax + delivery_cost` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub delivery_cost: Decimal,
    pub total: Decimal,
}

impl CartTotals {
    pub const ZERO: CartTotals = CartTotals {
        subtotal: Decimal::ZERO,
        tax: Decimal::ZERO,
        delivery_cost: Decimal::ZERO,
        total: Decimal::ZERO,
    };
}

/// Computes cart totals from a snapshot of items, the fixed tax rate, and the
/// delivery surcharge. Pure and total: an empty cart yields all zeros, and a
/// missing delivery cost must be coalesced to zero by the caller.
pub fn compute_totals(items: &[CartItem], tax_rate: Decimal, delivery_cost: Decimal) -> CartTotals {
    let subtotal: Decimal = items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum();
    let tax = (subtotal * tax_rate).round_dp(2);
    let total = subtotal + tax + delivery_cost;

    CartTotals {
        subtotal,
        tax,
        delivery_cost,
        total,
    }
}

/// Explicit cart state container. Callers hold one per shopper session and
/// pass it by reference; the engine itself stays a pure function over the
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartState {
    items: Vec<CartItem>,
    tax_rate: Decimal,
    delivery: Option<DeliverySelection>,
}

impl CartState {
    pub fn new(tax_rate: Decimal) -> Self {
        Self {
            items: Vec::new(),
            tax_rate,
            delivery: None,
        }
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn delivery(&self) -> Option<&DeliverySelection> {
        self.delivery.as_ref()
    }

    /// Adds a product to the cart, merging quantity into an existing line.
    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|line| line.product_id == item.product_id)
        {
            existing.quantity += item.quantity.max(1);
        } else {
            let mut item = item;
            item.quantity = item.quantity.max(1);
            self.items.push(item);
        }
    }

    pub fn remove_item(&mut self, product_id: Uuid) {
        self.items.retain(|line| line.product_id != product_id);
    }

    pub fn increment(&mut self, product_id: Uuid) {
        if let Some(line) = self
            .items
            .iter_mut()
            .find(|line| line.product_id == product_id)
        {
            line.quantity += 1;
        }
    }

    /// Decrements a line's quantity. Quantity never goes below zero; a line
    /// reaching zero is removed from the cart entirely.
    pub fn decrement(&mut self, product_id: Uuid) {
        if let Some(pos) = self
            .items
            .iter()
            .position(|line| line.product_id == product_id)
        {
            if self.items[pos].quantity <= 1 {
                self.items.remove(pos);
            } else {
                self.items[pos].quantity -= 1;
            }
        }
    }

    pub fn select_delivery(&mut self, selection: DeliverySelection) {
        self.delivery = Some(selection);
    }

    /// Current totals. Delivery cost defaults to zero until an option is
    /// loaded so the total is always a well-defined number.
    pub fn totals(&self) -> CartTotals {
        let delivery_cost = self
            .delivery
            .as_ref()
            .map(|d| d.delivery_price)
            .unwrap_or(Decimal::ZERO);
        compute_totals(&self.items, self.tax_rate, delivery_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(price: Decimal, quantity: i32) -> CartItem {
        CartItem {
            product_id: Uuid::new_v4(),
            name: "Test product".to_string(),
            description: None,
            image_url: None,
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn empty_cart_totals_are_zero() {
        let totals = compute_totals(&[], dec!(0.19), Decimal::ZERO);
        assert_eq!(totals, CartTotals::ZERO);
    }

    #[test]
    fn totals_match_reference_scenario() {
        // 2 x 10 + 1 x 5 at 19% tax with a 5.00 delivery surcharge.
        let items = vec![item(dec!(10), 2), item(dec!(5), 1)];
        let totals = compute_totals(&items, dec!(0.19), dec!(5));

        assert_eq!(totals.subtotal, dec!(25));
        assert_eq!(totals.tax, dec!(4.75));
        assert_eq!(totals.delivery_cost, dec!(5));
        assert_eq!(totals.total, dec!(34.75));
    }

    #[test]
    fn total_invariant_holds_for_odd_rates() {
        let items = vec![item(dec!(3.33), 3)];
        let totals = compute_totals(&items, dec!(0.07), dec!(2.50));

        assert_eq!(totals.tax, (totals.subtotal * dec!(0.07)).round_dp(2));
        assert_eq!(
            totals.total,
            totals.subtotal + totals.tax + totals.delivery_cost
        );
    }

    #[test]
    fn tax_rounds_to_two_decimal_places() {
        // 9.99 * 0.19 = 1.8981 -> 1.90
        let items = vec![item(dec!(9.99), 1)];
        let totals = compute_totals(&items, dec!(0.19), Decimal::ZERO);
        assert_eq!(totals.tax, dec!(1.90));
    }

    #[test]
    fn missing_delivery_defaults_to_zero() {
        let mut cart = CartState::new(dec!(0.19));
        cart.add_item(item(dec!(10), 1));

        let totals = cart.totals();
        assert_eq!(totals.delivery_cost, Decimal::ZERO);
        assert_eq!(totals.total, totals.subtotal + totals.tax);
    }

    #[test]
    fn add_item_merges_existing_line() {
        let mut cart = CartState::new(dec!(0.19));
        let line = item(dec!(10), 1);
        let product_id = line.product_id;
        cart.add_item(line.clone());
        cart.add_item(CartItem {
            quantity: 2,
            ..line
        });

        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].product_id, product_id);
        assert_eq!(cart.items()[0].quantity, 3);
    }

    #[test]
    fn decrement_floors_at_zero_and_removes_line() {
        let mut cart = CartState::new(dec!(0.19));
        let line = item(dec!(4), 2);
        let product_id = line.product_id;
        cart.add_item(line);

        cart.decrement(product_id);
        assert_eq!(cart.items()[0].quantity, 1);

        cart.decrement(product_id);
        assert!(cart.is_empty());

        // Decrementing an absent line is a no-op, never negative.
        cart.decrement(product_id);
        assert!(cart.is_empty());
        assert_eq!(cart.totals(), CartTotals::ZERO);
    }

    #[test]
    fn totals_track_mutation_sequence() {
        let mut cart = CartState::new(dec!(0.19));
        let a = item(dec!(10), 1);
        let b = item(dec!(5), 1);
        let a_id = a.product_id;
        cart.add_item(a);
        cart.add_item(b);
        cart.increment(a_id);

        cart.select_delivery(DeliverySelection {
            id: Uuid::new_v4(),
            name: "Standard".to_string(),
            description: "3-5 days".to_string(),
            delivery_price: dec!(5),
        });

        let totals = cart.totals();
        assert_eq!(totals.subtotal, dec!(25));
        assert_eq!(totals.tax, dec!(4.75));
        assert_eq!(totals.total, dec!(34.75));

        cart.remove_item(a_id);
        let totals = cart.totals();
        assert_eq!(totals.subtotal, dec!(5));
        assert_eq!(totals.total, dec!(5) + dec!(0.95) + dec!(5));
    }
}
