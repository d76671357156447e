//! Checkout input resolution and intent construction.
//!
//! A checkout request arrives in one of three mutually exclusive shapes.
//! They are discriminated once, by an explicit precedence function into a
//! tagged union; nothing downstream re-inspects optional fields.

use crate::auth::Identity;
use crate::cart::CartItem;
use crate::entities::order::OrderType;
use crate::errors::ServiceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Raw, overlapping checkout fields as deserialized from the request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutPayload {
    #[serde(default)]
    pub items: Option<Vec<CartItem>>,
    #[serde(default)]
    pub tax: Option<Decimal>,
    #[serde(default)]
    pub delivery_cost: Option<Decimal>,
    #[serde(default)]
    pub price_id: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub package_description: Option<String>,
    #[serde(default)]
    pub package_id: Option<String>,
}

/// Optional service-package descriptors carried into metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageDetails {
    pub name: Option<String>,
    pub description: Option<String>,
    pub package_id: Option<String>,
}

impl PackageDetails {
    fn from_payload(payload: &CheckoutPayload) -> Self {
        Self {
            name: payload.package_name.clone(),
            description: payload.package_description.clone(),
            package_id: payload.package_id.clone(),
        }
    }

    fn is_present(&self) -> bool {
        self.name.is_some() || self.description.is_some() || self.package_id.is_some()
    }
}

/// The three checkout shapes, post-discrimination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutInput {
    /// Full cart: one line per item plus synthetic tax/delivery surcharges.
    Cart {
        items: Vec<CartItem>,
        tax: Decimal,
        delivery_cost: Decimal,
    },
    /// Processor-hosted price reference, quantity 1.
    PriceRef {
        price_id: String,
        package: PackageDetails,
        explicit_order_type: Option<String>,
    },
    /// Ad-hoc dynamically priced line.
    AdHoc {
        price: Decimal,
        name: String,
        package: PackageDetails,
        explicit_order_type: Option<String>,
    },
}

impl CheckoutInput {
    /// Discriminates a payload by precedence: a non-empty `items` array wins,
    /// then `price_id`, then the `(price, name)` pair. Anything else is an
    /// invalid configuration.
    pub fn resolve(payload: CheckoutPayload) -> Result<Self, ServiceError> {
        if let Some(items) = payload.items.clone().filter(|items| !items.is_empty()) {
            return Ok(CheckoutInput::Cart {
                items,
                tax: payload.tax.unwrap_or(Decimal::ZERO),
                delivery_cost: payload.delivery_cost.unwrap_or(Decimal::ZERO),
            });
        }

        let package = PackageDetails::from_payload(&payload);

        if let Some(price_id) = payload.price_id.filter(|id| !id.is_empty()) {
            return Ok(CheckoutInput::PriceRef {
                price_id,
                package,
                explicit_order_type: payload.order_type,
            });
        }

        match (payload.price, payload.name) {
            (Some(price), Some(name)) if !name.is_empty() => Ok(CheckoutInput::AdHoc {
                price,
                name,
                package,
                explicit_order_type: payload.order_type,
            }),
            (Some(_), _) => Err(ServiceError::InvalidCheckoutConfig(
                "ad-hoc checkout requires a name alongside the price".to_string(),
            )),
            (_, Some(_)) => Err(ServiceError::InvalidCheckoutConfig(
                "ad-hoc checkout requires a price alongside the name".to_string(),
            )),
            _ => Err(ServiceError::InvalidCheckoutConfig(
                "request matches none of: cart items, price reference, ad-hoc price".to_string(),
            )),
        }
    }

    fn order_type(&self) -> OrderType {
        match self {
            CheckoutInput::Cart { .. } => OrderType::Cart,
            CheckoutInput::PriceRef {
                package,
                explicit_order_type,
                ..
            }
            | CheckoutInput::AdHoc {
                package,
                explicit_order_type,
                ..
            } => {
                if explicit_order_type.as_deref() == Some("service_package")
                    || package.is_present()
                {
                    OrderType::ServicePackage
                } else {
                    OrderType::Cart
                }
            }
        }
    }
}

/// One line of a checkout intent, already in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentLineItem {
    Priced {
        name: String,
        description: Option<String>,
        unit_amount_minor: i64,
        quantity: i32,
        product_id: Option<Uuid>,
    },
    /// Reference to a price hosted by the processor.
    Reference { price_id: String, quantity: i32 },
}

/// Processor-agnostic description of what is being purchased.
#[derive(Debug, Clone)]
pub struct CheckoutIntent {
    pub currency: String,
    pub line_items: Vec<IntentLineItem>,
    pub order_type: OrderType,
    pub metadata: HashMap<String, String>,
}

impl CheckoutIntent {
    /// Builds an intent from a resolved input and the shopper's identity.
    pub fn build(
        input: CheckoutInput,
        identity: &Identity,
        default_currency: &str,
        requested_currency: Option<String>,
    ) -> Result<Self, ServiceError> {
        let currency = requested_currency
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default_currency.to_string())
            .to_ascii_lowercase();
        let order_type = input.order_type();

        let mut metadata = HashMap::from([
            ("user_id".to_string(), identity.user_id.to_string()),
            (
                "order_type".to_string(),
                match order_type {
                    OrderType::Cart => "cart".to_string(),
                    OrderType::ServicePackage => "service_package".to_string(),
                },
            ),
            (
                "is_anonymous".to_string(),
                identity.is_anonymous.to_string(),
            ),
        ]);

        let line_items = match input {
            CheckoutInput::Cart {
                items,
                tax,
                delivery_cost,
            } => {
                let mut lines = Vec::with_capacity(items.len() + 2);
                for item in items {
                    lines.push(IntentLineItem::Priced {
                        name: item.name,
                        description: item.description,
                        unit_amount_minor: to_minor_units(item.unit_price)?,
                        quantity: item.quantity,
                        product_id: Some(item.product_id),
                    });
                }
                if tax > Decimal::ZERO {
                    lines.push(IntentLineItem::Priced {
                        name: "Tax".to_string(),
                        description: None,
                        unit_amount_minor: to_minor_units(tax)?,
                        quantity: 1,
                        product_id: None,
                    });
                }
                if delivery_cost > Decimal::ZERO {
                    lines.push(IntentLineItem::Priced {
                        name: "Delivery".to_string(),
                        description: None,
                        unit_amount_minor: to_minor_units(delivery_cost)?,
                        quantity: 1,
                        product_id: None,
                    });
                }
                lines
            }
            CheckoutInput::PriceRef {
                price_id, package, ..
            } => {
                attach_package_metadata(&mut metadata, &package);
                vec![IntentLineItem::Reference {
                    price_id,
                    quantity: 1,
                }]
            }
            CheckoutInput::AdHoc {
                price,
                name,
                package,
                ..
            } => {
                attach_package_metadata(&mut metadata, &package);
                vec![IntentLineItem::Priced {
                    name,
                    description: package.description,
                    unit_amount_minor: to_minor_units(price)?,
                    quantity: 1,
                    product_id: None,
                }]
            }
        };

        Ok(Self {
            currency,
            line_items,
            order_type,
            metadata,
        })
    }
}

fn attach_package_metadata(metadata: &mut HashMap<String, String>, package: &PackageDetails) {
    if let Some(name) = &package.name {
        metadata.insert("package_name".to_string(), name.clone());
    }
    if let Some(description) = &package.description {
        metadata.insert("package_description".to_string(), description.clone());
    }
    if let Some(package_id) = &package.package_id {
        metadata.insert("package_id".to_string(), package_id.clone());
    }
}

/// Converts a major-unit decimal amount to minor currency units. Midpoints
/// round away from zero, matching how processors quantize amounts.
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InvalidCheckoutConfig(format!("amount out of range: {}", amount))
        })
}
