//! Order submission snapshot and the shapes the Order service returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::aggregates::{CartItem, Variant};
use crate::domain::value_objects::{AddressCode, CouponCode, Money};
use crate::pricing::OrderTotals;

/// Shipping address as typed by the shopper, before the area codes are resolved.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct ShippingAddressInput {
    #[validate(custom = "required")]
    pub full_name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(email(message = "email is malformed"))]
    #[serde(default)]
    pub email: Option<String>,
    #[validate(custom = "required")]
    pub street: String,
    #[validate(custom = "required")]
    pub province_code: String,
    #[validate(custom = "required")]
    pub district_code: String,
    #[validate(custom = "required")]
    pub ward_code: String,
    #[serde(default)]
    pub postal_code: Option<String>,
}

/// Blank counts as missing: values are trimmed once the address resolves.
fn required(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() { Err(ValidationError::new("required")) } else { Ok(()) }
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let phone = phone.trim();
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    let ok = (9..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit());
    if ok { Ok(()) } else { Err(ValidationError::new("phone")) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub code: AddressCode,
    pub name: String,
}

/// Address whose province, district and ward were all found in the directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub street: String,
    pub province: Region,
    pub district: Region,
    pub ward: Region,
    pub postal_code: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[serde(rename = "cod")]
    CashOnDelivery,
    BankTransfer,
    Wallet,
}

/// Wire shape of the shipping address inside an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddressPayload {
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub district: String,
    pub ward: String,
    pub province_code: AddressCode,
    pub district_code: AddressCode,
    pub ward_code: AddressCode,
    pub postal_code: Option<String>,
}

impl From<&ResolvedAddress> for ShippingAddressPayload {
    fn from(a: &ResolvedAddress) -> Self {
        Self {
            full_name: a.full_name.clone(), phone: a.phone.clone(), address: a.street.clone(),
            city: a.province.name.clone(), district: a.district.name.clone(), ward: a.ward.name.clone(),
            province_code: a.province.code.clone(), district_code: a.district.code.clone(),
            ward_code: a.ward.code.clone(), postal_code: a.postal_code.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub product_name: String,
    pub product_image: Option<String>,
    pub price: Money,
    pub quantity: u32,
    pub subtotal: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
}

impl From<&CartItem> for OrderLine {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id.clone(), product_name: item.name.clone(), product_image: item.image.clone(),
            price: item.effective_price(), quantity: item.quantity, subtotal: item.line_total(), variant: item.variant.clone(),
        }
    }
}

/// The single atomic snapshot posted to the Order service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmission {
    pub items: Vec<OrderLine>,
    pub shipping_address: ShippingAddressPayload,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<CouponCode>,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
    #[serde(default)]
    pub note: String,
}

impl OrderSubmission {
    pub fn new(
        items: &[CartItem],
        address: &ResolvedAddress,
        payment_method: PaymentMethod,
        coupon_code: Option<CouponCode>,
        totals: &OrderTotals,
    ) -> Self {
        Self {
            items: items.iter().map(OrderLine::from).collect(),
            shipping_address: address.into(),
            payment_method,
            coupon_code,
            subtotal: totals.subtotal,
            shipping_fee: totals.shipping_fee,
            tax: totals.tax,
            discount: totals.discount,
            total: totals.total,
            note: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipping, Delivered, Cancelled }

/// Order record created by the Order service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatedOrder {
    #[serde(alias = "_id")]
    pub id: String,
    pub order_number: String,
    #[serde(default)]
    pub status: OrderStatus,
    pub total: Money,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> ShippingAddressInput {
        ShippingAddressInput {
            full_name: "Nguyễn Văn A".into(), phone: "0912345678".into(), email: None, street: "123 Đường ABC".into(),
            province_code: "01".into(), district_code: "001".into(), ward_code: "1".into(), postal_code: None,
        }
    }

    #[test]
    fn test_address_validation() {
        assert!(input().validate().is_ok());
        let mut missing = input();
        missing.street = String::new();
        missing.phone = "12ab".into();
        let errors = missing.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("street"));
        assert!(fields.contains_key("phone"));
    }

    #[test]
    fn test_blank_fields_count_as_missing() {
        let mut blank = input();
        blank.full_name = "   ".into();
        blank.street = "\t ".into();
        blank.ward_code = " ".into();
        let errors = blank.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("full_name"));
        assert!(fields.contains_key("street"));
        assert!(fields.contains_key("ward_code"));

        let mut padded = input();
        padded.phone = " 0912345678 ".into();
        assert!(padded.validate().is_ok());
    }

    #[test]
    fn test_payment_method_wire_names() {
        assert_eq!(serde_json::to_string(&PaymentMethod::CashOnDelivery).unwrap(), "\"cod\"");
        assert_eq!(serde_json::to_string(&PaymentMethod::BankTransfer).unwrap(), "\"bank_transfer\"");
        let wallet: PaymentMethod = serde_json::from_str("\"wallet\"").unwrap();
        assert_eq!(wallet, PaymentMethod::Wallet);
    }
}
