//! Value Objects for the storefront

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

/// Coupon code value object, canonicalized to trimmed uppercase.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CouponCode(String);

impl CouponCode {
    pub fn new(value: impl Into<String>) -> Result<Self, CouponCodeError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(CouponCodeError::Empty); }
        if value.len() > 50 { return Err(CouponCodeError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for CouponCode {
    type Error = CouponCodeError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<CouponCode> for String {
    fn from(code: CouponCode) -> Self { code.0 }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponCodeError {
    #[error("Coupon code is empty")]
    Empty,
    #[error("Coupon code is too long")]
    TooLong,
}

/// Money value object.
///
/// The storefront sells in a single market (Vietnamese đồng), so the currency is
/// implied. Amounts keep full decimal precision; rounding is a display concern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn vnd(amount: i64) -> Self { Self(Decimal::from(amount)) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_zero(&self) -> bool { self.0.is_zero() }
    pub fn is_positive(&self) -> bool { self.0 > Decimal::ZERO }
    pub fn multiply(&self, qty: u32) -> Money { Money(self.0.saturating_mul(Decimal::from(qty))) }

    /// `rate` percent of this amount.
    pub fn percent(&self, rate: Decimal) -> Money { Money(self.0 * rate / Decimal::ONE_HUNDRED) }

    pub fn saturating_sub(self, other: Money) -> Money {
        if other.0 >= self.0 { Money::ZERO } else { Money(self.0 - other.0) }
    }

    /// Clamps into `[0, ceiling]`.
    pub fn clamp_to(self, ceiling: Money) -> Money {
        self.max(Money::ZERO).min(ceiling.max(Money::ZERO))
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money { Money(self.0 + rhs.0) }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money { Money(self.0 - rhs.0) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, |acc, m| Money(acc.0.saturating_add(m.0))) }
}

impl fmt::Display for Money {
    /// Formats as `1.234.567 ₫`, the storefront's display convention.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounded = self.0.round();
        let digits = rounded.abs().trunc().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 { grouped.push('.'); }
            grouped.push(ch);
        }
        let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
        write!(f, "{sign}{grouped} ₫")
    }
}

/// Level of the province → district → ward hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressLevel { Province, District, Ward }

impl AddressLevel {
    /// Width of the zero-padded numeric code at this level.
    pub fn code_width(self) -> usize {
        match self { Self::Province => 2, Self::District => 3, Self::Ward => 5 }
    }
}

/// Administrative area code.
///
/// Live lookups return zero-padded strings while the bundled table mixes strings and
/// bare numbers. Numeric codes are always stored zero-padded to the level width, so
/// `"1"`, `"01"` and `1` name the same province. Non-numeric codes are kept trimmed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressCode(String);

impl AddressCode {
    pub fn normalize(level: AddressLevel, raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            let significant = trimmed.trim_start_matches('0');
            let significant = if significant.is_empty() { "0" } else { significant };
            return Self(format!("{significant:0>width$}", width = level.code_width()));
        }
        Self(trimmed.to_string())
    }

    pub fn numeric(level: AddressLevel, value: u64) -> Self {
        Self(format!("{value:0>width$}", width = level.code_width()))
    }

    pub fn as_str(&self) -> &str { &self.0 }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for AddressCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coupon_code() {
        let code = CouponCode::new("  save10 ").unwrap();
        assert_eq!(code.as_str(), "SAVE10");
        assert_eq!(CouponCode::new("   "), Err(CouponCodeError::Empty));
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::vnd(100_000);
        let b = Money::vnd(30_000);
        assert_eq!((a + b).amount(), Decimal::from(130_000));
        assert_eq!(b.saturating_sub(a), Money::ZERO);
        assert_eq!(a.percent(Decimal::from(10)), Money::vnd(10_000));
        assert_eq!(Money::vnd(50_000).clamp_to(Money::vnd(30_000)), Money::vnd(30_000));
        assert_eq!(Money::vnd(-5).clamp_to(Money::vnd(30_000)), Money::ZERO);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::vnd(5_400_000).to_string(), "5.400.000 ₫");
        assert_eq!(Money::vnd(230).to_string(), "230 ₫");
        assert_eq!(Money::ZERO.to_string(), "0 ₫");
    }

    #[test]
    fn test_address_code_normalization() {
        let padded = AddressCode::normalize(AddressLevel::Province, "01");
        assert_eq!(padded, AddressCode::normalize(AddressLevel::Province, "1"));
        assert_eq!(padded, AddressCode::numeric(AddressLevel::Province, 1));
        assert_eq!(AddressCode::normalize(AddressLevel::District, "760").as_str(), "760");
        assert_eq!(AddressCode::normalize(AddressLevel::Ward, "4").as_str(), "00004");
        assert_eq!(AddressCode::normalize(AddressLevel::Ward, " HN-01 ").as_str(), "HN-01");
    }
}
