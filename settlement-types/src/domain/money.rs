//! Type-safe monetary value with embedded currency.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::DomainError;

/// Currencies supported by the settlement core.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    INR,
}

impl Currency {
    /// Returns the currency symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::INR => "₹",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "INR" => Ok(Currency::INR),
            _ => Err(DomainError::UnsupportedCurrency(s.to_string())),
        }
    }
}

/// Signed money amount with embedded currency.
///
/// Amount is stored in the smallest unit of the currency (cents, paise, etc.)
/// to avoid floating-point precision issues. Negative amounts are debits
/// and mirror-signed reversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    /// Creates a new Money value. Zero is allowed here; callers that need a
    /// non-zero movement use [`Money::non_zero`].
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Creates a Money value that represents an actual movement of funds.
    ///
    /// `i64::MIN` is rejected: it has no mirror-signed counterpart, so it
    /// could never be reversed.
    pub fn non_zero(amount: i64, currency: Currency) -> Result<Self, DomainError> {
        if amount == 0 {
            return Err(DomainError::InvalidAmount("Amount cannot be zero".into()));
        }
        if amount == i64::MIN {
            return Err(DomainError::InvalidAmount("Amount out of range".into()));
        }
        Ok(Self { amount, currency })
    }

    /// Creates a strictly positive Money value (payments, refunds).
    pub fn positive(amount: i64, currency: Currency) -> Result<Self, DomainError> {
        if amount <= 0 {
            return Err(DomainError::InvalidAmount(
                "Amount must be positive".into(),
            ));
        }
        Ok(Self { amount, currency })
    }

    /// Returns the amount in smallest currency unit.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Returns the currency.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Same magnitude, opposite sign. Fails for `i64::MIN`.
    pub fn negated(&self) -> Result<Money, DomainError> {
        let amount = self
            .amount
            .checked_neg()
            .ok_or_else(|| DomainError::InvalidAmount("Amount cannot be negated".into()))?;
        Ok(Money {
            amount,
            currency: self.currency,
        })
    }

    /// Checked addition - returns error if currencies don't match or on overflow.
    pub fn checked_add(&self, other: Money) -> Result<Money, DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency,
                got: other.currency,
            });
        }
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::InvalidAmount("Amount overflow".into()))?;
        Ok(Money {
            amount,
            currency: self.currency,
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        write!(
            f,
            "{}{}{}.{:02}",
            sign,
            self.currency.symbol(),
            abs / 100,
            abs % 100
        )
    }
}
