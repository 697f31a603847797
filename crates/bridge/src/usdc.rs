//! USDC amounts with 6-decimal on-chain precision.

use std::fmt::Display;
use std::ops::{Add, Sub};
use std::str::FromStr;

use alloy::primitives::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Decimals of the USDC token on every supported chain.
pub const USDC_DECIMALS: u32 = 6;

const MICRO_PER_USDC: u64 = 1_000_000;

/// Smallest representable difference (1 micro-USDC).
pub const BALANCE_TOLERANCE: Usdc = Usdc(Decimal::from_parts(1, 0, 0, false, USDC_DECIMALS));

/// Allowed drift between the requested amount and the observed balance
/// decrement after a burn (0.001 USDC).
pub const VERIFICATION_TOLERANCE: Usdc = Usdc(Decimal::from_parts(1, 0, 0, false, 3));

/// A USDC amount in whole-dollar units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Usdc(pub Decimal);

impl Usdc {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Converts to the token's integer representation (micro-USDC).
    ///
    /// Rejects negative amounts and amounts with more than six decimals.
    pub fn to_micro(self) -> Result<U256, UsdcConversionError> {
        if self.0.is_sign_negative() && !self.0.is_zero() {
            return Err(UsdcConversionError::Negative(self));
        }

        let scaled = self
            .0
            .checked_mul(Decimal::from(MICRO_PER_USDC))
            .ok_or(UsdcConversionError::Overflow)?;

        if !scaled.fract().is_zero() {
            return Err(UsdcConversionError::TooPrecise(self));
        }

        let micro = scaled.to_u128().ok_or(UsdcConversionError::Overflow)?;

        Ok(U256::from(micro))
    }

    /// Converts a micro-USDC integer back to a decimal amount.
    pub fn from_micro(micro: U256) -> Result<Self, UsdcConversionError> {
        let value = i128::try_from(micro).map_err(|_| UsdcConversionError::Overflow)?;

        Decimal::try_from_i128_with_scale(value, USDC_DECIMALS)
            .map(|decimal| Self(decimal.normalize()))
            .map_err(|_| UsdcConversionError::Overflow)
    }

    pub fn abs_diff(self, other: Self) -> Self {
        Self((self.0 - other.0).abs())
    }

    /// True when the two amounts differ by at most `tolerance`.
    pub fn abs_diff_within(self, other: Self, tolerance: Self) -> bool {
        self.abs_diff(other) <= tolerance
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Usdc {
    type Err = rust_decimal::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(value.trim()).map(Self)
    }
}

impl Display for Usdc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Usdc {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Usdc {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsdcConversionError {
    #[error("USDC amount cannot be negative: {0}")]
    Negative(Usdc),
    #[error("USDC amount {0} has more than 6 decimal places")]
    TooPrecise(Usdc),
    #[error("USDC amount out of range")]
    Overflow,
}
