// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fixed-point money and currency conversion.
//!
//! All accounting happens in integer USD cents ([`UsdCents`]); settlement
//! value moves in integer minor units of a [`Currency`] (wei for ETH, micro
//! units for USDC). Conversion between the two uses a [`RateSnapshot`] locked
//! at request time, with one rounding policy everywhere: division truncates
//! toward zero. The remainder that truncation sheds is absorbed by the
//! platform leg, which is computed last from the remaining integer amount.
//!
//! # Example
//!
//! ```
//! use trip_ledger_rs::{Currency, RateSnapshot, UsdCents};
//!
//! // ETH at $2,000.00, oracle feed scaled by 10^8.
//! let rate = RateSnapshot { rate: 200_000_000_000, decimals: 8 };
//! let wei = rate.usd_to_minor(UsdCents(1_700), Currency::Eth).unwrap();
//! assert_eq!(wei, 8_500_000_000_000_000); // 0.0085 ETH
//! assert_eq!(rate.minor_to_usd(wei, Currency::Eth).unwrap(), UsdCents(1_700));
//! ```

use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monetary amount in integer USD cents.
///
/// Wraps a `u64`; amounts are never negative. Arithmetic is checked and
/// surfaces [`EngineError::AmountOverflow`] rather than wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UsdCents(pub u64);

impl UsdCents {
    pub const ZERO: UsdCents = UsdCents(0);

    #[inline]
    pub const fn cents(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: UsdCents) -> Result<UsdCents, EngineError> {
        self.0
            .checked_add(other.0)
            .map(UsdCents)
            .ok_or(EngineError::AmountOverflow)
    }

    pub fn checked_mul(self, n: u64) -> Result<UsdCents, EngineError> {
        self.0
            .checked_mul(n)
            .map(UsdCents)
            .ok_or(EngineError::AmountOverflow)
    }

    /// Scales by basis points (`bps / 10_000`), truncating toward zero.
    ///
    /// Used for percentage fees and taxes: `UsdCents(1000).scale_bps(1000)`
    /// is 10% of $10.00, i.e. `UsdCents(100)`.
    pub fn scale_bps(self, bps: u32) -> Result<UsdCents, EngineError> {
        let scaled = (self.0 as u128) * (bps as u128) / 10_000;
        u64::try_from(scaled)
            .map(UsdCents)
            .map_err(|_| EngineError::AmountOverflow)
    }

    /// Exact decimal rendering in dollars, e.g. `UsdCents(1700)` → `17.00`.
    pub fn to_decimal(self) -> Decimal {
        // Any u64 fits a 96-bit Decimal mantissa at scale 2.
        Decimal::from_i128_with_scale(self.0 as i128, 2)
    }
}

impl fmt::Display for UsdCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Settlement currencies the engine accepts payment in.
///
/// USD itself is accepted at a parity rate; the others are volatile and
/// require an oracle feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Usd,
    Usdc,
    Eth,
}

impl Currency {
    /// Number of decimal places in this currency's minor unit
    /// (cents, micro units, wei).
    pub const fn minor_decimals(self) -> u8 {
        match self {
            Currency::Usd => 2,
            Currency::Usdc => 6,
            Currency::Eth => 18,
        }
    }

    /// Exact decimal rendering of `minor` units in whole-currency terms.
    ///
    /// Returns `None` when the amount exceeds what a `Decimal` mantissa can
    /// carry; callers fall back to the raw integer.
    pub fn to_decimal(self, minor: u128) -> Option<Decimal> {
        let mantissa = i128::try_from(minor).ok()?;
        Decimal::try_from_i128_with_scale(mantissa, self.minor_decimals() as u32).ok()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::Usd => "USD",
            Currency::Usdc => "USDC",
            Currency::Eth => "ETH",
        };
        write!(f, "{code}")
    }
}

/// A conversion rate fixed at request time.
///
/// `rate` is the USD price of one whole unit of the settlement currency,
/// scaled by `10^decimals` (the convention of oracle price feeds). Once a
/// snapshot is attached to a trip it never changes; later movements in the
/// live rate do not affect in-flight trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateSnapshot {
    pub rate: u64,
    pub decimals: u8,
}

impl RateSnapshot {
    /// Parity snapshot for a stable currency: one whole unit equals one USD.
    pub const fn parity() -> Self {
        RateSnapshot { rate: 1, decimals: 0 }
    }

    /// Converts USD cents into minor units of `currency`, truncating toward
    /// zero.
    ///
    ///   minor = cents × 10^minor_decimals × 10^decimals / (rate × 100)
    ///
    /// The snapshot's rate must be nonzero; the engine rejects zero-rate
    /// snapshots with `RateUnavailable` before one can reach here.
    pub fn usd_to_minor(&self, amount: UsdCents, currency: Currency) -> Result<u128, EngineError> {
        let numerator = pow10(currency.minor_decimals())
            .and_then(|m| (amount.0 as u128).checked_mul(m))
            .and_then(|v| pow10(self.decimals).and_then(|d| v.checked_mul(d)))
            .ok_or(EngineError::AmountOverflow)?;
        let divisor = (self.rate as u128)
            .checked_mul(100)
            .ok_or(EngineError::AmountOverflow)?;
        numerator.checked_div(divisor).ok_or(EngineError::AmountOverflow)
    }

    /// Converts minor units of `currency` back into USD cents, truncating
    /// toward zero. Reporting aid; settlement never round-trips.
    pub fn minor_to_usd(&self, minor: u128, currency: Currency) -> Result<UsdCents, EngineError> {
        let numerator = minor
            .checked_mul(self.rate as u128)
            .and_then(|v| v.checked_mul(100))
            .ok_or(EngineError::AmountOverflow)?;
        let divisor = pow10(currency.minor_decimals())
            .and_then(|m| pow10(self.decimals).and_then(|d| m.checked_mul(d)))
            .ok_or(EngineError::AmountOverflow)?;
        let cents = numerator.checked_div(divisor).ok_or(EngineError::AmountOverflow)?;
        u64::try_from(cents)
            .map(UsdCents)
            .map_err(|_| EngineError::AmountOverflow)
    }
}

#[inline]
fn pow10(exp: u8) -> Option<u128> {
    10u128.checked_pow(exp as u32)
}

/// Supplies the current conversion rate for a settlement currency.
///
/// Implemented by the oracle adapter collaborator. `None` means no feed is
/// available and surfaces to callers as [`EngineError::RateUnavailable`].
pub trait RateOracle: Send + Sync {
    fn rate_for(&self, currency: Currency) -> Option<RateSnapshot>;
}

/// In-memory oracle with explicitly set rates.
///
/// The test and CLI collaborator: rates are registered up front (or updated
/// live) and served unchanged. USD is pre-registered at parity.
#[derive(Debug, Default)]
pub struct FixedRateOracle {
    rates: dashmap::DashMap<Currency, RateSnapshot>,
}

impl FixedRateOracle {
    /// Empty oracle; even USD is unavailable until registered.
    pub fn empty() -> Self {
        FixedRateOracle::default()
    }

    /// Oracle with USD pre-registered at parity.
    pub fn new() -> Self {
        let oracle = FixedRateOracle::default();
        oracle.set_rate(Currency::Usd, RateSnapshot::parity());
        oracle
    }

    pub fn set_rate(&self, currency: Currency, snapshot: RateSnapshot) {
        self.rates.insert(currency, snapshot);
    }
}

impl RateOracle for FixedRateOracle {
    fn rate_for(&self, currency: Currency) -> Option<RateSnapshot> {
        self.rates.get(&currency).map(|r| *r)
    }
}
