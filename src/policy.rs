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

//! Tax and platform-fee policy.
//!
//! Pure functions of (jurisdiction, billable days, rental charge): no hidden
//! state, no clock. Taxes come from a pluggable [`TaxPolicy`] (the tax-table
//! collaborator); the platform fee from a [`FeeSchedule`] in basis points.
//! Both truncate toward zero, consistent with the rest of the money paths.

use crate::base::Jurisdiction;
use crate::error::EngineError;
use crate::money::UsdCents;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Computes the tax owed on a rental.
///
/// `rental` is the full daily total (price × billable days) in USD cents;
/// the result is fixed into the trip's pricing at request time and never
/// recomputed.
pub trait TaxPolicy: Send + Sync {
    fn tax_for(
        &self,
        jurisdiction: &Jurisdiction,
        days: u64,
        rental: UsdCents,
    ) -> Result<UsdCents, EngineError>;
}

/// One jurisdiction's tax formula: a percentage of the rental charge plus a
/// flat per-day government fee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaxRule {
    /// Sales-tax portion in basis points (700 = 7%).
    pub rate_bps: u32,
    /// Flat fee charged per billable day, in USD cents.
    pub per_day_cents: UsdCents,
}

impl TaxRule {
    pub fn tax(&self, days: u64, rental: UsdCents) -> Result<UsdCents, EngineError> {
        let percentage = rental.scale_bps(self.rate_bps)?;
        let per_day = self.per_day_cents.checked_mul(days)?;
        percentage.checked_add(per_day)
    }
}

/// In-memory tax table keyed by jurisdiction, with an optional fallback rule.
///
/// A jurisdiction with no entry and no fallback owes zero tax; the engine
/// does not guess.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaxTable {
    rules: HashMap<Jurisdiction, TaxRule>,
    default_rule: Option<TaxRule>,
}

impl TaxTable {
    pub fn new() -> Self {
        TaxTable::default()
    }

    pub fn with_default(default_rule: TaxRule) -> Self {
        TaxTable {
            rules: HashMap::new(),
            default_rule: Some(default_rule),
        }
    }

    pub fn set_rule(&mut self, jurisdiction: Jurisdiction, rule: TaxRule) {
        self.rules.insert(jurisdiction, rule);
    }

    pub fn rule_for(&self, jurisdiction: &Jurisdiction) -> Option<TaxRule> {
        self.rules.get(jurisdiction).copied().or(self.default_rule)
    }
}

impl TaxPolicy for TaxTable {
    fn tax_for(
        &self,
        jurisdiction: &Jurisdiction,
        days: u64,
        rental: UsdCents,
    ) -> Result<UsdCents, EngineError> {
        match self.rule_for(jurisdiction) {
            Some(rule) => rule.tax(days, rental),
            None => Ok(UsdCents::ZERO),
        }
    }
}

/// Platform fee schedule in basis points of the rental charge.
///
/// The fee is charged to the guest as a pricing line item at request time.
/// At settlement the platform leg is computed last from the remaining
/// integer amount, so the platform also absorbs truncation remainders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeeSchedule {
    pub platform_fee_bps: u32,
}

impl FeeSchedule {
    /// A schedule above 100% can never settle cleanly and is rejected.
    pub fn new(platform_fee_bps: u32) -> Result<Self, EngineError> {
        let schedule = FeeSchedule { platform_fee_bps };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.platform_fee_bps > 10_000 {
            return Err(EngineError::InvalidFee);
        }
        Ok(())
    }

    pub fn platform_fee(&self, rental: UsdCents) -> Result<UsdCents, EngineError> {
        self.validate()?;
        rental.scale_bps(self.platform_fee_bps)
    }
}

impl Default for FeeSchedule {
    /// 10% of the rental charge.
    fn default() -> Self {
        FeeSchedule {
            platform_fee_bps: 1_000,
        }
    }
}
