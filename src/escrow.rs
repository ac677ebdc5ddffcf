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

//! Escrow custody.
//!
//! One escrow per trip, opened when the guest's payment arrives and closed
//! exactly once, either by a full refund or by a disbursal split. Amounts are
//! minor units of the trip's settlement currency and only ever move between
//! the held pool and payout balances. Nothing here converts currencies; the
//! engine resolves amounts before they reach the ledger.
//!
//! # Example
//!
//! ```
//! use trip_ledger_rs::{AccountId, Currency, EscrowLedger, TripId};
//!
//! let mut ledger = EscrowLedger::new();
//! ledger.open(TripId(1), Currency::Usd, 1700).unwrap();
//! assert_eq!(ledger.held_total(Currency::Usd), 1700);
//!
//! ledger.refund_all(TripId(1), AccountId(7)).unwrap();
//! assert_eq!(ledger.held_total(Currency::Usd), 0);
//! assert_eq!(ledger.balance_of(AccountId(7), Currency::Usd), 1700);
//! ```

use crate::base::{AccountId, TripId};
use crate::error::EngineError;
use crate::money::Currency;
use std::collections::{HashMap, HashSet};

/// What became of an escrow's funds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Funds are in custody awaiting the trip's outcome.
    Held,
    /// Full amount returned to one account.
    Refunded {
        /// Account the refund was credited to.
        to: AccountId,
    },
    /// Amount split across payout legs at settlement.
    Disbursed {
        /// Credited legs, in the order they were applied.
        legs: Vec<(AccountId, u128)>,
    },
}

/// Custody record for a single trip's payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowRecord {
    /// Trip this escrow belongs to.
    pub trip_id: TripId,
    /// Settlement currency of the held amount.
    pub currency: Currency,
    /// Amount received at open, in minor units. Never mutated.
    pub amount: u128,
    /// Outcome of the escrow. Flips away from `Held` exactly once.
    pub disposition: Disposition,
}

impl EscrowRecord {
    /// Funds are still in custody.
    pub fn is_held(&self) -> bool {
        self.disposition == Disposition::Held
    }
}

/// In-memory escrow ledger.
///
/// Holds every escrow record plus two derived views kept in lockstep: the
/// held pool per currency and credited payout balances per account. The
/// engine guards the ledger with its state lock; methods here take `&mut`
/// and validate fully before mutating, so a returned error means nothing
/// moved.
#[derive(Debug, Default)]
pub struct EscrowLedger {
    records: HashMap<TripId, EscrowRecord>,
    held: HashMap<Currency, u128>,
    balances: HashMap<(AccountId, Currency), u128>,
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn assert_invariants(&self) {
        if cfg!(debug_assertions) {
            for (&currency, &total) in &self.held {
                let backing: u128 = self
                    .records
                    .values()
                    .filter(|record| record.currency == currency && record.is_held())
                    .map(|record| record.amount)
                    .sum();
                debug_assert_eq!(
                    total, backing,
                    "Invariant violated: held {currency} total drifted from open escrows"
                );
            }
        }
    }

    /// Takes custody of a trip's payment.
    ///
    /// A trip's escrow can be opened once; reopening is rejected even after
    /// the original escrow settled.
    pub fn open(
        &mut self,
        trip_id: TripId,
        currency: Currency,
        amount: u128,
    ) -> Result<(), EngineError> {
        if self.records.contains_key(&trip_id) {
            return Err(EngineError::AlreadySettled);
        }
        let pool = self.held.get(&currency).copied().unwrap_or(0);
        let new_pool = pool.checked_add(amount).ok_or(EngineError::AmountOverflow)?;

        self.records.insert(
            trip_id,
            EscrowRecord {
                trip_id,
                currency,
                amount,
                disposition: Disposition::Held,
            },
        );
        self.held.insert(currency, new_pool);
        self.assert_invariants();
        Ok(())
    }

    /// Returns the full held amount to a single account and closes the
    /// escrow. Returns the amount credited.
    pub fn refund_all(&mut self, trip_id: TripId, to: AccountId) -> Result<u128, EngineError> {
        let record = self
            .records
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?;
        if !record.is_held() {
            return Err(EngineError::AlreadySettled);
        }
        let currency = record.currency;
        let amount = record.amount;
        let new_balance = self
            .balance_of(to, currency)
            .checked_add(amount)
            .ok_or(EngineError::AmountOverflow)?;

        // All checks passed; apply.
        if let Some(record) = self.records.get_mut(&trip_id) {
            record.disposition = Disposition::Refunded { to };
        }
        if let Some(pool) = self.held.get_mut(&currency) {
            *pool = pool.saturating_sub(amount);
        }
        if amount > 0 {
            self.balances.insert((to, currency), new_balance);
        }
        self.assert_invariants();
        Ok(amount)
    }

    /// Refunds a batch of escrows as one unit: every listed escrow closes or
    /// none do. Returns the amounts credited, in input order.
    ///
    /// Approval uses this to cancel losing siblings; a single rejected entry
    /// (already settled, unknown trip, repeated trip) aborts the whole batch.
    pub fn refund_many(
        &mut self,
        refunds: &[(TripId, AccountId)],
    ) -> Result<Vec<u128>, EngineError> {
        let mut seen = HashSet::new();
        let mut amounts = Vec::with_capacity(refunds.len());
        let mut credits: HashMap<(AccountId, Currency), u128> = HashMap::new();
        for &(trip_id, to) in refunds {
            let record = self
                .records
                .get(&trip_id)
                .ok_or(EngineError::TripNotFound)?;
            if !record.is_held() || !seen.insert(trip_id) {
                return Err(EngineError::AlreadySettled);
            }
            let currency = record.currency;
            let amount = record.amount;
            let balance = *credits
                .entry((to, currency))
                .or_insert_with(|| self.balance_of(to, currency));
            let updated = balance.checked_add(amount).ok_or(EngineError::AmountOverflow)?;
            credits.insert((to, currency), updated);
            amounts.push(amount);
        }

        // All checks passed; apply.
        for &(trip_id, to) in refunds {
            if let Some(record) = self.records.get_mut(&trip_id) {
                let currency = record.currency;
                let amount = record.amount;
                record.disposition = Disposition::Refunded { to };
                if let Some(pool) = self.held.get_mut(&currency) {
                    *pool = pool.saturating_sub(amount);
                }
                if amount > 0 {
                    *self.balances.entry((to, currency)).or_insert(0) += amount;
                }
            }
        }
        self.assert_invariants();
        Ok(amounts)
    }

    /// Splits the held amount across payout legs and closes the escrow.
    ///
    /// The legs must reconcile to the full held amount; a shortfall or excess
    /// is rejected before anything moves. Legs may repeat an account and may
    /// carry zero.
    pub fn settle(
        &mut self,
        trip_id: TripId,
        legs: &[(AccountId, u128)],
    ) -> Result<(), EngineError> {
        let record = self
            .records
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?;
        if !record.is_held() {
            return Err(EngineError::AlreadySettled);
        }
        let currency = record.currency;
        let amount = record.amount;

        let mut covered: u128 = 0;
        let mut credits: HashMap<AccountId, u128> = HashMap::new();
        for &(account, leg) in legs {
            covered = covered.checked_add(leg).ok_or(EngineError::AmountOverflow)?;
            let entry = credits.entry(account).or_insert(0);
            *entry = entry.checked_add(leg).ok_or(EngineError::AmountOverflow)?;
        }
        if covered != amount {
            return Err(EngineError::InsufficientPayment {
                expected: amount,
                received: covered,
            });
        }
        for (&account, &credit) in &credits {
            self.balance_of(account, currency)
                .checked_add(credit)
                .ok_or(EngineError::AmountOverflow)?;
        }

        // All checks passed; apply.
        if let Some(record) = self.records.get_mut(&trip_id) {
            record.disposition = Disposition::Disbursed {
                legs: legs.to_vec(),
            };
        }
        if let Some(pool) = self.held.get_mut(&currency) {
            *pool = pool.saturating_sub(amount);
        }
        for (account, credit) in credits {
            if credit > 0 {
                *self.balances.entry((account, currency)).or_insert(0) += credit;
            }
        }
        self.assert_invariants();
        Ok(())
    }

    /// Escrow record for a trip, if one was ever opened.
    pub fn record(&self, trip_id: TripId) -> Option<&EscrowRecord> {
        self.records.get(&trip_id)
    }

    /// Total still in custody for a currency.
    pub fn held_total(&self, currency: Currency) -> u128 {
        self.held.get(&currency).copied().unwrap_or(0)
    }

    /// Credited payout balance of an account in a currency.
    pub fn balance_of(&self, account: AccountId, currency: Currency) -> u128 {
        self.balances.get(&(account, currency)).copied().unwrap_or(0)
    }

    /// Every non-zero payout balance.
    pub fn balances(&self) -> impl Iterator<Item = (AccountId, Currency, u128)> + '_ {
        self.balances
            .iter()
            .map(|(&(account, currency), &amount)| (account, currency, amount))
    }

    /// Held pool per currency, including drained pools at zero.
    pub fn held_totals(&self) -> impl Iterator<Item = (Currency, u128)> + '_ {
        self.held.iter().map(|(&currency, &total)| (currency, total))
    }
}
