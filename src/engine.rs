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

//! Trip lifecycle engine.
//!
//! The [`Engine`] walks every booking through a strict multi-party state
//! machine and moves escrowed funds at the transitions that demand it. It is
//! the orchestrator: pricing comes from the car catalog and tax policy, the
//! conversion rate from the oracle, custody from the escrow ledger, window
//! arbitration from the conflict scan.
//!
//! # Transitions
//!
//! - **Request**: the guest pays the full converted total up front and escrow
//!   opens for exactly that amount.
//! - **Approval**: the host accepts; every overlapping `Created` sibling on
//!   the same car auto-cancels with a full refund.
//! - **Rejection**: full refund to the guest. Hosts and guests may reject
//!   before approval; a platform admin may force one from any live state.
//! - **Handover**: host and guest check in and out in turn, optionally
//!   recording odometer and fuel readings.
//! - **Settlement**: reaching `Finished` splits the escrow four ways: the
//!   deposit back to the guest, the rental charge to the host, tax to the
//!   tax sink, and the remainder (fee plus truncation dust) to the platform.
//!
//! # Atomicity
//!
//! Transitions serialize on a single state lock. Every call validates
//! completely before mutating, and each ledger movement is itself
//! all-or-nothing, so a failed call leaves no trace and a successful one
//! becomes visible as a whole.

use crate::base::{AccountId, CarId, TripId};
use crate::catalog::CarCatalog;
use crate::conflict;
use crate::error::EngineError;
use crate::escrow::{EscrowLedger, EscrowRecord};
use crate::event::{Clock, EventLog, SystemClock, TripEvent};
use crate::money::{Currency, RateOracle};
use crate::policy::{FeeSchedule, TaxPolicy};
use crate::trip::{HandoverReading, TimeWindow, TripPricing, TripRecord, TripStatus};
use crossbeam::channel::Receiver;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Platform-level accounts and fee policy, fixed at engine construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Account credited with platform fees and truncation remainders.
    pub platform_account: AccountId,
    /// Account credited with collected taxes.
    pub tax_account: AccountId,
    /// Accounts allowed to force-reject trips and confirm checkouts.
    #[serde(default)]
    pub admins: Vec<AccountId>,
    #[serde(default)]
    pub fees: FeeSchedule,
}

/// Role a transition demands, resolved against one trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequiredRole {
    Host,
    Guest,
    HostOrAdmin,
    GuestOrAdmin,
    PartyOrAdmin,
}

/// Everything a transition may touch, guarded by one lock.
struct EngineState {
    /// Trip arena keyed by id; entries are never removed, only transitioned.
    trips: BTreeMap<TripId, TripRecord>,
    ledger: EscrowLedger,
    events: EventLog,
    next_trip_id: u64,
}

/// Trip lifecycle engine over one escrow ledger.
///
/// Collaborators are injected as trait handles, so tests run with in-memory
/// catalogs and fixed oracles while wiring stays identical.
///
/// # Invariants
///
/// - Trip ids are assigned monotonically and never reused.
/// - Pricing and the rate snapshot are fixed at request time and never
///   recomputed afterward.
/// - A trip in `Finished`, `Rejected`, or `Canceled` never transitions again.
/// - Funds move only together with the status change that justifies them.
/// - Escrow still held plus payouts credited equals everything ever received.
pub struct Engine {
    state: RwLock<EngineState>,
    catalog: Arc<dyn CarCatalog>,
    oracle: Arc<dyn RateOracle>,
    taxes: Arc<dyn TaxPolicy>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine stamping events with the system clock.
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn CarCatalog>,
        oracle: Arc<dyn RateOracle>,
        taxes: Arc<dyn TaxPolicy>,
    ) -> Self {
        Self::with_clock(config, catalog, oracle, taxes, Arc::new(SystemClock))
    }

    /// Creates an engine with an explicit clock, for deterministic runs.
    pub fn with_clock(
        config: EngineConfig,
        catalog: Arc<dyn CarCatalog>,
        oracle: Arc<dyn RateOracle>,
        taxes: Arc<dyn TaxPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Engine {
            state: RwLock::new(EngineState {
                trips: BTreeMap::new(),
                ledger: EscrowLedger::new(),
                events: EventLog::new(),
                next_trip_id: 1,
            }),
            catalog,
            oracle,
            taxes,
            clock,
            config,
        }
    }

    /// Books a car: locks the rate, fixes pricing, takes the payment into
    /// escrow, and records the trip as `Created`.
    ///
    /// The caller becomes the trip's guest. `amount_sent` must equal the
    /// converted total exactly; the engine keeps no change and extends no
    /// credit.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidWindow`] - window ends on or before it starts.
    /// - [`EngineError::CarNotFound`] - car id is not listed in the catalog.
    /// - [`EngineError::RateUnavailable`] - oracle has no usable rate for the
    ///   currency (a zero rate counts as unavailable).
    /// - [`EngineError::InsufficientPayment`] - `amount_sent` differs from
    ///   the converted total in either direction.
    /// - [`EngineError::OverlapBlocked`] - an approved or in-progress booking
    ///   already occupies an intersecting window on this car.
    /// - [`EngineError::AmountOverflow`] - pricing or conversion arithmetic
    ///   exceeded the representable range.
    pub fn create_trip_request(
        &self,
        guest: AccountId,
        car_id: CarId,
        window: TimeWindow,
        currency: Currency,
        amount_sent: u128,
    ) -> Result<TripId, EngineError> {
        window.validate()?;
        let listing = self
            .catalog
            .listing(car_id)
            .ok_or(EngineError::CarNotFound)?;

        let days = window.billable_days();
        let daily_total = listing.daily_price_usd_cents.checked_mul(days)?;
        let tax = self.taxes.tax_for(&listing.jurisdiction, days, daily_total)?;
        let platform_fee = self.config.fees.platform_fee(daily_total)?;
        let pricing = TripPricing {
            daily_total,
            tax,
            deposit: listing.deposit_usd_cents,
            platform_fee,
        };
        let total = pricing.total()?;

        let rate = self
            .oracle
            .rate_for(currency)
            .ok_or(EngineError::RateUnavailable { currency })?;
        if rate.rate == 0 {
            return Err(EngineError::RateUnavailable { currency });
        }
        let expected = rate.usd_to_minor(total, currency)?;
        if amount_sent != expected {
            return Err(EngineError::InsufficientPayment {
                expected,
                received: amount_sent,
            });
        }
        debug!(
            "Priced request: car_id={}, days={}, total={}, expected_minor={}",
            car_id, days, total, expected
        );

        let mut state = self.state.write();
        if conflict::find_blocking(state.trips.values(), car_id, window).is_some() {
            return Err(EngineError::OverlapBlocked);
        }

        let trip_id = TripId(state.next_trip_id);
        state.ledger.open(trip_id, currency, amount_sent)?;
        state.next_trip_id += 1;
        state.trips.insert(
            trip_id,
            TripRecord {
                trip_id,
                car_id,
                host: listing.host,
                guest,
                window,
                pricing,
                settlement_currency: currency,
                rate,
                amount_received: amount_sent,
                status: TripStatus::Created,
                check_in: None,
                check_out: None,
            },
        );
        let now = self.clock.now_unix();
        state.events.emit(TripEvent {
            trip_id,
            old_status: None,
            new_status: TripStatus::Created,
            actor: guest,
            timestamp: now,
        });
        info!(
            "Trip requested: trip_id={}, car_id={}, guest={}, total={}, currency={}",
            trip_id, car_id, guest, total, currency
        );
        Ok(trip_id)
    }

    /// Host accepts a `Created` request.
    ///
    /// Every other `Created` request on the same car whose window overlaps
    /// the winner's moves to `Canceled` with a full refund, in the same
    /// atomic step. Returns the canceled trip ids. Creation order does not
    /// matter; the first request approved wins.
    ///
    /// # Errors
    ///
    /// - [`EngineError::TripNotFound`] - no such trip.
    /// - [`EngineError::NotAuthorized`] - caller is not this trip's host.
    /// - [`EngineError::InvalidStateTransition`] - trip is not `Created`.
    pub fn approve_trip_request(
        &self,
        actor: AccountId,
        trip_id: TripId,
    ) -> Result<Vec<TripId>, EngineError> {
        let mut state = self.state.write();
        let winner = state
            .trips
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?
            .clone();
        self.check_capability(actor, &winner, RequiredRole::Host)?;
        if winner.status != TripStatus::Created {
            return Err(EngineError::InvalidStateTransition {
                status: winner.status,
            });
        }

        let canceled = conflict::find_cancellable(state.trips.values(), &winner);
        let refunds: Vec<(TripId, AccountId)> = canceled
            .iter()
            .filter_map(|id| state.trips.get(id).map(|trip| (*id, trip.guest)))
            .collect();
        state.ledger.refund_many(&refunds)?;

        let now = self.clock.now_unix();
        Self::apply_status(&mut state, trip_id, TripStatus::Approved, actor, now);
        for &(loser, _) in &refunds {
            Self::apply_status(&mut state, loser, TripStatus::Canceled, actor, now);
        }
        info!(
            "Trip approved: trip_id={}, canceled_siblings={}",
            trip_id,
            canceled.len()
        );
        Ok(canceled)
    }

    /// Rejects a trip and refunds the guest in full.
    ///
    /// The host or the guest may reject while the trip is still `Created`;
    /// a platform admin may reject from any non-terminal state. There is no
    /// cancellation fee on this path.
    ///
    /// # Errors
    ///
    /// - [`EngineError::TripNotFound`] - no such trip.
    /// - [`EngineError::NotAuthorized`] - caller is neither a party to the
    ///   trip nor an admin.
    /// - [`EngineError::InvalidStateTransition`] - trip is terminal, or a
    ///   party called after approval.
    pub fn reject_trip_request(
        &self,
        actor: AccountId,
        trip_id: TripId,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?
            .clone();
        self.check_capability(actor, &trip, RequiredRole::PartyOrAdmin)?;
        if trip.status.is_terminal() {
            return Err(EngineError::InvalidStateTransition {
                status: trip.status,
            });
        }
        if trip.status != TripStatus::Created && !self.is_admin(actor) {
            return Err(EngineError::InvalidStateTransition {
                status: trip.status,
            });
        }

        let refunded = state.ledger.refund_all(trip_id, trip.guest)?;
        let now = self.clock.now_unix();
        Self::apply_status(&mut state, trip_id, TripStatus::Rejected, actor, now);
        info!(
            "Trip rejected: trip_id={}, refunded={}, currency={}",
            trip_id, refunded, trip.settlement_currency
        );
        Ok(())
    }

    /// Host hands the car over: `Approved → CheckedInByHost`.
    pub fn check_in_by_host(
        &self,
        actor: AccountId,
        trip_id: TripId,
        reading: Option<HandoverReading>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?
            .clone();
        self.check_capability(actor, &trip, RequiredRole::Host)?;
        if trip.status != TripStatus::Approved {
            return Err(EngineError::InvalidStateTransition {
                status: trip.status,
            });
        }

        if let Some(record) = state.trips.get_mut(&trip_id) {
            record.record_check_in(reading);
        }
        let now = self.clock.now_unix();
        Self::apply_status(&mut state, trip_id, TripStatus::CheckedInByHost, actor, now);
        debug!("Host checked in: trip_id={}", trip_id);
        Ok(())
    }

    /// Guest takes the car: `CheckedInByHost → Started`.
    pub fn check_in_by_guest(
        &self,
        actor: AccountId,
        trip_id: TripId,
        reading: Option<HandoverReading>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?
            .clone();
        self.check_capability(actor, &trip, RequiredRole::Guest)?;
        if trip.status != TripStatus::CheckedInByHost {
            return Err(EngineError::InvalidStateTransition {
                status: trip.status,
            });
        }

        if let Some(record) = state.trips.get_mut(&trip_id) {
            record.record_check_in(reading);
        }
        let now = self.clock.now_unix();
        Self::apply_status(&mut state, trip_id, TripStatus::Started, actor, now);
        debug!("Guest checked in: trip_id={}", trip_id);
        Ok(())
    }

    /// Guest returns the car: `Started → CheckedOutByGuest`.
    pub fn check_out_by_guest(
        &self,
        actor: AccountId,
        trip_id: TripId,
        reading: Option<HandoverReading>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?
            .clone();
        self.check_capability(actor, &trip, RequiredRole::Guest)?;
        if trip.status != TripStatus::Started {
            return Err(EngineError::InvalidStateTransition {
                status: trip.status,
            });
        }

        if let Some(record) = state.trips.get_mut(&trip_id) {
            record.record_check_out(reading);
        }
        let now = self.clock.now_unix();
        Self::apply_status(&mut state, trip_id, TripStatus::CheckedOutByGuest, actor, now);
        debug!("Guest checked out: trip_id={}", trip_id);
        Ok(())
    }

    /// Host confirms the return.
    ///
    /// From `CheckedOutByGuest` this is the normal path to
    /// `CheckedOutByHost`. From `Started` (the guest never checked out) the
    /// trip moves to `CompletedWithoutGuestConfirmation` instead and waits
    /// for [`Engine::confirm_check_out`] before it can settle.
    pub fn check_out_by_host(
        &self,
        actor: AccountId,
        trip_id: TripId,
        reading: Option<HandoverReading>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?
            .clone();
        self.check_capability(actor, &trip, RequiredRole::Host)?;
        let next = match trip.status {
            TripStatus::CheckedOutByGuest => TripStatus::CheckedOutByHost,
            TripStatus::Started => TripStatus::CompletedWithoutGuestConfirmation,
            status => return Err(EngineError::InvalidStateTransition { status }),
        };

        if let Some(record) = state.trips.get_mut(&trip_id) {
            record.record_check_out(reading);
        }
        let now = self.clock.now_unix();
        Self::apply_status(&mut state, trip_id, next, actor, now);
        debug!("Host checked out: trip_id={}, status={}", trip_id, next);
        Ok(())
    }

    /// Guest (or an admin) vouches for a host-only checkout:
    /// `CompletedWithoutGuestConfirmation → Finished`, disbursing escrow.
    ///
    /// # Errors
    ///
    /// Same surface as [`Engine::finish_trip`], with the guest in place of
    /// the host.
    pub fn confirm_check_out(&self, actor: AccountId, trip_id: TripId) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?
            .clone();
        self.check_capability(actor, &trip, RequiredRole::GuestOrAdmin)?;
        if trip.status != TripStatus::CompletedWithoutGuestConfirmation {
            return Err(EngineError::InvalidStateTransition {
                status: trip.status,
            });
        }
        self.settle_and_finish(&mut state, &trip, actor)
    }

    /// Settles a fully checked-out trip: `CheckedOutByHost → Finished`.
    ///
    /// Disburses the escrow in four legs at the locked rate: deposit to the
    /// guest, rental charge to the host, tax to the tax sink, and whatever
    /// remains (the fee plus truncation remainders) to the platform. The
    /// four legs always reconcile to `amount_received` exactly.
    ///
    /// # Errors
    ///
    /// - [`EngineError::TripNotFound`] - no such trip.
    /// - [`EngineError::NotAuthorized`] - caller is neither this trip's host
    ///   nor an admin.
    /// - [`EngineError::InvalidStateTransition`] - trip is not
    ///   `CheckedOutByHost`.
    /// - [`EngineError::AlreadySettled`] - escrow was already closed (cannot
    ///   happen through engine transitions; kept as a ledger-level guard).
    pub fn finish_trip(&self, actor: AccountId, trip_id: TripId) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let trip = state
            .trips
            .get(&trip_id)
            .ok_or(EngineError::TripNotFound)?
            .clone();
        self.check_capability(actor, &trip, RequiredRole::HostOrAdmin)?;
        if trip.status != TripStatus::CheckedOutByHost {
            return Err(EngineError::InvalidStateTransition {
                status: trip.status,
            });
        }
        self.settle_and_finish(&mut state, &trip, actor)
    }

    // === Queries ===

    /// Snapshot of one trip.
    pub fn trip(&self, trip_id: TripId) -> Option<TripRecord> {
        self.state.read().trips.get(&trip_id).cloned()
    }

    /// Snapshot of every trip, ascending by id.
    pub fn trips(&self) -> Vec<TripRecord> {
        self.state.read().trips.values().cloned().collect()
    }

    /// Snapshot of every trip booked against one car, ascending by id.
    pub fn trips_for_car(&self, car_id: CarId) -> Vec<TripRecord> {
        self.state
            .read()
            .trips
            .values()
            .filter(|trip| trip.car_id == car_id)
            .cloned()
            .collect()
    }

    /// Escrow custody record for a trip.
    pub fn escrow(&self, trip_id: TripId) -> Option<EscrowRecord> {
        self.state.read().ledger.record(trip_id).cloned()
    }

    /// Credited payout balance of an account in a currency.
    pub fn balance_of(&self, account: AccountId, currency: Currency) -> u128 {
        self.state.read().ledger.balance_of(account, currency)
    }

    /// Funds still in custody for a currency.
    pub fn held_total(&self, currency: Currency) -> u128 {
        self.state.read().ledger.held_total(currency)
    }

    /// Every payout balance, sorted by account then currency.
    pub fn balances(&self) -> Vec<(AccountId, Currency, u128)> {
        let state = self.state.read();
        let mut rows: Vec<_> = state.ledger.balances().collect();
        rows.sort_unstable();
        rows
    }

    /// Copy of the event log, oldest first.
    pub fn events(&self) -> Vec<TripEvent> {
        self.state.read().events.snapshot()
    }

    /// Live feed of future transition events.
    pub fn subscribe(&self) -> Receiver<TripEvent> {
        self.state.write().events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // === Internals ===

    fn is_admin(&self, account: AccountId) -> bool {
        self.config.admins.contains(&account)
    }

    /// The one authorization gate every transition passes through.
    fn check_capability(
        &self,
        caller: AccountId,
        trip: &TripRecord,
        required: RequiredRole,
    ) -> Result<(), EngineError> {
        let allowed = match required {
            RequiredRole::Host => trip.is_host(caller),
            RequiredRole::Guest => trip.is_guest(caller),
            RequiredRole::HostOrAdmin => trip.is_host(caller) || self.is_admin(caller),
            RequiredRole::GuestOrAdmin => trip.is_guest(caller) || self.is_admin(caller),
            RequiredRole::PartyOrAdmin => {
                trip.is_host(caller) || trip.is_guest(caller) || self.is_admin(caller)
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(EngineError::NotAuthorized)
        }
    }

    /// Flips a trip's status and emits the matching event. Infallible, so
    /// commits that already moved funds cannot half-apply.
    fn apply_status(
        state: &mut EngineState,
        trip_id: TripId,
        new_status: TripStatus,
        actor: AccountId,
        now: i64,
    ) {
        if let Some(trip) = state.trips.get_mut(&trip_id) {
            let old_status = trip.status;
            trip.status = new_status;
            state.events.emit(TripEvent {
                trip_id,
                old_status: Some(old_status),
                new_status,
                actor,
                timestamp: now,
            });
        }
    }

    fn settle_and_finish(
        &self,
        state: &mut EngineState,
        trip: &TripRecord,
        actor: AccountId,
    ) -> Result<(), EngineError> {
        let legs = self.settlement_legs(trip)?;
        state.ledger.settle(trip.trip_id, &legs)?;
        let now = self.clock.now_unix();
        Self::apply_status(state, trip.trip_id, TripStatus::Finished, actor, now);
        info!(
            "Trip finished: trip_id={}, disbursed={}, currency={}",
            trip.trip_id, trip.amount_received, trip.settlement_currency
        );
        Ok(())
    }

    /// Resolves the four settlement legs at the trip's locked rate.
    ///
    /// Deposit, rental, and tax each convert with truncation; the platform
    /// leg is whatever remains of `amount_received`, which is at least the
    /// converted fee because truncation only ever sheds value.
    fn settlement_legs(
        &self,
        trip: &TripRecord,
    ) -> Result<Vec<(AccountId, u128)>, EngineError> {
        let rate = trip.rate;
        let currency = trip.settlement_currency;
        let deposit = rate.usd_to_minor(trip.pricing.deposit, currency)?;
        let rental = rate.usd_to_minor(trip.pricing.daily_total, currency)?;
        let tax = rate.usd_to_minor(trip.pricing.tax, currency)?;
        let spoken_for = deposit
            .checked_add(rental)
            .and_then(|v| v.checked_add(tax))
            .ok_or(EngineError::AmountOverflow)?;
        let platform = trip
            .amount_received
            .checked_sub(spoken_for)
            .ok_or(EngineError::AmountOverflow)?;
        Ok(vec![
            (trip.guest, deposit),
            (trip.host, rental),
            (self.config.tax_account, tax),
            (self.config.platform_account, platform),
        ])
    }
}
