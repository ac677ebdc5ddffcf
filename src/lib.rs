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

//! # Trip Ledger
//!
//! This library provides the trip lifecycle and escrow settlement engine for
//! a peer-to-peer vehicle rental marketplace: it takes custody of a guest's
//! payment at request time, walks the booking through a strict multi-party
//! state machine, resolves window conflicts on approval, and settles the
//! escrow with exact integer arithmetic when the trip ends.
//!
//! ## Core Components
//!
//! - [`Engine`]: Trip lifecycle controller; every transition goes through it
//! - [`EscrowLedger`]: Per-trip custody of payments and payout balances
//! - [`TripRecord`] / [`TripStatus`]: The central booking entity and its
//!   state machine
//! - [`RateSnapshot`] / [`UsdCents`]: Fixed-point money and the conversion
//!   rate locked at request time
//! - [`TaxTable`] / [`FeeSchedule`]: Pluggable jurisdiction taxes and the
//!   platform fee
//! - [`EngineError`]: Error types for rejected transitions
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use trip_ledger_rs::{
//!     AccountId, CarId, CarListing, Currency, Engine, EngineConfig, FeeSchedule,
//!     FixedRateOracle, InMemoryCarCatalog, Jurisdiction, TaxRule, TaxTable,
//!     TimeWindow, UsdCents,
//! };
//!
//! let catalog = InMemoryCarCatalog::new();
//! catalog.list_car(CarListing {
//!     car_id: CarId(7),
//!     host: AccountId(2),
//!     daily_price_usd_cents: UsdCents(1000),
//!     deposit_usd_cents: UsdCents(400),
//!     jurisdiction: Jurisdiction::new("FL"),
//! });
//! let mut taxes = TaxTable::new();
//! taxes.set_rule(
//!     Jurisdiction::new("FL"),
//!     TaxRule { rate_bps: 2000, per_day_cents: UsdCents(0) },
//! );
//!
//! let engine = Engine::new(
//!     EngineConfig {
//!         platform_account: AccountId(99),
//!         tax_account: AccountId(90),
//!         admins: vec![],
//!         fees: FeeSchedule::default(),
//!     },
//!     Arc::new(catalog),
//!     Arc::new(FixedRateOracle::new()),
//!     Arc::new(taxes),
//! );
//!
//! // One day at $10.00, plus $2.00 tax, $4.00 deposit, $1.00 platform fee.
//! let guest = AccountId(1);
//! let host = AccountId(2);
//! let window = TimeWindow::new(1_700_000_000, 1_700_000_000 + 86_400);
//! let trip = engine
//!     .create_trip_request(guest, CarId(7), window, Currency::Usd, 1_700)
//!     .unwrap();
//!
//! engine.approve_trip_request(host, trip).unwrap();
//! engine.check_in_by_host(host, trip, None).unwrap();
//! engine.check_in_by_guest(guest, trip, None).unwrap();
//! engine.check_out_by_guest(guest, trip, None).unwrap();
//! engine.check_out_by_host(host, trip, None).unwrap();
//! engine.finish_trip(host, trip).unwrap();
//!
//! // Deposit back to the guest, rental to the host, tax and fee retained.
//! assert_eq!(engine.balance_of(guest, Currency::Usd), 400);
//! assert_eq!(engine.balance_of(host, Currency::Usd), 1_000);
//! assert_eq!(engine.balance_of(AccountId(90), Currency::Usd), 200);
//! assert_eq!(engine.balance_of(AccountId(99), Currency::Usd), 100);
//! ```
//!
//! ## Thread Safety
//!
//! Transitions serialize on a single state lock, so approval can cancel
//! conflicting siblings and their refunds in one atomic step; queries take
//! the lock shared. The engine is `Send + Sync` and safe to share behind an
//! `Arc`.

mod base;
mod catalog;
pub mod conflict;
mod engine;
pub mod error;
mod escrow;
mod event;
mod money;
mod policy;
mod trip;

pub use base::{AccountId, CarId, Jurisdiction, TripId};
pub use catalog::{CarCatalog, CarListing, InMemoryCarCatalog};
pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use escrow::{Disposition, EscrowLedger, EscrowRecord};
pub use event::{Clock, FixedClock, SystemClock, TripEvent};
pub use money::{Currency, FixedRateOracle, RateOracle, RateSnapshot, UsdCents};
pub use policy::{FeeSchedule, TaxPolicy, TaxRule, TaxTable};
pub use trip::{
    HandoverReading, SECONDS_PER_DAY, TimeWindow, TripPricing, TripRecord, TripStatus,
};
