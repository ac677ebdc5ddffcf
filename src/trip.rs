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

//! Trip records and the booking status machine.

use crate::base::{AccountId, CarId, TripId};
use crate::error::EngineError;
use crate::money::{Currency, RateSnapshot, UsdCents};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Half-open booking window `[start, end)` in Unix seconds.
///
/// Two windows that merely touch at a boundary do not overlap, so a car can
/// be returned and handed over again at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        TimeWindow { start, end }
    }

    /// `end > start`, checked once at trip creation.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.end <= self.start {
            return Err(EngineError::InvalidWindow);
        }
        Ok(())
    }

    /// Days billed for this window: the duration rounded up to whole days,
    /// never less than one.
    pub fn billable_days(&self) -> u64 {
        let duration = self.end.saturating_sub(self.start).max(1);
        duration.div_ceil(SECONDS_PER_DAY) as u64
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Booking lifecycle status.
///
/// ```text
/// Created ──approve──► Approved ──check_in_by_host──► CheckedInByHost
///    │                    │                                  │
///    │                    │                          check_in_by_guest
///    │                    │                                  ▼
///    │                    │            ┌──────────────── Started
///    │                    │            │                     │
///    │                    │   check_out_by_host      check_out_by_guest
///    │                    │            ▼                     ▼
///    │                    │   CompletedWithout-       CheckedOutByGuest
///    │                    │   GuestConfirmation              │
///    │                    │            │             check_out_by_host
///    │                    │     confirm_check_out            ▼
///    │                    │            │              CheckedOutByHost
///    │                    │            │                     │
///    │                    │            │                finish_trip
///    │                    │            ▼                     ▼
///    │                    │            └───────────────► Finished
///    ▼                    ▼
/// Rejected            Rejected        (admin may reject from any
///                                      non-terminal status)
/// Canceled: auto-rejection when a conflicting request is approved.
/// ```
///
/// `Finished`, `Rejected`, and `Canceled` are terminal: no transition is
/// ever permitted out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TripStatus {
    /// Requested by a guest; payment held in escrow; host has not decided.
    Created,
    /// Host accepted the request; conflicting requests were auto-canceled.
    Approved,
    /// Host recorded the handover readings and released the car.
    CheckedInByHost,
    /// Guest confirmed check-in; the rental is underway.
    Started,
    /// Guest returned the car and recorded readings.
    CheckedOutByGuest,
    /// Host confirmed the return; awaiting settlement.
    CheckedOutByHost,
    /// Host checked out while the guest never did; a guest or admin
    /// confirmation is required before settlement.
    CompletedWithoutGuestConfirmation,
    /// Settled: deposit refunded, host paid, tax and fee routed.
    Finished,
    /// Rejected by a party or an admin; guest fully refunded.
    Rejected,
    /// Auto-rejected because a conflicting request was approved; guest
    /// fully refunded.
    Canceled,
}

impl TripStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TripStatus::Finished | TripStatus::Rejected | TripStatus::Canceled
        )
    }

    /// Whether a trip in this status occupies its car's window.
    ///
    /// Everything live past `Created` blocks; a merely requested trip never
    /// does, and terminal trips free the window.
    pub const fn is_blocking(self) -> bool {
        !self.is_terminal() && !matches!(self, TripStatus::Created)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TripStatus::Created => "Created",
            TripStatus::Approved => "Approved",
            TripStatus::CheckedInByHost => "CheckedInByHost",
            TripStatus::Started => "Started",
            TripStatus::CheckedOutByGuest => "CheckedOutByGuest",
            TripStatus::CheckedOutByHost => "CheckedOutByHost",
            TripStatus::CompletedWithoutGuestConfirmation => "CompletedWithoutGuestConfirmation",
            TripStatus::Finished => "Finished",
            TripStatus::Rejected => "Rejected",
            TripStatus::Canceled => "Canceled",
        };
        write!(f, "{name}")
    }
}

/// Odometer and fuel readings captured at a physical handover.
///
/// Dispute support only; settlement arithmetic never reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct HandoverReading {
    pub odometer: u64,
    pub fuel_level: u8,
}

/// The USD-cent pricing fixed at request time (price stability invariant:
/// never recomputed afterward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TripPricing {
    /// Daily price × billable days.
    pub daily_total: UsdCents,
    pub tax: UsdCents,
    pub deposit: UsdCents,
    pub platform_fee: UsdCents,
}

impl TripPricing {
    /// The full charge the guest owes: every line item is paid up front.
    pub fn total(&self) -> Result<UsdCents, EngineError> {
        self.daily_total
            .checked_add(self.tax)?
            .checked_add(self.deposit)?
            .checked_add(self.platform_fee)
    }
}

/// The central entity: one booking attempt from request to settlement.
///
/// Created atomically with its escrow record, mutated only by engine
/// transitions, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TripRecord {
    pub trip_id: TripId,
    pub car_id: CarId,
    pub host: AccountId,
    pub guest: AccountId,
    pub window: TimeWindow,
    pub pricing: TripPricing,
    pub settlement_currency: Currency,
    pub rate: RateSnapshot,
    /// Exact value taken into custody, in settlement-currency minor units.
    pub amount_received: u128,
    pub status: TripStatus,
    pub check_in: Option<HandoverReading>,
    pub check_out: Option<HandoverReading>,
}

impl TripRecord {
    pub fn is_host(&self, account: AccountId) -> bool {
        self.host == account
    }

    pub fn is_guest(&self, account: AccountId) -> bool {
        self.guest == account
    }

    /// First reading captured in the check-in phase wins; later submissions
    /// in the same phase are kept out of the record.
    pub(crate) fn record_check_in(&mut self, reading: Option<HandoverReading>) {
        if self.check_in.is_none() {
            self.check_in = reading;
        }
    }

    pub(crate) fn record_check_out(&mut self, reading: Option<HandoverReading>) {
        if self.check_out.is_none() {
            self.check_out = reading;
        }
    }
}
