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

//! Error types for trip transitions and escrow operations.
//!
//! Every error is synchronous and fully reverting: a failed call leaves the
//! ledger, the trip arena, and the event log exactly as they were. The engine
//! never retries; the caller submits a fresh, corrected call.

use crate::money::Currency;
use crate::trip::TripStatus;
use thiserror::Error;

/// Trip lifecycle and escrow errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Booking window ends on or before it starts
    #[error("invalid window (end must be after start)")]
    InvalidWindow,

    /// An approved booking already occupies an intersecting window
    #[error("window blocked by a conflicting approved booking")]
    OverlapBlocked,

    /// Caller lacks the role or ownership this call requires
    #[error("caller not authorized for this transition")]
    NotAuthorized,

    /// Call is not valid from the trip's current status
    #[error("transition not valid from status {status}")]
    InvalidStateTransition {
        /// Status the trip held when the call was made
        status: TripStatus,
    },

    /// Escrow for this trip has already been disbursed or refunded
    #[error("escrow already settled")]
    AlreadySettled,

    /// Amount sent does not match the computed total at the locked rate
    #[error("payment of {received} does not match required {expected}")]
    InsufficientPayment {
        /// Converted total due at the locked rate, in minor units
        expected: u128,
        /// Amount the guest actually presented, in minor units
        received: u128,
    },

    /// Oracle could not supply a conversion rate for the currency
    #[error("no conversion rate available for {currency}")]
    RateUnavailable {
        /// Settlement currency the rate was requested for
        currency: Currency,
    },

    /// Referenced trip id does not exist
    #[error("trip not found")]
    TripNotFound,

    /// Referenced car id is not listed in the catalog
    #[error("car not found")]
    CarNotFound,

    /// Arithmetic on monetary amounts overflowed
    #[error("monetary amount overflow")]
    AmountOverflow,

    /// Fee schedule is above 100%
    #[error("invalid fee schedule (above 10000 bps)")]
    InvalidFee,
}
