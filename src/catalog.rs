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

//! Car catalog collaborator interface.
//!
//! Listing management (ownership, search, geo checks) lives outside the
//! engine; the engine only reads a listing's pricing fields at request time.

use crate::base::{AccountId, CarId, Jurisdiction};
use crate::money::UsdCents;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Pricing snapshot of a listed car, as the catalog collaborator exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CarListing {
    pub car_id: CarId,
    pub host: AccountId,
    pub daily_price_usd_cents: UsdCents,
    pub deposit_usd_cents: UsdCents,
    pub jurisdiction: Jurisdiction,
}

/// Read-only view the engine has of the catalog.
pub trait CarCatalog: Send + Sync {
    fn listing(&self, car_id: CarId) -> Option<CarListing>;
}

/// Concurrent in-memory catalog for tests and the CLI.
///
/// Hosts may list cars while the engine is serving requests; a trip's
/// pricing is snapshotted at request time, so later listing edits never
/// touch in-flight trips.
#[derive(Debug, Default)]
pub struct InMemoryCarCatalog {
    listings: DashMap<CarId, CarListing>,
}

impl InMemoryCarCatalog {
    pub fn new() -> Self {
        InMemoryCarCatalog::default()
    }

    /// Registers or replaces a listing.
    pub fn list_car(&self, listing: CarListing) {
        self.listings.insert(listing.car_id, listing);
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

impl CarCatalog for InMemoryCarCatalog {
    fn listing(&self, car_id: CarId) -> Option<CarListing> {
        self.listings.get(&car_id).map(|entry| entry.clone())
    }
}
