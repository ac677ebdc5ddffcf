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

//! Booking conflict resolution.
//!
//! Pure functions over the trip arena. A window is blocked only by *live*
//! bookings past `Created` (see [`TripStatus::is_blocking`]); two `Created`
//! requests may coexist on the same window, and whichever is approved first
//! wins; the losers are auto-canceled regardless of creation order.
//!
//! [`TripStatus::is_blocking`]: crate::trip::TripStatus::is_blocking

use crate::base::{CarId, TripId};
use crate::trip::{TimeWindow, TripRecord, TripStatus};

/// Half-open interval intersection: `[a.start, a.end)` meets
/// `[b.start, b.end)`. Touching boundaries do not overlap.
#[inline]
pub fn overlaps(a: TimeWindow, b: TimeWindow) -> bool {
    a.start < b.end && b.start < a.end
}

/// First live booking that blocks `window` on `car_id`, if any.
pub fn find_blocking<'a, I>(trips: I, car_id: CarId, window: TimeWindow) -> Option<TripId>
where
    I: IntoIterator<Item = &'a TripRecord>,
{
    trips
        .into_iter()
        .find(|trip| {
            trip.car_id == car_id && trip.status.is_blocking() && overlaps(trip.window, window)
        })
        .map(|trip| trip.trip_id)
}

/// Every *other* `Created` request on the winner's car whose window
/// intersects the winner's: these are auto-canceled when the winner is
/// approved.
pub fn find_cancellable<'a, I>(trips: I, winner: &TripRecord) -> Vec<TripId>
where
    I: IntoIterator<Item = &'a TripRecord>,
{
    trips
        .into_iter()
        .filter(|trip| {
            trip.trip_id != winner.trip_id
                && trip.car_id == winner.car_id
                && trip.status == TripStatus::Created
                && overlaps(trip.window, winner.window)
        })
        .map(|trip| trip.trip_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::AccountId;
    use crate::money::{Currency, RateSnapshot, UsdCents};
    use crate::trip::TripPricing;

    fn window(start: i64, end: i64) -> TimeWindow {
        TimeWindow::new(start, end)
    }

    fn make_trip(trip_id: u64, car_id: u64, w: TimeWindow, status: TripStatus) -> TripRecord {
        TripRecord {
            trip_id: TripId(trip_id),
            car_id: CarId(car_id),
            host: AccountId(2),
            guest: AccountId(1),
            window: w,
            pricing: TripPricing {
                daily_total: UsdCents(1000),
                tax: UsdCents(200),
                deposit: UsdCents(400),
                platform_fee: UsdCents(100),
            },
            settlement_currency: Currency::Usd,
            rate: RateSnapshot::parity(),
            amount_received: 1700,
            status,
            check_in: None,
            check_out: None,
        }
    }

    #[test]
    fn overlap_truth_table() {
        // The two canonical fixtures: [123,321) meets [234,456) but not
        // [456,789).
        assert!(overlaps(window(123, 321), window(234, 456)));
        assert!(!overlaps(window(123, 321), window(456, 789)));

        // Containment and identity.
        assert!(overlaps(window(0, 100), window(25, 75)));
        assert!(overlaps(window(25, 75), window(0, 100)));
        assert!(overlaps(window(10, 20), window(10, 20)));

        // Half-open: a shared boundary is not a conflict.
        assert!(!overlaps(window(0, 100), window(100, 200)));
        assert!(!overlaps(window(100, 200), window(0, 100)));
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = window(123, 321);
        let b = window(234, 456);
        assert_eq!(overlaps(a, b), overlaps(b, a));
        let c = window(456, 789);
        assert_eq!(overlaps(a, c), overlaps(c, a));
    }

    #[test]
    fn created_requests_never_block() {
        let trips = [make_trip(1, 7, window(123, 321), TripStatus::Created)];
        assert_eq!(find_blocking(&trips, CarId(7), window(234, 456)), None);
    }

    #[test]
    fn approved_and_in_progress_trips_block() {
        for status in [
            TripStatus::Approved,
            TripStatus::CheckedInByHost,
            TripStatus::Started,
            TripStatus::CheckedOutByGuest,
            TripStatus::CheckedOutByHost,
            TripStatus::CompletedWithoutGuestConfirmation,
        ] {
            let trips = [make_trip(1, 7, window(123, 321), status)];
            assert_eq!(
                find_blocking(&trips, CarId(7), window(234, 456)),
                Some(TripId(1)),
                "status {status} should block"
            );
        }
    }

    #[test]
    fn terminal_trips_free_the_window() {
        for status in [TripStatus::Finished, TripStatus::Rejected, TripStatus::Canceled] {
            let trips = [make_trip(1, 7, window(123, 321), status)];
            assert_eq!(find_blocking(&trips, CarId(7), window(234, 456)), None);
        }
    }

    #[test]
    fn blocking_respects_car_and_window() {
        let trips = [make_trip(1, 7, window(123, 321), TripStatus::Approved)];
        // Different car.
        assert_eq!(find_blocking(&trips, CarId(8), window(234, 456)), None);
        // Same car, disjoint window.
        assert_eq!(find_blocking(&trips, CarId(7), window(456, 789)), None);
    }

    #[test]
    fn cancellable_picks_other_created_overlaps_only() {
        let winner = make_trip(1, 7, window(123, 321), TripStatus::Created);
        let trips = [
            winner.clone(),
            // Overlapping Created on the same car: cancellable.
            make_trip(2, 7, window(234, 456), TripStatus::Created),
            // Disjoint window: untouched.
            make_trip(3, 7, window(456, 789), TripStatus::Created),
            // Other car: untouched.
            make_trip(4, 8, window(123, 321), TripStatus::Created),
            // Already terminal: untouched.
            make_trip(5, 7, window(200, 300), TripStatus::Rejected),
        ];

        assert_eq!(find_cancellable(&trips, &winner), vec![TripId(2)]);
    }

    #[test]
    fn cancellable_ignores_creation_order() {
        // The winner was created later (higher id) but is approved first.
        let winner = make_trip(9, 7, window(234, 456), TripStatus::Created);
        let trips = [
            make_trip(1, 7, window(123, 321), TripStatus::Created),
            winner.clone(),
        ];
        assert_eq!(find_cancellable(&trips, &winner), vec![TripId(1)]);
    }
}
