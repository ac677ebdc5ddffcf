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

//! Transition events.
//!
//! Every successful transition appends one event, in commit order, to an
//! append-only log that observers can snapshot or subscribe to. The log is
//! written while the engine holds its state lock, so event order matches the
//! order transitions actually took effect.

use crate::base::{AccountId, TripId};
use crate::trip::TripStatus;
use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Record of one status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TripEvent {
    pub trip_id: TripId,
    /// `None` when the trip was just created.
    pub old_status: Option<TripStatus>,
    pub new_status: TripStatus,
    /// Account whose call caused the change. Auto-cancellations carry the
    /// approver.
    pub actor: AccountId,
    /// Unix seconds from the engine's clock.
    pub timestamp: i64,
}

/// Source of event timestamps.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Wall clock in Unix seconds.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Settable clock for deterministic runs.
#[derive(Debug)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn at(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::Relaxed);
    }
}

impl Clock for FixedClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Append-only event log with live fan-out.
#[derive(Debug, Default)]
pub struct EventLog {
    log: Vec<TripEvent>,
    senders: Vec<Sender<TripEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and forwards it to live subscribers. Subscribers
    /// whose receiver was dropped are pruned here.
    pub(crate) fn emit(&mut self, event: TripEvent) {
        self.senders
            .retain(|sender| sender.send(event.clone()).is_ok());
        self.log.push(event);
    }

    /// Opens an unbounded feed of future events.
    pub fn subscribe(&mut self) -> Receiver<TripEvent> {
        let (sender, receiver) = unbounded();
        self.senders.push(sender);
        receiver
    }

    /// Copy of the full log, oldest first.
    pub fn snapshot(&self) -> Vec<TripEvent> {
        self.log.clone()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
