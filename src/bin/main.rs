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

use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use trip_ledger_rs::{
    AccountId, CarId, CarListing, Currency, Engine, EngineConfig, EngineError, HandoverReading,
    InMemoryCarCatalog, Jurisdiction, RateSnapshot, TaxRule, TaxTable, TimeWindow, TripId,
    TripStatus,
};

/// Trip Ledger - Replay booking operation CSV files
///
/// Builds an engine from a JSON setup file (platform accounts, car listings,
/// conversion rates, tax rules), replays trip operations from a CSV file, and
/// writes the chosen report to stdout.
#[derive(Parser, Debug)]
#[command(name = "trip-ledger-rs")]
#[command(about = "A trip lifecycle engine that replays booking CSVs", long_about = None)]
struct Args {
    /// Path to JSON setup file
    ///
    /// Declares platform/tax accounts, admins, the fee schedule, car
    /// listings, conversion rates, and per-jurisdiction tax rules.
    #[arg(value_name = "SETUP")]
    setup: PathBuf,

    /// Path to CSV file with trip operations
    ///
    /// Expected format: op,actor,trip,car,start,end,currency,amount,odometer,fuel
    /// Example: cargo run -- setup.json trips.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Report written to stdout after the replay
    #[arg(long, value_enum, default_value_t = Report::Accounts)]
    report: Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    /// Payout balances per account and currency
    Accounts,
    /// Every trip with its status and escrow disposition
    Trips,
    /// The transition event log
    Events,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let setup = match load_setup(&args.setup) {
        Ok(setup) => setup,
        Err(e) => {
            eprintln!("Error reading setup '{}': {}", args.setup.display(), e);
            process::exit(1);
        }
    };
    let engine = build_engine(setup);

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = process_operations(&engine, BufReader::new(file)) {
        eprintln!("Error processing operations: {}", e);
        process::exit(1);
    }

    let written = match args.report {
        Report::Accounts => write_balances(&engine, std::io::stdout()),
        Report::Trips => write_trips(&engine, std::io::stdout()),
        Report::Events => write_events(&engine, std::io::stdout()),
    };
    if let Err(e) = written {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Engine wiring declared in the setup file.
///
/// # Example
///
/// ```json
/// {
///   "engine": { "platform_account": 99, "tax_account": 90, "admins": [50] },
///   "cars": [{
///     "car_id": 7, "host": 2, "daily_price_usd_cents": 1000,
///     "deposit_usd_cents": 400, "jurisdiction": "FL"
///   }],
///   "rates": { "eth": { "rate": 200000000000, "decimals": 8 } },
///   "taxes": { "FL": { "rate_bps": 2000, "per_day_cents": 0 } }
/// }
/// ```
#[derive(Debug, Deserialize)]
struct Setup {
    engine: EngineConfig,
    #[serde(default)]
    cars: Vec<CarListing>,
    #[serde(default)]
    rates: HashMap<Currency, RateSnapshot>,
    #[serde(default)]
    taxes: HashMap<String, TaxRule>,
    #[serde(default)]
    default_tax: Option<TaxRule>,
}

fn load_setup(path: &Path) -> Result<Setup, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let setup = serde_json::from_reader(BufReader::new(file))?;
    Ok(setup)
}

fn build_engine(setup: Setup) -> Engine {
    let catalog = InMemoryCarCatalog::new();
    for car in setup.cars {
        catalog.list_car(car);
    }

    // USD stays available at parity even for an empty rates table.
    let oracle = trip_ledger_rs::FixedRateOracle::new();
    for (currency, snapshot) in setup.rates {
        oracle.set_rate(currency, snapshot);
    }

    let mut taxes = match setup.default_tax {
        Some(rule) => TaxTable::with_default(rule),
        None => TaxTable::new(),
    };
    for (jurisdiction, rule) in setup.taxes {
        taxes.set_rule(Jurisdiction::new(jurisdiction), rule);
    }

    Engine::new(
        setup.engine,
        Arc::new(catalog),
        Arc::new(oracle),
        Arc::new(taxes),
    )
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, actor, trip, car, start, end, currency, amount, odometer, fuel`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    actor: u64,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    trip: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    car: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    start: Option<i64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    end: Option<i64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    currency: Option<Currency>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    amount: Option<u128>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    odometer: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    fuel: Option<u8>,
}

/// One engine call parsed from a CSV row.
#[derive(Debug)]
enum Call {
    Create {
        guest: AccountId,
        car: CarId,
        window: TimeWindow,
        currency: Currency,
        amount: u128,
    },
    Approve(AccountId, TripId),
    Reject(AccountId, TripId),
    CheckInHost(AccountId, TripId, Option<HandoverReading>),
    CheckInGuest(AccountId, TripId, Option<HandoverReading>),
    CheckOutGuest(AccountId, TripId, Option<HandoverReading>),
    CheckOutHost(AccountId, TripId, Option<HandoverReading>),
    Finish(AccountId, TripId),
    Confirm(AccountId, TripId),
}

impl CsvRecord {
    /// Converts a CSV record into an engine call.
    ///
    /// Returns `None` for unknown ops or rows missing a required field.
    fn into_call(self) -> Option<Call> {
        let actor = AccountId(self.actor);
        let trip = self.trip.map(TripId);
        let reading = match (self.odometer, self.fuel) {
            (Some(odometer), Some(fuel_level)) => Some(HandoverReading {
                odometer,
                fuel_level,
            }),
            _ => None,
        };

        match self.op.to_lowercase().as_str() {
            "create" => Some(Call::Create {
                guest: actor,
                car: CarId(self.car?),
                window: TimeWindow::new(self.start?, self.end?),
                currency: self.currency?,
                amount: self.amount?,
            }),
            "approve" => Some(Call::Approve(actor, trip?)),
            "reject" => Some(Call::Reject(actor, trip?)),
            "checkin_host" => Some(Call::CheckInHost(actor, trip?, reading)),
            "checkin_guest" => Some(Call::CheckInGuest(actor, trip?, reading)),
            "checkout_guest" => Some(Call::CheckOutGuest(actor, trip?, reading)),
            "checkout_host" => Some(Call::CheckOutHost(actor, trip?, reading)),
            "finish" => Some(Call::Finish(actor, trip?)),
            "confirm" => Some(Call::Confirm(actor, trip?)),
            _ => None,
        }
    }
}

fn dispatch(engine: &Engine, call: Call) -> Result<(), EngineError> {
    match call {
        Call::Create {
            guest,
            car,
            window,
            currency,
            amount,
        } => engine
            .create_trip_request(guest, car, window, currency, amount)
            .map(|_| ()),
        Call::Approve(actor, trip) => engine.approve_trip_request(actor, trip).map(|_| ()),
        Call::Reject(actor, trip) => engine.reject_trip_request(actor, trip),
        Call::CheckInHost(actor, trip, reading) => engine.check_in_by_host(actor, trip, reading),
        Call::CheckInGuest(actor, trip, reading) => engine.check_in_by_guest(actor, trip, reading),
        Call::CheckOutGuest(actor, trip, reading) => {
            engine.check_out_by_guest(actor, trip, reading)
        }
        Call::CheckOutHost(actor, trip, reading) => {
            engine.check_out_by_host(actor, trip, reading)
        }
        Call::Finish(actor, trip) => engine.finish_trip(actor, trip),
        Call::Confirm(actor, trip) => engine.confirm_check_out(actor, trip),
    }
}

/// Replays trip operations from a CSV reader against the engine.
///
/// Parsing streams, so arbitrarily large operation logs replay in constant
/// memory. Malformed rows, unknown ops, and calls the engine refuses are
/// skipped; a refused call reverts fully, so the replay simply continues
/// with the next row.
///
/// # CSV Format
///
/// Expected columns: `op, actor, trip, car, start, end, currency, amount, odometer, fuel`
/// - `op`: create, approve, reject, checkin_host, checkin_guest,
///   checkout_guest, checkout_host, finish, confirm
/// - `actor`: account id making the call
/// - `trip`: trip id (every op except create)
/// - `car`, `start`, `end`, `currency`, `amount`: create only
/// - `odometer`, `fuel`: optional handover readings for check-ins/outs
///
/// # Example
///
/// ```csv
/// op,actor,trip,car,start,end,currency,amount
/// create,1,,7,1700000000,1700086400,usd,1700
/// approve,2,1,,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_operations<R: Read>(engine: &Engine, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " approve "
        .flexible(true) // Allow short rows for ops without trailing fields
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(call) = record.into_call() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid operation record");
                    continue;
                };

                if let Err(e) = dispatch(engine, call) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping refused call: {}", e);
                }
            }
            Err(e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    account: AccountId,
    currency: Currency,
    balance_minor: u128,
    balance_units: String,
}

/// Write payout balances to a CSV writer.
///
/// Columns: `account, currency, balance_minor, balance_units`. Amounts still
/// held in escrow are not balances and do not appear here; they show up in
/// the trips report as `held` escrows.
pub fn write_balances<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for (account, currency, balance) in engine.balances() {
        wtr.serialize(BalanceRow {
            account,
            currency,
            balance_minor: balance,
            balance_units: currency
                .to_decimal(balance)
                .map(|units| units.to_string())
                .unwrap_or_else(|| balance.to_string()),
        })?;
    }

    wtr.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct TripRow {
    trip_id: TripId,
    car_id: CarId,
    host: AccountId,
    guest: AccountId,
    start: i64,
    end: i64,
    status: TripStatus,
    currency: Currency,
    amount_received: u128,
    total_usd_cents: u64,
    escrow: &'static str,
}

/// Write every trip to a CSV writer, ascending by trip id.
pub fn write_trips<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for trip in engine.trips() {
        let escrow = match engine.escrow(trip.trip_id) {
            Some(record) if record.is_held() => "held",
            Some(record) => match record.disposition {
                trip_ledger_rs::Disposition::Refunded { .. } => "refunded",
                _ => "disbursed",
            },
            None => "missing",
        };
        wtr.serialize(TripRow {
            trip_id: trip.trip_id,
            car_id: trip.car_id,
            host: trip.host,
            guest: trip.guest,
            start: trip.window.start,
            end: trip.window.end,
            status: trip.status,
            currency: trip.settlement_currency,
            amount_received: trip.amount_received,
            total_usd_cents: trip.pricing.total().map(|t| t.cents()).unwrap_or(0),
            escrow,
        })?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write the transition event log to a CSV writer, oldest first.
pub fn write_events<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for event in engine.events() {
        wtr.serialize(&event)?;
    }

    wtr.flush()?;
    Ok(())
}
