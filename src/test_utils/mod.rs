//! Test utilities.
//!
//! - Factories for valid fixtures with override closures
//! - In-memory repositories mirroring the PostgreSQL locking and constraints
//! - Scriptable fakes for the payment provider and face service
//! - `TestAppStateBuilder` for route tests

mod app_state_builder;
mod checkin_mocks;
mod factories;
mod gateway_mocks;
mod ledger_mocks;
mod reconciliation_mocks;

pub use app_state_builder::*;
pub use checkin_mocks::*;
pub use factories::*;
pub use gateway_mocks::*;
pub use ledger_mocks::*;
pub use reconciliation_mocks::*;
