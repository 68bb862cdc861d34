//! Credit ledger HTTP API service.
//!
//! This crate provides the HTTP surface over the credit ledger store:
//!
//! - Order creation and finalization
//! - Wallet balances, ledgers and plan top-ups
//! - Usage metering against the pricing rules
//! - Pricing rule management and sales reports
//!
//! # Roles
//!
//! Callers are authenticated upstream. Employee-only routes require the
//! `X-Role: employee` header, see [`auth::EmployeeRole`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Health handler has nothing to await

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metering;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use metering::{meter_usage, MeteredUsage, UsageReport};
pub use routes::create_router;
pub use state::AppState;
