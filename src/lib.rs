//! cellcredit - Subscriber Credit Ledger & SMS Credit Transfer
//!
//! Prepaid credit accounting for a small-cell network whose balances
//! replicate between cell sites and the cloud as PN-Counter CRDTs.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (Imsi, RawAmount)
//! - [`money`] - Currency parsing and display
//! - [`crdt`] - PN-Counter CRDT
//! - [`clock`] - Injectable time source
//! - [`subscriber`] - Ledger, status and directory stores, cloud sync
//! - [`denomination`] - Top-up amount → validity days policy
//! - [`credit_transfer`] - Two-phase SMS transfer protocol and settlement journal
//! - [`sms`] - Outbound SMS transport
//! - [`db`] - PostgreSQL connection and schema
//! - [`gateway`] - HTTP intake
//! - [`config`] / [`logging`] - Service configuration and tracing setup

// Core types - must be first!
pub mod core_types;

pub mod clock;
pub mod crdt;
pub mod money;

// Stores and policy
pub mod denomination;
pub mod subscriber;

// Protocol
pub mod credit_transfer;
pub mod sms;

// Service
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use core_types::{Imsi, RawAmount};
pub use credit_transfer::{CreditTransferEngine, Stores, TransferError, TransferReply, TransferSettings};
pub use crdt::PNCounter;
pub use money::{Currency, Money, MoneyError};
