//! Core domain + application logic for the Confidant bot.
//!
//! This crate is framework-agnostic. Telegram, the SQL store and the completion
//! provider live behind ports (traits) implemented in adapter crates.

pub mod completion;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod maintenance;
pub mod messaging;
pub mod pipeline;
pub mod ports;
pub mod quota;
pub mod referral;
pub mod replies;
pub mod safety;

pub use errors::{Error, Result};
