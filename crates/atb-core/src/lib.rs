//! Core domain + application logic for the account-trading bot.
//!
//! This crate is intentionally framework-agnostic. The Telegram bot API and
//! the MTProto user-account client live behind ports (traits) implemented in
//! adapter crates.

pub mod config;
pub mod convo;
pub mod domain;
pub mod errors;
pub mod forward;
pub mod logging;
pub mod otp;
pub mod ports;
pub mod store;
pub mod validate;
pub mod window;

pub use errors::{Error, Result};
