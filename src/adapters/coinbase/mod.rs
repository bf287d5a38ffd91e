//! Coinbase Exchange adapter
//!
//! REST account/order client, request signing and connection configuration.

pub mod config;
pub mod rest;
pub mod signing;

pub use config::{CoinbaseConfig, CoinbaseCredentials};
pub use rest::CoinbaseRestClient;
