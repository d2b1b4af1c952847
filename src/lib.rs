//! # Options Scalper
//!
//! A real-time momentum scalping engine for micro futures options.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Error taxonomy shared by all components
//! - `gateway`: Broker capabilities (outbound client, inbound event sink) and the paper gateway
//! - `strategy`: Price feed, momentum classification, strikes, stops, position and order lifecycle
//! - `risk`: Session stats and entry gates
//! - `engine`: Guarded session state and the scalping loop
//! - `identity`: Client id allocation shared across processes
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{ScalperError, ScalperResult};
