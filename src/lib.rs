//! crossarb library
//!
//! Streams spot tickers from Binance, CEX.IO and Gate.io, keeps a
//! cross-venue price table and reports fee-adjusted arbitrage.

pub mod arbitrage;
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod risk;
pub mod types;
