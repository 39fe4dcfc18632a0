//! Screener for B3 equities suited to the options wheel strategy.
//!
//! Data comes from the OpLab API through a rate-limited, cached client
//! ([`client::OpLabClient`]); candidates are scored by [`scorer`] and ranked
//! by the [`screening::Screener`] pipeline.

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod scorer;
pub mod screening;
pub mod types;

#[cfg(test)]
mod test_support;
