//! Streaming Response Parser
//!
//! Turns the model's incrementally arriving text into batch control calls.

mod response;

pub use response::ResponseParser;

#[cfg(test)]
mod scenarios;
