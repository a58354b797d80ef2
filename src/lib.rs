pub mod aws;
pub mod browser;
pub mod cli;
pub mod commands;
pub mod config;
pub mod constants;
pub mod error;
pub mod orchestrator;
pub mod persist;
pub mod secret;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
