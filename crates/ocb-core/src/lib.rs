//! Core domain + application logic for the archive OCR Telegram bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the online OCR
//! service live behind ports (traits) implemented in adapter crates.

pub mod archive;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod images;
pub mod intake;
pub mod job;
pub mod logging;
pub mod messaging;
pub mod ocr;
pub mod processor;
pub mod queue;
pub mod settings;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
