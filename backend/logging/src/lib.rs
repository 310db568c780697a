//! Structured logging for parley.

pub mod logger;

pub use logger::init_logger;
