//! The `utils` module collects the pieces every other module leans on:
//! the error taxonomy of the bus and the logging bootstrap.

pub mod error;
pub mod logging;
