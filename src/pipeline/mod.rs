//! Pipeline module - dataset loading, batch runner and accuracy reporting.

mod accuracy;
mod dataset;
mod runner;

pub use accuracy::*;
pub use dataset::*;
pub use runner::*;
