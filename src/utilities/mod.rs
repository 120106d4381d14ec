//! Ambient utilities: errors, logging, storage paths, rate limiting.

pub mod errors;
pub mod logger;
pub mod paths;
pub mod printer;
pub mod rpm_controller;

pub use errors::OkamiError;
pub use logger::{init_logging, Logger};
pub use rpm_controller::{RpmController, RpmRegistry};
