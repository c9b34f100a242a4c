//! Domain module - core record types and error taxonomy

pub mod course;
pub mod errors;

pub use course::{Course, RawCourse};
pub use errors::HarvestError;
