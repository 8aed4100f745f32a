//! Workflow pipelines orchestrating the service layer.

pub mod scan;
pub mod sign;

pub use scan::{ScanOutcome, ScanWorkflow};
pub use sign::{SignInput, SignOutcome, SignWorkflow};
