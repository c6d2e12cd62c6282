//! Probe execution and fan-out.

pub mod detection;
pub mod dispatcher;
pub mod executor;

pub use dispatcher::{Dispatcher, ProbePlan};
pub use executor::{ProbeExecutor, ProbeRequest, ProbeRunner};
