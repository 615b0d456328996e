pub mod billing;
pub mod config;
pub mod error;
pub mod provisioning;
pub mod telemetry;

pub use billing::BillingService;
pub use error::{BillingError, BillingResult, ErrorKind};
