mod config;
mod error;
mod manager;
mod pricing;
mod report;
mod scheduler;

pub use config::{default_projects_dir, EngineConfig};
pub use error::EngineError;
pub use manager::{ProcessOutcome, SessionManager};
pub use pricing::{ModelPrice, PriceEntry, PricingLookup, StaticPricing};
pub use report::{ScanReport, ScanStatus};
pub use scheduler::{ScanScheduler, SchedulerHandle};
