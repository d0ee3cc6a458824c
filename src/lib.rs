pub mod config;
pub mod dates;
pub mod error;
pub mod fill;
pub mod integrator;
pub mod loader;
pub mod report;
pub mod resampler;
pub mod stitcher;
pub mod storage;

pub use config::PipelineConfig;
pub use dates::{normalize_date, RawDate};
pub use error::IntegratorError;
pub use integrator::{integrate, run, IntegrationRun};
pub use report::IntegrationReport;
