pub mod config;
pub mod dataset;
pub mod error;
pub mod query;
pub mod reloader;
pub mod resample;
pub mod server;
pub mod shutdown;
pub mod stations;
pub mod stats;
pub mod time;

pub use dataset::{Dataset, DatasetHandle, Variable};
pub use error::{AppError, Result};
pub use query::{QueryService, Request};
