pub mod config;
pub mod error;
pub mod pipeline;
pub mod record;

pub use config::PipelineConfig;
pub use error::TaplineError;
pub use pipeline::{Receiver, Sender};
pub use record::LogRecord;
