// Typhoon - HTTP load generator library

pub mod config;
pub mod error;
pub mod handler;
pub mod mock_server;
pub mod record;
pub mod report;
pub mod typhoon;

pub use config::{Config, ConfigFile};
pub use error::{Error, Result};
pub use handler::{CapturedResponse, ResponseHandler};
pub use record::{AttemptError, Record};
pub use report::Report;
pub use typhoon::{http_get, StopHandle, Typhoon};
