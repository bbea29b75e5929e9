pub mod config;
pub mod errors;
pub mod logging;
pub mod sort;

pub use crate::config::AppConfig;
pub use crate::errors::{AppError, Result};
pub use crate::sort::SortMode;
