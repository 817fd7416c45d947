pub mod config;
pub mod types;

pub use config::SwapConfig;
pub use types::*;
