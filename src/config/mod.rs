// Re-export all items from submodules
mod constants;
mod gateway_config;

pub use constants::*;
pub use gateway_config::*;
