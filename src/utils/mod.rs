mod swap_buffer;

use colored::{ColoredString, Colorize};

pub use swap_buffer::SwapBuffer;

/// Helper function to format a boolean value as "Enabled" or "Disabled"
pub fn enabled(flag: bool) -> ColoredString {
    if flag {
        "Enabled".green()
    } else {
        "Disabled".red()
    }
}

/// Current unix timestamp in seconds
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Formats a quota amount for human facing messages
pub fn display_quota(quota: i64) -> String {
    format!("{} quota", quota)
}
