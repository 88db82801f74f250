use std::{path::PathBuf, sync::LazyLock};

use clap::Parser;

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod persistence;
pub mod router;
pub mod services;
pub mod types;
pub mod utils;

pub const IS_DEBUG: bool = cfg!(debug_assertions);

pub static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    format!(
        "v{} by {}\n| profile: {}\n| store: {}\n| cache: {}",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_AUTHORS"),
        if IS_DEBUG { "debug" } else { "release" },
        if cfg!(feature = "db") { "memory, database" } else { "memory" },
        if cfg!(feature = "redis") { "local, redis" } else { "local" },
    )
});

pub const FIG: &str = r#"
  ____              __       _____     __     
 / __ \__ _____ ___/ /____ _/ ___/__ _/ /____ 
/ /_/ / // / _ \/ _  / __ `/ (_ / _ `/ __/ -_)
\___\_\_,_/\___/\_,_/\__,_/\___/\_,_/\__/\__/ 
"#;

/// Header for the application
pub static BANNER: LazyLock<String> = LazyLock::new(|| format!("{}\n{}", FIG, *VERSION_INFO));

/// Command line arguments for the application
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Alternative config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory for rolling log files
    #[arg(short, long, default_value = "log")]
    pub log_dir: PathBuf,
}
