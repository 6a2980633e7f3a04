use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[clap(about = "Fetch weather briefing graphics and text products")]
pub struct Cli {
    #[clap(long, help = "Log level", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    #[clap(long, help = "Directory the products are written to", default_value = "temp")]
    pub output_dir: PathBuf,

    #[clap(long, help = "JSON catalog replacing the built-in product list")]
    pub catalog: Option<PathBuf>,

    #[clap(long, help = "Only fetch these product ids (enables disabled ones)")]
    pub only: Vec<String>,

    #[clap(long, help = "Skip these product ids")]
    pub skip: Vec<String>,

    #[clap(long, help = "Timeout for a single transfer, in seconds", default_value = "30")]
    pub timeout_secs: u64,

    #[clap(long, help = "Connect timeout, in seconds", default_value = "10")]
    pub connect_timeout_secs: u64,

    #[clap(
        long,
        help = "User agent sent with HTTP requests",
        default_value = concat!("wxbrief-fetch/", env!("CARGO_PKG_VERSION"))
    )]
    pub user_agent: String,

    #[clap(long, help = "Print the effective catalog as JSON and exit")]
    pub print_catalog: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl From<LogLevel> for slog::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => slog::Level::Error,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Debug => slog::Level::Debug,
        }
    }
}
