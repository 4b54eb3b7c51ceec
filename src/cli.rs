//! Command-line arguments

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use shellcache_worker::fetch::Method;
use std::path::PathBuf;

/// Versioned asset cache for application shells.
///
/// Installs a build manifest into a durable cache, reconciles it against the
/// previous version, and serves requests from it.
#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "SHELLCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the configured manifest, then activate it unless waiting is required
    Upgrade,
    /// Activate an installed version that is waiting
    Activate,
    /// Run one request through the cache
    Get(GetArgs),
    /// Cache every manifest entry for offline use
    Offline,
    /// Show what the cache holds
    Status,
    /// Delete every cached entry and the manifest record
    Purge,
}

#[derive(clap::Args, Debug)]
pub struct GetArgs {
    /// Absolute URL to request
    pub url: String,

    /// Request method
    #[arg(short, long, value_enum, default_value_t = MethodArg::Get)]
    pub method: MethodArg,

    /// Write the body here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodArg {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}
impl From<MethodArg> for Method {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Get => Self::Get,
            MethodArg::Head => Self::Head,
            MethodArg::Post => Self::Post,
            MethodArg::Put => Self::Put,
            MethodArg::Patch => Self::Patch,
            MethodArg::Delete => Self::Delete,
            MethodArg::Options => Self::Options,
        }
    }
}
