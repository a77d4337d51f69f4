use clap::Parser;
use filesync_core::paths;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the default state directory inside the synchronized directory.
pub const DEFAULT_STATE_DIR: &str = ".filesync";

#[derive(Parser, Debug)]
#[command(name = "filesync-daemon")]
#[command(about = "Keeps text files in agreement with their CRDT documents")]
pub struct Args {
    /// Directory holding the synchronized files
    #[arg(short, long, env = "FILESYNC_DIR")]
    pub dir: PathBuf,

    /// File to synchronize (repeatable)
    #[arg(short, long = "file", required = true)]
    pub files: Vec<String>,

    /// Seconds between sync passes (0 runs a single pass and exits)
    #[arg(short, long, default_value_t = 10)]
    pub interval: u64,

    /// Where cache records and document snapshots are kept
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub dir: PathBuf,
    pub files: Vec<String>,
    /// `None` means a single pass
    pub interval: Option<Duration>,
    pub state_dir: PathBuf,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if !args.dir.is_dir() {
            return Err(ConfigError::DirectoryNotFound(args.dir));
        }
        if args.files.is_empty() {
            return Err(ConfigError::NoFiles);
        }
        if let Some(bad) = args.files.iter().find(|name| !paths::is_syncable(name)) {
            return Err(ConfigError::InvalidFileName(bad.clone()));
        }

        let mut files = args.files;
        files.sort();
        files.dedup();

        let state_dir = args
            .state_dir
            .unwrap_or_else(|| args.dir.join(DEFAULT_STATE_DIR));
        let interval = (args.interval > 0).then(|| Duration::from_secs(args.interval));

        Ok(Self {
            dir: args.dir,
            files,
            interval,
            state_dir,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Directory not found: {0:?}")]
    DirectoryNotFound(PathBuf),

    #[error("No files to synchronize")]
    NoFiles,

    #[error("Cannot synchronize {0:?}: must be a plain, non-hidden file name")]
    InvalidFileName(String),
}
