//! Command-line argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{Config, ConnectionKind};

/// Offline course content synchronization CLI.
#[derive(Parser, Debug)]
#[command(
    name = "offline-sync",
    version,
    about = "Download course content for offline use",
    long_about = "A CLI tool to download, track and remove course content for offline use.\n\n\
                  Course structures are read from a JSON file; download state is kept in a \
                  local record store so interrupted downloads can be resumed."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file.
    #[arg(short, long, default_value = "offline-sync.toml", global = true)]
    pub config: PathBuf,

    /// JSON file holding course structures.
    #[arg(
        short,
        long,
        env = "OFFLINE_SYNC_STRUCTURE",
        default_value = "courses.json",
        global = true
    )]
    pub structure: PathBuf,

    /// Base directory for downloads.
    #[arg(short = 'd', long = "directory", env = "OFFLINE_SYNC_DIR", global = true)]
    pub download_directory: Option<PathBuf>,

    /// Path of the download record store.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Only download over Wi-Fi.
    #[arg(long, global = true, conflicts_with = "allow_cellular")]
    pub wifi_only: bool,

    /// Allow downloads over mobile data.
    #[arg(long, global = true)]
    pub allow_cellular: bool,

    /// Network connection to assume.
    #[arg(long, value_enum, env = "OFFLINE_SYNC_CONNECTION", global = true)]
    pub connection: Option<ConnectionArg>,

    /// Number of concurrent downloads.
    #[arg(short = 'j', long, global = true)]
    pub workers: Option<usize>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a whole course or selected blocks.
    Download {
        #[command(flatten)]
        target: TargetArgs,

        /// Retry blocks whose previous download failed.
        #[arg(long)]
        retry: bool,

        /// Answer yes to confirmation prompts.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the download state of a course.
    Status {
        /// Course id.
        #[arg(long)]
        course: String,
    },

    /// Cancel queued or running downloads.
    Cancel {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Delete downloaded files.
    Remove {
        #[command(flatten)]
        target: TargetArgs,

        /// Answer yes to confirmation prompts.
        #[arg(short, long)]
        yes: bool,
    },

    /// Resume downloads interrupted by an earlier run.
    Recover,
}

/// Which course, and optionally which blocks, a command applies to.
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// Course id.
    #[arg(long)]
    pub course: String,

    /// Block ids, comma separated. The whole course when omitted.
    #[arg(short, long, value_delimiter = ',', num_args = 1..)]
    pub blocks: Vec<String>,

    /// Only consider video blocks.
    #[arg(long)]
    pub video_only: bool,
}

impl TargetArgs {
    pub fn is_whole_course(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// CLI connection argument.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConnectionArg {
    /// Connected over Wi-Fi.
    Wifi,
    /// Connected over mobile data.
    Cellular,
    /// No connection.
    Offline,
}

impl From<ConnectionArg> for ConnectionKind {
    fn from(arg: ConnectionArg) -> Self {
        match arg {
            ConnectionArg::Wifi => ConnectionKind::Wifi,
            ConnectionArg::Cellular => ConnectionKind::Cellular,
            ConnectionArg::Offline => ConnectionKind::Offline,
        }
    }
}

impl Args {
    /// Merge CLI arguments into an existing config, overriding where specified.
    pub fn merge_into_config(&self, config: &mut Config) {
        if let Some(dir) = &self.download_directory {
            config.storage.download_directory = Some(dir.clone());
        }

        if let Some(store) = &self.store {
            config.storage.store_path = Some(store.clone());
        }

        if let Some(connection) = self.connection {
            config.network.connection = connection.into();
        }

        if let Some(workers) = self.workers {
            config.workers.parallelism = workers;
        }

        // Boolean flags (only override if set)
        if self.wifi_only {
            config.preferences.wifi_only = true;
        }

        if self.allow_cellular {
            config.preferences.wifi_only = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_command() {
        let args = Args::try_parse_from([
            "offline-sync",
            "download",
            "--course",
            "course-v1:edX+DemoX",
            "--blocks",
            "a,b",
            "--yes",
            "--connection",
            "cellular",
        ])
        .unwrap();

        match &args.command {
            Command::Download { target, retry, yes } => {
                assert_eq!(target.course, "course-v1:edX+DemoX");
                assert_eq!(target.blocks, vec!["a", "b"]);
                assert!(!retry);
                assert!(yes);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_merge_into_config() {
        let args = Args::try_parse_from([
            "offline-sync",
            "status",
            "--course",
            "c1",
            "--allow-cellular",
            "--connection",
            "offline",
            "-j",
            "5",
            "-d",
            "/tmp/offline",
        ])
        .unwrap();

        let mut config = Config::default();
        args.merge_into_config(&mut config);

        assert!(!config.preferences.wifi_only);
        assert_eq!(config.network.connection, ConnectionKind::Offline);
        assert_eq!(config.workers.parallelism, 5);
        assert_eq!(
            config.storage.download_directory,
            Some(PathBuf::from("/tmp/offline"))
        );
    }

    #[test]
    fn test_wifi_flags_conflict() {
        let result = Args::try_parse_from([
            "offline-sync",
            "recover",
            "--wifi-only",
            "--allow-cellular",
        ]);
        assert!(result.is_err());
    }
}
