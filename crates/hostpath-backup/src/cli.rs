//! Command line arguments
//!

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::{config::Config, naming::NameTemplate, orchestrator::RunOptions, scaler::ScaleSettings};

/// Back up and restore the host path volumes of a release.
#[derive(Debug, Parser)]
#[command(name = "hostpath-backup", version, about, long_about = None)]
pub struct Cli {
    /// What to do, backup when not given.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// The release's namespace.
    #[arg(short, long, global = true, default_value = "default")]
    pub namespace: String,

    /// The release name, matched against the `app.kubernetes.io/instance` label.
    #[arg(short, long, global = true)]
    pub release: Option<String>,

    /// The config file.
    #[arg(long, global = true, default_value = "./config.toml")]
    pub config: PathBuf,

    /// A kubeconfig file, the default client config is used without one.
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// A json file of remote store credentials, archives stay local without one.
    #[arg(long, global = true)]
    pub remote_credentials: Option<PathBuf>,

    /// The archive name template.
    #[arg(short = 'o', long, global = true)]
    pub output_format: Option<String>,

    /// The directory archives are written to.
    #[arg(short = 'd', long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Remote copies kept per claim, zero keeps all.
    #[arg(long, global = true)]
    pub keep_last: Option<usize>,

    /// Log what would happen without changing anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Log each step.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Back up every claim of the release.
    Backup,

    /// Restore archives into the release's claims.
    Restore {
        /// Archive paths, or remote keys with remote credentials. Without any the newest remote
        /// archive of each claim is restored.
        archives: Vec<String>,
    },

    /// Write the default config file.
    Init,
}

impl Cli {
    /// The subcommand, backup when none is given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Backup)
    }

    /// Override config values with the values given on the command line.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(output_format) = &self.output_format {
            config.output_format = NameTemplate::new(output_format.clone());
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_directory = output_dir.clone();
        }
        if let Some(keep_last) = self.keep_last {
            config.keep_last = keep_last;
        }

        config
    }

    /// The options for a backup or restore run.
    pub fn run_options(&self, config: &Config) -> Result<RunOptions, MissingRelease> {
        let release = self.release.clone().ok_or(MissingRelease)?;

        Ok(RunOptions {
            namespace: self.namespace.clone(),
            release,
            template: config.output_format.clone(),
            output_directory: config.output_directory.clone(),
            keep_last: config.keep_last,
            dry_run: self.dry_run,
            scale: ScaleSettings::from(&config.scale),
        })
    }
}

/// A run was requested without a release.
#[derive(Debug, Error)]
#[error("A release is required, pass --release")]
pub struct MissingRelease;
