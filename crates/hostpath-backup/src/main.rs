//! # hostpath-backup
//! Backs up and restores the host path volumes of a release.
//!

use std::{fs, process::ExitCode};

use clap::Parser;
use hostpath_backup::{
    Config, Context, LoadConfigError, Orchestrator, RemoteCredentials, RunError,
    cli::{Cli, Command},
    cluster::KubeCluster,
    remote::RemoteStore,
};
use mimalloc::MiMalloc;
use shared::{Failure, init_logger};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command();

    // Initialize config.
    if command == Command::Init {
        let config = Config::default();
        let contents =
            toml::to_string_pretty(&config).or_log_and_panic("Could not serialize config file");
        fs::write(&cli.config, contents).or_log_and_panic("Could not create config file");
        return ExitCode::SUCCESS;
    }

    // Load config, a missing file means defaults.
    let (config, config_error) = match Config::load_toml(cli.config.clone()) {
        Ok(config) => (config, None),
        Err(LoadConfigError::NoFile) => (Config::default(), None),
        Err(error) => (Config::default(), Some(error)),
    };
    let config = cli.apply(config);

    let _logger = init_logger(&config.logging.directory, cli.verbose)
        .or_log_and_panic("Could not initialize logger");

    if let Some(error) = config_error {
        error!("Could not load config: {error}");
        return ExitCode::FAILURE;
    }

    let options = match cli.run_options(&config) {
        Ok(options) => options,
        Err(error) => {
            error!("{error}");
            return ExitCode::FAILURE;
        }
    };
    let mut context = Context::new(&options.namespace, &options.release, cli.verbose);

    let cluster = match KubeCluster::connect(cli.kubeconfig.as_deref()).await {
        Ok(cluster) => cluster,
        Err(error) => {
            error!("{context}Could not connect to the cluster: {error}");
            return ExitCode::FAILURE;
        }
    };

    let remote = match &cli.remote_credentials {
        Some(path) => {
            let store = RemoteCredentials::load_json(path.clone())
                .map_err(|error| error.to_string())
                .and_then(|credentials| {
                    RemoteStore::from_credentials(&credentials).map_err(|error| error.to_string())
                });

            match store {
                Ok(store) => Some(store),
                Err(error) => {
                    error!("{context}Could not create remote store: {error}");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => None,
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let orchestrator = Orchestrator::new(&cluster, remote.as_ref(), options, cancel);
    let result: Result<(), RunError> = match command {
        Command::Restore { archives } => orchestrator
            .restore(&mut context, &archives)
            .await
            .map(|_| ()),
        Command::Backup | Command::Init => orchestrator.backup(&mut context).await.map(|_| ()),
    };

    match result {
        Ok(()) => {
            info!("{context}Done");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!("{context}{error}");
            ExitCode::FAILURE
        }
    }
}

/// Cancel the run on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {error}");
            core::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                warn!("Could not listen for SIGTERM: {error}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => warn!("Received SIGINT, stopping after the current step"),
        () = terminate => warn!("Received SIGTERM, stopping after the current step"),
    }

    cancel.cancel();
}
