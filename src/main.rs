//! offline-sync - CLI entry point.

use std::collections::{HashMap, HashSet};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{fmt, EnvFilter};

use offline_sync::{
    analytics::TracingAnalytics,
    cli::{Args, Command, TargetArgs},
    config::{validate_config, Config},
    course::JsonStructureSource,
    download::{HttpTransfer, PoolEvent},
    error::{exit_codes, Error, Result},
    output::{
        create_item_bar, format_size, print_banner, print_config_summary, print_course_status,
        print_decision, print_error, print_info, print_success, print_summary, print_warning,
    },
    store::{DownloadStore, MemoryStore},
    sync::{CancelTarget, Decision, OfflineSync, PolicyDecision, RemovalTarget, SyncServices},
    system::{DiskStorage, StaticNetwork},
};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(e) => {
            print_error(&format!("{}", e));
            match e {
                Error::Config(_)
                | Error::ConfigValidation { .. }
                | Error::MissingConfig(_)
                | Error::TomlParse(_) => ExitCode::from(exit_codes::CONFIG_ERROR as u8),
                e if e.is_preflight() => ExitCode::from(exit_codes::BLOCKED as u8),
                Error::CancelledByUser => ExitCode::from(exit_codes::ABORT as u8),
                Error::TransferFailed { .. } | Error::StructureUnavailable(_) | Error::Http(_) => {
                    ExitCode::from(exit_codes::DOWNLOAD_ERROR as u8)
                }
                _ => ExitCode::from(exit_codes::UNEXPECTED_ERROR as u8),
            }
        }
    }
}

async fn run() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt().with_env_filter(filter).with_target(false).init();

    print_banner();

    // Load configuration
    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        print_warning(&format!(
            "Configuration file not found: {}",
            args.config.display()
        ));
        print_info("Using default configuration with CLI arguments");
        Config::default()
    };

    args.merge_into_config(&mut config);
    validate_config(&config)?;

    print_config_summary(
        &config.download_directory().display().to_string(),
        &config.network.connection.to_string(),
        config.preferences.wifi_only,
        config.workers.parallelism,
    );

    let store: Arc<dyn DownloadStore> = Arc::new(MemoryStore::open(&config.store_path()).await?);
    let services = SyncServices {
        store: Arc::clone(&store),
        source: Arc::new(JsonStructureSource::new(args.structure.clone())),
        transfer: Arc::new(HttpTransfer::new(&config.workers)?),
        network: Arc::new(StaticNetwork::new(config.network.connection)),
        storage: Arc::new(DiskStorage::new(config.download_directory())),
        analytics: Arc::new(TracingAnalytics),
    };
    let engine = OfflineSync::new(&config, services);

    let result = match args.command {
        Command::Download { target, retry, yes } => download(&engine, &target, retry, yes).await,
        Command::Status { course } => {
            let snapshot = engine.course_status(&course).await?;
            print_course_status(&course, &snapshot);
            Ok(())
        }
        Command::Cancel { target } => cancel(&engine, target).await,
        Command::Remove { target, yes } => remove(&engine, target, yes).await,
        Command::Recover => recover(&engine, store.as_ref()).await,
    };

    engine.shutdown().await;
    result
}

async fn download(engine: &OfflineSync, target: &TargetArgs, retry: bool, yes: bool) -> Result<()> {
    let mut events = engine.events();
    let decision = request(engine, target, retry).await?;
    print_decision(&decision);

    let task = match &decision.task {
        Some(task) => task.clone(),
        None => match &decision.decision {
            PolicyDecision::ConfirmRemoval(_) => {
                engine.dismiss(decision.handle)?;
                print_info("Everything requested is already downloaded; use `remove` to delete it");
                return Ok(());
            }
            policy if !policy.is_blocked() && !yes => {
                engine.dismiss(decision.handle)?;
                print_warning("Re-run with --yes to confirm");
                return Err(Error::CancelledByUser);
            }
            // Confirming re-runs the pre-flight checks, so a blocked request fails here.
            _ => engine.confirm_download(decision.handle).await?,
        },
    };

    if task.is_empty() {
        print_info("Nothing to download");
        return Ok(());
    }

    print_info(&format!("Downloading {} block(s)", task.accepted.len()));
    wait_for_downloads(engine, &mut events, task.accepted).await
}

async fn request(engine: &OfflineSync, target: &TargetArgs, retry: bool) -> Result<Decision> {
    if retry {
        engine.request_retry(&target.course, &target.blocks).await
    } else if target.is_whole_course() && !target.video_only {
        engine.request_course_download(&target.course).await
    } else if target.is_whole_course() {
        let roots = course_roots(engine, &target.course).await?;
        engine.request_download(&target.course, &roots, true).await
    } else {
        engine
            .request_download(&target.course, &target.blocks, target.video_only)
            .await
    }
}

/// Root block ids of a course, for whole-course requests that need leaf filtering.
async fn course_roots(engine: &OfflineSync, course_id: &str) -> Result<Vec<String>> {
    let index = engine.course_index(course_id).await?;
    Ok(index.root_ids())
}

async fn cancel(engine: &OfflineSync, target: TargetArgs) -> Result<()> {
    let cancelled = if target.is_whole_course() {
        engine.cancel_download(CancelTarget::Course(target.course)).await?
    } else {
        engine.cancel_download(CancelTarget::Blocks(target.blocks)).await?
    };

    print_success(&format!("Cancelled {} download(s)", cancelled.len()));
    Ok(())
}

async fn remove(engine: &OfflineSync, target: TargetArgs, yes: bool) -> Result<()> {
    let removal = if target.is_whole_course() {
        RemovalTarget::Course(target.course)
    } else {
        RemovalTarget::Blocks {
            course_id: target.course,
            block_ids: target.blocks,
        }
    };

    let decision = engine.request_removal(removal).await?;
    print_decision(&decision);

    if !yes {
        engine.dismiss(decision.handle)?;
        print_warning("Re-run with --yes to confirm");
        return Err(Error::CancelledByUser);
    }

    let removed = engine.confirm_removal(decision.handle).await?;
    print_success(&format!("Removed {} download(s)", removed));
    Ok(())
}

async fn recover(engine: &OfflineSync, store: &dyn DownloadStore) -> Result<()> {
    let mut events = engine.events();
    let interrupted: Vec<String> = store
        .get_all()
        .await?
        .into_iter()
        .filter(|r| r.state.is_waiting_or_downloading())
        .map(|r| r.id)
        .collect();

    let recovered = engine.recover_interrupted().await?;
    if recovered == 0 {
        print_info("No interrupted downloads");
        return Ok(());
    }

    print_info(&format!("Resuming {} download(s)", recovered));
    wait_for_downloads(engine, &mut events, interrupted).await
}

/// Follow worker events until every block in `block_ids` has finished.
async fn wait_for_downloads(
    engine: &OfflineSync,
    events: &mut broadcast::Receiver<PoolEvent>,
    block_ids: Vec<String>,
) -> Result<()> {
    let mut outstanding: HashSet<String> = block_ids.into_iter().collect();
    let mut received: HashMap<String, u64> = HashMap::new();
    let mut completed = 0;
    let mut cancelled = 0;
    let mut failures = Vec::new();

    let bar = create_item_bar(outstanding.len() as u64, "Downloading");

    while !outstanding.is_empty() {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {} download event(s), reconciling with store", skipped);
                let snapshot = engine.snapshot();
                let before = outstanding.len();
                outstanding.retain(|id| snapshot.block_state(id).is_waiting_or_downloading());
                bar.inc((before - outstanding.len()) as u64);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if !outstanding.contains(event.block_id()) {
            continue;
        }

        match &event {
            PoolEvent::Progress { block_id, downloaded, .. } => {
                received.insert(block_id.clone(), *downloaded);
                let total: u64 = received.values().sum();
                bar.set_message(format_size(total));
            }
            PoolEvent::Completed { block_id, bytes, .. } => {
                received.insert(block_id.clone(), *bytes);
                completed += 1;
            }
            PoolEvent::Failed { block_id, error, .. } => {
                bar.println(format!("Failed {}: {}", block_id, error));
                failures.push((block_id.clone(), error.clone()));
            }
            PoolEvent::Cancelled { .. } => cancelled += 1,
            PoolEvent::Started { .. } => {}
        }

        if event.is_terminal() {
            outstanding.remove(event.block_id());
            bar.inc(1);
        }
    }

    bar.finish_and_clear();
    print_summary(completed, failures.len(), cancelled);

    match failures.into_iter().next() {
        Some((block_id, cause)) => Err(Error::TransferFailed { block_id, cause }),
        None => Ok(()),
    }
}
