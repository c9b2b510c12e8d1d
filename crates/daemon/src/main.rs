use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drivefs_daemon::state::AppState;

mod cli;

use cli::op::{Op, OpContext};
use cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A broken config file is reported by the command itself
    let log_dir = AppState::load(args.dir.clone())
        .ok()
        .and_then(|state| state.config.log_dir);
    let _guard = init_logging(args.verbose, args.fuse_debug, log_dir.as_deref())?;

    let ctx = OpContext {
        config_path: args.dir.clone(),
        client_id: args.client_id.clone(),
        client_secret: args.client_secret.clone(),
    };

    let output = args
        .command
        .execute(&ctx)
        .await
        .context("drivefs command failed")?;
    println!("{}", output);
    Ok(())
}

/// stderr logging, plus a daily rolling file when `log_dir` is set
///
/// The returned guard flushes the file writer and must outlive the command.
fn init_logging(
    verbose: bool,
    fuse_debug: bool,
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "info" };
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let filter = log_filter(base, fuse_debug)?;
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "drivefs.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            Ok(None)
        }
    }
}

/// `--fuse-debug` raises the FUSE adapter to trace on top of `base`
fn log_filter(base: EnvFilter, fuse_debug: bool) -> anyhow::Result<EnvFilter> {
    if !fuse_debug {
        return Ok(base);
    }
    Ok(base.add_directive("drivefs_daemon::fuse=trace".parse()?))
}
