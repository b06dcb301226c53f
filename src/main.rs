#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use directories_next::ProjectDirs;
use structopt::StructOpt;

use vista_bridge::context::RelayerContext;
use vista_bridge::store::SledStore;
use vista_bridge::{config, service};

/// Package identifier, where the default database is kept when the user
/// does not start the relay with `--config-dir`.
const PACKAGE_ID: [&str; 3] = ["io", "vistalabs", "vista-bridge"];

/// The VISTA Bridge Relay Command-line tool
///
/// Start the bridge from the environment, with optional config files:
///
///     $ vista-bridge -vvv -c <CONFIG_DIR>
#[derive(StructOpt)]
#[structopt(name = "VISTA Bridge Relay")]
struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    verbose: i32,
    /// Directory that contains configuration files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    config_dir: Option<PathBuf>,
    /// Create the database store in a temporary directory that is deleted
    /// when the process exits.
    #[structopt(long)]
    tmp: bool,
}

#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    let config = config::load(args.config_dir.as_ref())
        .context("failed to load the bridge configuration")?;
    let store = create_store(&args).await?;
    let ctx = RelayerContext::new(config)?;
    let ignition = service::ignite(ctx.clone(), store);

    tokio::select! {
        result = ignition => {
            if let Err(e) = result {
                tracing::error!("bridge relay stopped: {}", e);
                ctx.shutdown();
                std::process::exit(1);
            }
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => {
                    tracing::warn!("Shutting down...");
                    // send shutdown signal to all of the application.
                    ctx.shutdown();
                    tracing::info!("Clean Exit ..");
                }
                Err(e) => {
                    tracing::error!(
                        "Unable to listen for shutdown signal: {}",
                        e
                    );
                    ctx.shutdown();
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let directive = format!("vista_bridge={}", log_level)
        .parse()
        .expect("valid log level");
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(directive);
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .init();
    Ok(())
}

async fn create_store(opts: &Opts) -> anyhow::Result<SledStore> {
    // check if we shall use a throwaway store.
    if opts.tmp {
        tracing::debug!("Using temp dir for store");
        let store = SledStore::temporary()?;
        return Ok(store);
    }
    let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get the default data directory")?;
    let p = match opts.config_dir.as_ref() {
        Some(p) => p.to_path_buf(),
        None => dirs.data_local_dir().to_path_buf(),
    };
    let db_path = match opts.config_dir.as_ref().zip(p.parent()) {
        Some((_, parent)) => parent.join("store"),
        None => p.join("store"),
    };
    let store = SledStore::open(db_path)?;
    Ok(store)
}
