use anyhow::Context;
use clap::Parser;
use match_api_sync::SyncContext;
use match_api_sync::config::{RemoteConfig, SyncConfig, load_config};
use match_api_sync::fetch::HttpSource;
use match_api_sync::git::GitCli;
use match_api_sync::sync::SyncPipeline;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_CONFIG_PATH: &str = "match-api-sync.toml";

#[derive(clap::Parser)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(clap::Parser)]
enum Command {
    /// Write a config file with the default settings.
    Init {
        #[clap(long, default_value(DEFAULT_CONFIG_PATH))]
        config: PathBuf,
    },
    /// Mirror the remote API into the store directory and publish the changes.
    Run {
        /// Config file. Built-in defaults are used when it does not exist.
        #[clap(long, default_value(DEFAULT_CONFIG_PATH))]
        config: PathBuf,
        /// Git working tree that receives the documents.
        #[clap(long, default_value("."))]
        store_dir: PathBuf,
        /// Remote to push to, overriding the config file.
        #[clap(long)]
        remote_name: Option<String>,
        /// Token used to authenticate the push over https.
        #[clap(long, env = "MY_GIT_TOKEN", hide_env_values = true)]
        remote_token: Option<String>,
        /// Only report whether anything changed; do not commit or push.
        #[clap(long)]
        no_publish: bool,
        /// Log every git command.
        #[clap(long, short)]
        verbose: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.cmd {
        Command::Init { config } => {
            init_logging(false);
            if config.is_file() {
                println!("{} already exists, not doing anything with it", config.display());
            } else {
                SyncConfig::default()
                    .write(&config)
                    .context("cannot write config")?;
                println!("Created config file at {}", config.display());
            }
        }
        Command::Run {
            config,
            store_dir,
            remote_name,
            remote_token,
            no_publish,
            verbose,
        } => {
            init_logging(verbose);
            let config = load_or_default(&config)?;
            let remote = RemoteConfig {
                remote_name: remote_name.unwrap_or_else(|| config.remote_name.clone()),
                remote_token,
            };
            let source = HttpSource::new(&config.base_url, config.timeout(), config.max_body_bytes);
            let git = GitCli::lookup(&store_dir, remote)
                .ok_or_else(|| anyhow::anyhow!("git could not be found on PATH"))?;
            let ctx = SyncContext {
                config,
                store_dir,
                publish: !no_publish,
            };

            let pipeline = SyncPipeline::new(ctx, &source, &git);
            match pipeline.run() {
                Ok(report) => println!(
                    "Sync complete: {} written, {} skipped, {} failed, {} removed",
                    report.written.len(),
                    report.skipped_records,
                    report.failed.len(),
                    report.removed.len()
                ),
                Err(error) => {
                    eprintln!("Sync failure: {:?}", anyhow::Error::from(error));
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn load_or_default(path: &Path) -> anyhow::Result<SyncConfig> {
    if path.is_file() {
        load_config(path)
    } else {
        tracing::info!("{} not found, using default settings", path.display());
        Ok(SyncConfig::default())
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
