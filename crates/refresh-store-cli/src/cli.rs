//! Exposes the command line application.
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use refresh_store::git::{GitRepoStore, GitWorktree};
use refresh_store::http::HttpStore;
use refresh_store::{Store, StoreConfig};
use reqwest::Url;

use crate::config::Config;
use crate::logging;

/// Keeps a remote resource up to date and prints it.
///
/// The resource is refreshed in the background once per update interval. Without `--watch`,
/// the first value is printed and the tool exits.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// How long to wait for the first update.
    #[arg(
        long,
        global = true,
        value_parser = humantime::parse_duration,
        default_value = "30s"
    )]
    wait: Duration,

    /// Keep running and print the value again whenever it changes.
    #[arg(long, global = true)]
    watch: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a URL and print the response body.
    Http {
        /// The URL to fetch.
        url: Url,
    },

    /// Check out a Git repository and print its location and `HEAD`.
    Git {
        /// The repository to clone, anything `git clone` accepts.
        url: String,

        /// The branch to track instead of the default branch.
        #[arg(long, short)]
        branch: Option<String>,
    },
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;
    let store_config = config.store.validate().context("invalid store config")?;

    // SAFETY: The runtime has not been started yet, so this is still single-threaded.
    unsafe { logging::init_logging(&config) };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(run(cli, store_config))
}

async fn run(cli: Cli, config: StoreConfig) -> Result<()> {
    match cli.command {
        Command::Http { ref url } => {
            tracing::info!("Refreshing `{}` every {:?}", url, config.update_interval);
            let store =
                HttpStore::new(url.clone(), config).context("failed to create HTTP client")?;

            let mut stdout = std::io::stdout();
            print_updates(store.store(), &cli, |body| {
                stdout.write_all(body)?;
                stdout.flush()?;
                Ok(())
            })
            .await
        }
        Command::Git {
            ref url,
            ref branch,
        } => {
            tracing::info!("Refreshing `{}` every {:?}", url, config.update_interval);
            let store = GitRepoStore::with_branch(url.as_str(), branch.clone(), config)
                .context("failed to prepare checkout directory")?;

            print_updates(store.store(), &cli, |worktree: &GitWorktree| {
                println!("{} {}", worktree.head, worktree.path.display());
                Ok(())
            })
            .await
        }
    }
}

/// Waits for the first value of `store` and prints it.
///
/// With `--watch`, keeps printing new values until interrupted. Errors of individual updates
/// are logged in that case instead of ending the program.
async fn print_updates<T, E>(
    store: &Store<T, E>,
    cli: &Cli,
    mut print: impl FnMut(&T) -> Result<()>,
) -> Result<()>
where
    T: Clone + PartialEq,
    E: Clone + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    store
        .wait(cli.wait)
        .await
        .context("no value was produced")?;

    let mut last = None;
    loop {
        match store.get() {
            Ok(value) => {
                if last.as_ref() != Some(&value) {
                    print(&value)?;
                    last = Some(value);
                }
            }
            Err(error) if cli.watch => {
                tracing::warn!(%error, "No current value");
            }
            Err(error) => return Err(error).context("failed to refresh"),
        }

        if !cli.watch {
            break;
        }

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = tokio::time::sleep(store.config().update_interval) => {}
        }
    }

    store.shutdown();
    Ok(())
}
