// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use sharemirror::{
    credential::StoreOutcome, DeleteMode, Git2Stager, KeyringStore, Mirror, SecretStore,
    Stager, SyncConfig, SyncOutcome, SyncSettings,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquire::{Password, Text};
use std::{fs::File, path::PathBuf, process::exit, sync::Mutex};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  sharemirror [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Additionally write log output to file.
    #[arg(long, global = true, value_name = "path")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Sync(opts) => run_sync(opts),
            Command::StoreCredential(opts) => run_store_credential(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Download remote project and mirror it into working directory.
    #[command(
        alias = "download-zip",
        override_usage = "sharemirror sync [options] <in_file>"
    )]
    Sync(SyncOptions),

    /// Store password of remote instance in the platform keychain.
    #[command(override_usage = "sharemirror store-credential [options]")]
    StoreCredential(StoreCredentialOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// JSON file naming project id, username, and optionally remote URL.
    #[arg(required = true, value_name = "in_file")]
    pub in_file: PathBuf,

    /// Delete local files that are neither in the project nor protected.
    #[arg(short, long)]
    pub force: bool,

    /// File of glob patterns for local files that must never be deleted.
    #[arg(short, long, value_name = "path")]
    pub allow_list: Option<PathBuf>,

    /// Directory to mirror the project into.
    #[arg(short = 'd', long, value_name = "path", default_value = ".")]
    pub workdir: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StoreCredentialOptions {
    /// Username on the remote instance, prompted for if omitted.
    #[arg(short, long, value_name = "username")]
    pub username: Option<String>,

    /// Password on the remote instance, prompted for if omitted.
    #[arg(short, long, value_name = "password")]
    pub password: Option<String>,

    /// Overwrite an already stored password.
    #[arg(short, long)]
    pub force: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging(cli.log_file.as_ref()) {
        eprintln!("failed to set up logging: {error:?}");
        exit(1);
    }

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create log file {:?}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(layer)
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

fn run_sync(opts: SyncOptions) -> Result<()> {
    let config = SyncConfig::load(&opts.in_file)?;
    let config_file_name = opts
        .in_file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let settings = SyncSettings {
        config,
        config_file_name,
        work_dir: opts.workdir.clone(),
        allow_list: opts.allow_list,
        delete: DeleteMode::from(opts.force),
        download_dir: None,
    };

    let stager = match Git2Stager::discover(&opts.workdir) {
        Ok(stager) => Some(stager),
        Err(error) => {
            warn!("staging disabled: {error}");
            None
        }
    };

    report(sync_with(settings, stager)?);

    Ok(())
}

fn sync_with(settings: SyncSettings, stager: impl Stager) -> Result<SyncOutcome> {
    let mirror = Mirror::new(settings, KeyringStore::new(), stager);
    Ok(mirror.run()?)
}

fn report(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Skipped { unchanged_runs } => {
            println!("Skipped this run ({unchanged_runs}) to avoid hammering the server.");
        }
        SyncOutcome::Unchanged { fingerprint } => {
            println!("Same content hash {fingerprint} as last run, no new changes.");
        }
        // INVARIANT: Reconciler already logs every deletion candidate.
        SyncOutcome::Synced { report, .. } => {
            println!(
                "Synchronized {} files, removed {}, {} should be deleted.",
                report.extracted.len(),
                report.removed.len(),
                report.should_delete.len()
            );
        }
    }
}

fn run_store_credential(opts: StoreCredentialOptions) -> Result<()> {
    let username = match opts.username {
        Some(username) => username,
        None => Text::new("username").prompt()?,
    };
    let password = match opts.password {
        Some(password) => password,
        None => Password::new("password").without_confirmation().prompt()?,
    };

    match KeyringStore::new().set(&username, &password, opts.force)? {
        StoreOutcome::Stored => println!("Stored the password for {username}."),
        StoreOutcome::Replaced => println!("Replaced the password for {username}."),
        StoreOutcome::Kept => {
            println!("There is already a password stored for {username}, use --force to overwrite.")
        }
    }

    Ok(())
}
