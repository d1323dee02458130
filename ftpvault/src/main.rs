use std::process::ExitCode;

use anyhow::Context;
use ftpvault::runtime::{RunMode, Runtime};
use ftpvault::settings::Settings;
use ftpvault::{auth, logging};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    SkipFetch,
    Auth,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "auth" | "--auth" => mode = CliMode::Auth,
            "--skip-fetch" if mode == CliMode::Run => mode = CliMode::SkipFetch,
            "--skip-fetch" => {}
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn print_usage() {
    println!("Usage: ftpvault [auth|--auth] [--skip-fetch]");
    println!("  auth, --auth   Authorize against the disk, store the token and exit");
    println!("  --skip-fetch   Upload already-downloaded files only; never contact FTP for data");
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logging::init("info");
            tracing::error!(error = ?err, "ftpvault failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_usage();
        return Ok(());
    }

    let settings = Settings::from_env().context("failed to load settings")?;
    logging::init(&settings.log.level);

    let run_mode = match mode {
        CliMode::Auth => {
            auth::resolve_access_token(&settings).await?;
            tracing::info!("authorization complete");
            return Ok(());
        }
        CliMode::SkipFetch => RunMode::SkipFetch,
        CliMode::Run | CliMode::Help => RunMode::Sync,
    };

    let runtime = Runtime::bootstrap(settings, run_mode).await?;
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after current item");
            signal_cancel.cancel();
        }
    });

    let outcome = runtime.run(cancel).await?;
    tracing::info!(%outcome, "run finished");
    Ok(())
}
