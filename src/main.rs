use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    articleforge::logging::init().context("init logging")?;

    let cli = articleforge::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        articleforge::cli::Command::Plan(args) => {
            articleforge::plan::run(args).context("plan")?;
        }
        articleforge::cli::Command::Scrape(args) => {
            articleforge::scrape::run(args).await.context("scrape")?;
        }
        articleforge::cli::Command::Generate(args) => {
            articleforge::generate::run(args).await.context("generate")?;
        }
        articleforge::cli::Command::Restore(args) => {
            articleforge::generate::restore(args)
                .await
                .context("restore")?;
        }
    }

    Ok(())
}
