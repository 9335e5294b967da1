use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cli::{GenerateArgs, RestoreArgs};
use crate::formats::{ArticleConfig, GenerationStatus};
use crate::openai::{OpenAiConfig, OpenAiModel};
use crate::output::write_output;
use crate::pipeline::{GenerateOptions, GenerationOrchestrator};
use crate::rag::{MeteredEmbedder, SemanticFilter};
use crate::scrape::{HttpScraper, Scraper as _};
use crate::session::{LocalFsSessionStore, SessionRecorder};

pub async fn run(args: GenerateArgs) -> anyhow::Result<()> {
    let out_path = PathBuf::from(&args.out);
    if out_path.exists() && !args.force {
        anyhow::bail!("article output already exists: {}", out_path.display());
    }

    let mut config = ArticleConfig::from_path(Path::new(&args.config))?;
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after the current step");
                cancel.cancel();
            }
        })
    };

    if config.reference_content.trim().is_empty()
        && let Some(reference_url) = config.reference_url.clone()
    {
        let url = Url::parse(&reference_url)
            .with_context(|| format!("parse reference_url: {reference_url}"))?;
        let scraper = HttpScraper::with_timeout(Duration::from_secs(args.scrape_timeout_secs))?;
        let page = scraper
            .scrape(&url, &cancel)
            .await
            .context("scrape reference_url")?;
        config.reference_content = page.content;
        if config.scraped_images.is_empty() {
            config.scraped_images = page.images;
        }
    }

    let openai = Arc::new(OpenAiModel::new(OpenAiConfig::from_env()?)?);
    let mut orchestrator = GenerationOrchestrator::new(openai.clone());
    if args.semantic_rag {
        let embedder = MeteredEmbedder::new(openai, Arc::clone(orchestrator.ledger()));
        orchestrator = orchestrator.with_context_filter(Arc::new(SemanticFilter::new(embedder)));
    }
    if let Some(session_dir) = &args.session_dir {
        let session_id = args
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let store = Arc::new(LocalFsSessionStore::new(session_dir));
        let recorder = SessionRecorder::new(store, session_id);
        tracing::info!(
            session_id = recorder.session_id(),
            dir = %session_dir,
            "recording session"
        );
        orchestrator = orchestrator.with_session(recorder);
    }

    let options = GenerateOptions {
        turbo: args.turbo.then_some(true),
        concurrency: (args.concurrency > 0).then_some(args.concurrency),
        settle_delay: Duration::from_millis(args.settle_ms),
        plan_override: None,
    };
    let outcome = orchestrator.generate(&config, options, &cancel).await;
    interrupt.abort();

    if outcome.status == GenerationStatus::Error {
        anyhow::bail!(
            "generation failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    write_output(&out_path, &format!("{}\n", outcome.content), args.force)?;
    tracing::info!(
        out = %out_path.display(),
        sections = outcome.sections.iter().filter(|s| !s.content.is_empty()).count(),
        total_tokens = outcome.cost.total_tokens,
        total_cost = %format!("${:.4}", outcome.cost.total_cost),
        stopped = outcome.stopped,
        visual_style = outcome.visual_style.as_deref().unwrap_or_default(),
        "wrote article"
    );
    Ok(())
}

pub async fn restore(args: RestoreArgs) -> anyhow::Result<()> {
    let out_path = PathBuf::from(&args.out);
    let store = Arc::new(LocalFsSessionStore::new(&args.session_dir));
    let mut recorder = SessionRecorder::new(store, args.session_id.clone());
    let snapshot = recorder
        .restore()
        .await
        .ok_or_else(|| anyhow::anyhow!("no saved session: {}", args.session_id))?;

    if snapshot.content.trim().is_empty() {
        anyhow::bail!(
            "saved session has no content: {} (status {:?})",
            args.session_id,
            snapshot.status
        );
    }
    if snapshot.status != GenerationStatus::Completed {
        tracing::warn!(status = ?snapshot.status, "saved session did not complete");
    }

    write_output(&out_path, &format!("{}\n", snapshot.content), args.force)?;
    tracing::info!(
        out = %out_path.display(),
        sections = snapshot.sections.len(),
        visual_style = snapshot.visual_style.as_deref().unwrap_or_default(),
        "restored article"
    );

    if args.clear {
        recorder.clear().await?;
        tracing::info!(session_id = recorder.session_id(), "cleared session");
    }
    Ok(())
}
