//! delver CLI - recursive web research from the terminal.

mod cli;
mod config;
mod display;
mod format;
mod prompt;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use config::{ConfigLoader, Settings};
use delver_core::{
    HttpFetcher, LlmClient, OpenAiBackend, SearchRegistry, SearchSource, SerperProvider,
    TavilyProvider,
};
use delver_deep_research::{Clarifications, DeepResearcher, ResearchContext};
use display::{DisplayState, IndicatifRenderer, Phase, Renderer};
use futures_util::StreamExt;
use prompt::PromptClarifier;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    if let Err(e) = args.validate() {
        bail!("{}", e);
    }

    let filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let (file_config, files) = ConfigLoader::new()
        .with_explicit(args.config.clone())
        .load()
        .context("Failed to load configuration")?;
    for file in &files {
        log::info!("Using config file {}", file.display());
    }
    let settings = Settings::resolve(file_config, &args);

    println!("Topic: {}", settings.request.topic);
    println!(
        "Breadth {}, depth {}, {} via {}",
        settings.request.breadth,
        settings.request.depth,
        settings.request.mode,
        settings.request.source
    );
    println!();

    run_research(settings).await
}

fn build_context(settings: &Settings, token: CancellationToken) -> Result<ResearchContext> {
    let api_key = settings
        .openai_api_key
        .as_deref()
        .ok_or_else(|| anyhow!("No model API key: set OPENAI_API_KEY or [llm].api_key"))?;
    let mut backend = OpenAiBackend::new(api_key).context("Failed to create model backend")?;
    if let Some(base_url) = &settings.openai_base_url {
        backend = backend.with_base_url(base_url.clone());
    }
    let llm = LlmClient::new(Arc::new(backend), settings.llm.clone());

    let source = settings.request.source;
    let search_key = settings.search_api_key().ok_or_else(|| {
        anyhow!(
            "No {} API key: set {}_API_KEY or [search].{}_api_key",
            source,
            source.as_str().to_uppercase(),
            source
        )
    })?;
    let timeout = settings.research.search.timeout;
    let provider: Arc<dyn delver_core::SearchProvider> = match source {
        SearchSource::Tavily => Arc::new(TavilyProvider::new(search_key, timeout)?),
        SearchSource::Serper => Arc::new(SerperProvider::new(search_key, timeout)?),
    };
    let search = SearchRegistry::new().with_provider(source, provider);

    let mut context = ResearchContext::new(llm, search).with_cancellation_token(token);
    if settings.research.fetch_content {
        context = context.with_fetcher(Arc::new(HttpFetcher::new(timeout)?));
    }
    if settings.request.clarifications == Clarifications::Ask && std::io::stdin().is_terminal() {
        context = context.with_clarifier(Arc::new(PromptClarifier::stdin()));
    }

    Ok(context)
}

async fn run_research(settings: Settings) -> Result<()> {
    let token = CancellationToken::new();
    let context = build_context(&settings, token.clone())?;
    let output = settings.output.clone();
    let researcher = DeepResearcher::new(settings.research).context("Invalid research configuration")?;

    let mut state = DisplayState::new();
    let mut renderer = IndicatifRenderer::new();

    // First Ctrl+C cancels the run (partial results are still synthesized),
    // the second exits immediately.
    let interrupt_count = Arc::new(AtomicU8::new(0));
    let interrupts = Arc::clone(&interrupt_count);
    let cancel = token.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }

            if interrupts.fetch_add(1, Ordering::SeqCst) == 0 {
                eprintln!("\n⚠️  Interrupt received - writing up partial results...");
                eprintln!("   (Press Ctrl+C again to exit immediately)\n");
                cancel.cancel();
            } else {
                eprintln!("\n❌ Force exit requested");
                std::process::exit(130);
            }
        }
    });

    let stream = researcher.execute(settings.request, context);
    futures_util::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        let prev_phase = state.phase();
        let changed = state.update(&event);

        if state.phase() != prev_phase {
            renderer
                .on_phase_change(&state)
                .context("Renderer phase change failed")?;
        }
        for id in &changed {
            renderer
                .on_node_update(&state, id)
                .context("Renderer node update failed")?;
        }
    }

    let result = match state.phase() {
        Phase::Complete => renderer
            .on_final_result(&state)
            .context("Renderer final result failed")
            .and_then(|()| save_report(output.as_deref(), &state)),
        _ => {
            renderer.on_error(&state).context("Renderer error output failed")?;
            let message = state
                .error()
                .map(|e| e.error.clone())
                .unwrap_or_else(|| "research ended without a result".to_string());
            Err(anyhow!("Research failed: {}", message))
        }
    };

    renderer.finish().context("Renderer cleanup failed")?;
    result
}

/// Write the completed outcome to `--output`, if one was given.
fn save_report(path: Option<&Path>, state: &DisplayState) -> Result<()> {
    let (Some(path), Some(outcome)) = (path, state.outcome()) else {
        return Ok(());
    };
    format::write_report(path, outcome)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    println!("Report saved to {}", path.display());
    Ok(())
}
