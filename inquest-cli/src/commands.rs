//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use anyhow::Context;
use inquest_core::brain::Brain;
use inquest_core::config::{InquestConfig, load_validated};
use inquest_core::gateway::{GatewayState, run_gateway};
use inquest_core::providers::create_provider;
use inquest_core::research::{ResearchEngine, TracingResearchCallback};
use inquest_core::search::create_search_provider;
use inquest_core::service::{ResearchRequest, ResearchService};
use inquest_core::storage::LocalArtifactSink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Arguments of `inquest run`.
#[derive(clap::Args, Debug)]
pub(crate) struct RunArgs {
    /// The research topic
    pub topic: String,

    /// Identifier used in the stored artifact key (random if omitted)
    #[arg(long)]
    pub research_id: Option<String>,

    /// User identifier used in the stored artifact key
    #[arg(long, default_value = "cli")]
    pub user_id: String,

    /// Also write the report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Follow-up loop budget (0 = initial batch only)
    #[arg(long)]
    pub max_loops: Option<usize>,

    /// Queries planned for the first batch
    #[arg(long)]
    pub initial_queries: Option<usize>,

    /// Results fetched per query
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Whole-run deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl RunArgs {
    /// Fold command-line flags over the loaded configuration.
    fn apply(&self, config: &mut InquestConfig) {
        let research = &mut config.research;
        if let Some(n) = self.max_loops {
            research.max_research_loops = n;
        }
        if let Some(n) = self.initial_queries {
            research.initial_query_count = n;
        }
        if let Some(n) = self.max_results {
            research.max_search_results_per_query = n;
        }
        if let Some(secs) = self.timeout {
            research.run_timeout_secs = secs;
        }
    }
}

pub(crate) async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run(args, workspace).await,
        Commands::Serve { host, port } => serve(host, port, workspace).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_validated(Some(workspace), None)?;
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        },
    }
}

fn build_service(config: &InquestConfig) -> anyhow::Result<ResearchService> {
    let provider = create_provider(&config.llm).context("Failed to create LLM provider")?;
    let brain = Arc::new(Brain::from_config(provider, config));
    let search =
        create_search_provider(&config.search).context("Failed to create search provider")?;
    let engine = ResearchEngine::new(brain, search, config.research.clone())?
        .with_callback(Arc::new(TracingResearchCallback));
    let sink = Arc::new(LocalArtifactSink::new(&config.storage.output_dir));
    Ok(ResearchService::new(Arc::new(engine), sink))
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

async fn run(args: RunArgs, workspace: &Path) -> anyhow::Result<()> {
    let mut config = load_validated(Some(workspace), None)?;
    args.apply(&mut config);
    config.validate()?;

    let service = build_service(&config)?;
    let request = ResearchRequest::new(
        args.user_id.clone(),
        args.research_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        args.topic.clone(),
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let response = service
        .process(&request, cancel)
        .await
        .with_context(|| format!("Research on '{}' failed", request.research_topic))?;

    if let Some(path) = &args.output {
        std::fs::write(path, &response.research_content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }
    info!(
        key = request.artifact_key().as_str(),
        dir = %config.storage.output_dir.display(),
        "Report stored"
    );
    println!("{}", response.research_content);
    Ok(())
}

async fn serve(host: Option<String>, port: Option<u16>, workspace: &Path) -> anyhow::Result<()> {
    let mut config = load_validated(Some(workspace), None)?;
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let service = Arc::new(build_service(&config)?);
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let state = GatewayState::new(service, shutdown).with_retention(config.gateway.run_retention());
    run_gateway(&config.gateway, state)
        .await
        .with_context(|| format!("Gateway on {} failed", config.gateway.bind_addr()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args() -> RunArgs {
        RunArgs {
            topic: "t".into(),
            research_id: None,
            user_id: "cli".into(),
            output: None,
            max_loops: None,
            initial_queries: None,
            max_results: None,
            timeout: None,
        }
    }

    #[test]
    fn test_apply_keeps_config_without_flags() {
        let mut config = InquestConfig::default();
        args().apply(&mut config);
        assert_eq!(config.research, InquestConfig::default().research);
    }

    #[test]
    fn test_apply_overrides_research() {
        let mut config = InquestConfig::default();
        RunArgs {
            max_loops: Some(0),
            initial_queries: Some(3),
            max_results: Some(5),
            timeout: Some(60),
            ..args()
        }
        .apply(&mut config);
        assert_eq!(config.research.max_research_loops, 0);
        assert_eq!(config.research.initial_query_count, 3);
        assert_eq!(config.research.max_search_results_per_query, 5);
        assert_eq!(config.research.run_timeout_secs, 60);
    }

    #[test]
    fn test_apply_then_validate_rejects_zero_queries() {
        let mut config = InquestConfig::default();
        RunArgs {
            initial_queries: Some(0),
            ..args()
        }
        .apply(&mut config);
        assert!(config.validate().is_err());
    }
}
