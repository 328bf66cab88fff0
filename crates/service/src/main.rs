use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use codeforge::chat::{ChatMessage, ChunkStream, LLMClient, Tool};
use codeforge::error::LLMError;
use codeforge_agent::config::AgentConfig;
use codeforge_agent::project::Project;
use codeforge_agent::rag::NoopRagIndex;
use codeforge_agent::server::AgentServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Project root directory to serve.
    #[arg(long, default_value = ".")]
    project: PathBuf,
    /// Address to bind; overrides the config file when set.
    #[arg(long)]
    addr: Option<String>,
    /// Model name reported in usage records.
    #[arg(long)]
    model: Option<String>,
}

/// Placeholder client used until an LLM provider is wired in.
///
/// The server boots and every non-chat endpoint works; chat turns terminate
/// with a configuration error instead of a silent hang. Embedders replace
/// this with a real `LLMClient` implementation.
struct UnconfiguredClient {
    model: String,
}

#[async_trait]
impl LLMClient for UnconfiguredClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<&[Tool]>,
    ) -> Result<ChunkStream, LLMError> {
        Err(LLMError::NotImplemented(
            "no LLM provider is configured for this server".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = AgentConfig::load_for_project(&args.project)?;
    if let Some(model) = args.model {
        config.llm.model = model;
    }
    for error in config.validate() {
        anyhow::bail!("invalid configuration: {error}");
    }

    let addr = args
        .addr
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    let project = Arc::new(Project::open(args.project.clone())?);
    info!(project = %args.project.display(), %addr, "starting server");

    let llm = Arc::new(UnconfiguredClient {
        model: config.llm.model.clone(),
    });
    let server = AgentServer::new(project, config, llm, Arc::new(NoopRagIndex))?;
    server.run(&addr).await
}
