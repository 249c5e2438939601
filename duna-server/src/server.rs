//! Server start-up: build components from config, bind, serve.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::chain::tx::Signer;
use crate::chain::{Deployer, EvmDeployer};
use crate::compiler::{Compiler, Solc};
use crate::config::Config;
use crate::db::RecordStore;
use crate::llm::{Generator, LlmClient, Retrying};
use crate::pipeline::Pipeline;
use crate::web;

/// State shared by all request handlers.
pub struct SharedState {
    pub store: Arc<RecordStore>,
    pub pipeline: Arc<Pipeline>,
}

impl SharedState {
    /// Wire a pipeline around `store` from explicit components.
    pub fn new(
        store: Arc<RecordStore>,
        generator: Arc<dyn Generator>,
        compiler: Arc<dyn Compiler>,
        deployer: Arc<dyn Deployer>,
        transform: crate::transform::SourceTransform,
    ) -> Self {
        let pipeline = Pipeline::new(Arc::clone(&store), generator, compiler, deployer, transform);
        Self {
            store,
            pipeline: Arc::new(pipeline),
        }
    }
}

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the production components described by the config.
    pub fn build_state(&self) -> Result<Arc<SharedState>> {
        let config = &self.config;

        let store = RecordStore::open(&config.db_path)
            .with_context(|| format!("Failed to open database {}", config.db_path))?;
        tracing::info!(path = %config.db_path, records = store.count()?, "Record store opened");

        let llm = LlmClient::new(config.llm());
        tracing::info!(endpoint = %config.llm_endpoint, model = %llm.model(), "Generation client ready");
        let mut generator: Arc<dyn Generator> = Arc::new(llm);
        if config.llm_retries > 0 {
            generator = Arc::new(Retrying::new(generator, config.llm_retries, config.retry_backoff()));
        }

        let compiler = Solc::new(&config.solc_path, config.compile_timeout());

        let signer = Signer::from_hex(&config.deployer_key_hex()?).context("Invalid deployer key")?;
        let deployer = EvmDeployer::new(config.chain(), signer);
        tracing::info!(rpc = %config.rpc_url, sender = %deployer.sender(), "Deployer ready");

        if config.source_transform != crate::transform::SourceTransform::Identity {
            tracing::info!(transform = %config.source_transform, "Stored contract source will be transformed");
        }

        Ok(Arc::new(SharedState::new(
            Arc::new(store),
            generator,
            Arc::new(compiler),
            Arc::new(deployer),
            config.source_transform,
        )))
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let state = self.build_state()?;
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;
        tracing::info!("HTTP API listening on {}", listener.local_addr()?);

        axum::serve(listener, web::router(state))
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down");
            })
            .await?;
        Ok(())
    }
}

/// Serve `state` on `listen_addr` in the background (for tests).
/// Returns the bound address and the server task.
pub async fn start(
    listen_addr: &str,
    state: Arc<SharedState>,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let listener = TcpListener::bind(listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, web::router(state)).await?;
        Ok(())
    });
    Ok((addr, handle))
}
