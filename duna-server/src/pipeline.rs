//! Contract pipeline: record → prompt → source → bytecode → address.
//!
//! One run per record, ever. Stages run strictly in order and the first
//! failure ends the run without touching the record. Only a successful
//! deployment writes the pipeline-state fields, all three in one statement.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::chain::{DeployError, Deployer};
use crate::compiler::{CompileError, Compiler};
use crate::db::{RecordStore, StoreError};
use crate::llm::{GenerationError, Generator};
use crate::prompt;
use crate::transform::SourceTransform;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("DUNA record {0} not found")]
    NotFound(String),
    #[error("contract already generated for DUNA record {0}")]
    AlreadyProcessed(String),
    #[error("contract generation already running for DUNA record {0}")]
    InProgress(String),
    #[error("contract generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("contract compilation failed: {0}")]
    Compilation(#[from] CompileError),
    #[error("contract deployment failed: {0}")]
    Deployment(#[from] DeployError),
    #[error("record store failed: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub contract_address: String,
    /// Source as stored, i.e. after the source transform.
    pub contract_source: String,
}

pub struct Pipeline {
    store: Arc<RecordStore>,
    generator: Arc<dyn Generator>,
    compiler: Arc<dyn Compiler>,
    deployer: Arc<dyn Deployer>,
    transform: SourceTransform,
    /// Records with a run in progress in this process.
    running: Mutex<HashSet<String>>,
}

/// Removes a record from the running set when the run ends, however it ends.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.id);
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<RecordStore>,
        generator: Arc<dyn Generator>,
        compiler: Arc<dyn Compiler>,
        deployer: Arc<dyn Deployer>,
        transform: SourceTransform,
    ) -> Self {
        Self {
            store,
            generator,
            compiler,
            deployer,
            transform,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn transform(&self) -> SourceTransform {
        self.transform
    }

    fn claim(&self, id: &str) -> Result<RunGuard<'_>, PipelineError> {
        if !self.running.lock().insert(id.to_string()) {
            return Err(PipelineError::InProgress(id.to_string()));
        }
        Ok(RunGuard {
            running: &self.running,
            id: id.to_string(),
        })
    }

    /// Generate, compile and deploy the contract for record `id`.
    pub async fn run(&self, id: &str) -> Result<Deployment, PipelineError> {
        let _guard = self.claim(id)?;

        let record = self
            .store
            .get(id)?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        if record.contract_generated {
            return Err(PipelineError::AlreadyProcessed(id.to_string()));
        }

        let prompt = prompt::build_prompt(&record);
        tracing::info!(record_id = %id, name = %record.name, "Generating contract source");
        let generated = self.generator.generate(&prompt).await?;

        let source = prompt::strip_code_fence(&generated).to_string();
        if source.trim().is_empty() {
            return Err(GenerationError::Malformed("no source inside code fence".into()).into());
        }
        let stored_source = self.transform.encode(&source);

        tracing::info!(record_id = %id, chars = source.len(), "Compiling contract");
        let contract = self.compiler.compile(&source).await?;

        tracing::info!(record_id = %id, contract = %contract.name, "Deploying contract");
        let address = self.deployer.deploy(&contract).await?;

        let recorded = self
            .store
            .record_deployment(id, &stored_source, &address, self.transform)?;
        if !recorded {
            // Deployed, but the record changed underneath us.
            tracing::warn!(record_id = %id, %address, "Contract deployed but record could not be updated");
            return Err(match self.store.get(id)? {
                None => PipelineError::NotFound(id.to_string()),
                Some(_) => PipelineError::AlreadyProcessed(id.to_string()),
            });
        }

        tracing::info!(record_id = %id, %address, "Contract pipeline complete");
        Ok(Deployment {
            contract_address: address,
            contract_source: stored_source,
        })
    }
}
