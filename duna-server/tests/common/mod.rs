//! Stub pipeline stages shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use duna_server::chain::{DeployError, Deployer};
use duna_server::compiler::{CompileError, CompiledContract, Compiler};
use duna_server::db::RecordStore;
use duna_server::llm::{GenerationError, Generator};
use duna_server::record::NewRecord;
use duna_server::server::SharedState;
use duna_server::transform::SourceTransform;

pub const PLAIN_SOURCE: &str =
    "// SPDX-License-Identifier: MIT\npragma solidity ^0.8.20;\n\ncontract Alpha_Co {\n    uint8 public complianceLevel = 3;\n}";
pub const DEAD_ADDRESS: &str = "0xDEADBEEF00000000000000000000000000000000";

/// What the generation endpoint would send back: the source in a fence.
pub fn fenced_source() -> String {
    format!("```solidity\n{PLAIN_SOURCE}\n```")
}

pub fn alpha_co() -> NewRecord {
    let mut rec = NewRecord::named("Alpha Co");
    rec.membership_status = "active".into();
    rec.compliance_level = 3;
    rec
}

pub struct StubGenerator {
    reply: Option<String>,
    pub calls: AtomicUsize,
    pub last_prompt: Mutex<Option<String>>,
}

impl StubGenerator {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(text.to_string()),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| GenerationError::Malformed("stub endpoint is down".into()))
    }
}

pub struct StubCompiler {
    errors: Vec<String>,
    pub calls: AtomicUsize,
    pub last_source: Mutex<Option<String>>,
}

impl StubCompiler {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            errors: vec![],
            calls: AtomicUsize::new(0),
            last_source: Mutex::new(None),
        })
    }

    pub fn failing(errors: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            errors: errors.iter().map(|e| e.to_string()).collect(),
            calls: AtomicUsize::new(0),
            last_source: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Compiler for StubCompiler {
    async fn compile(&self, source: &str) -> Result<CompiledContract, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_source.lock().unwrap() = Some(source.to_string());
        if !self.errors.is_empty() {
            return Err(CompileError::Diagnostics(self.errors.clone()));
        }
        Ok(CompiledContract {
            name: "Alpha_Co".into(),
            abi: json!([{"type": "constructor", "inputs": [], "stateMutability": "nonpayable"}]),
            bytecode: "6080604052348015600f57600080fd5b50".into(),
        })
    }
}

pub struct StubDeployer {
    address: Option<String>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl StubDeployer {
    pub fn at(address: &str) -> Arc<Self> {
        Self::slow(address, Duration::ZERO)
    }

    pub fn slow(address: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            address: Some(address.to_string()),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            address: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deployer for StubDeployer {
    async fn deploy(&self, _contract: &CompiledContract) -> Result<String, DeployError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.address.clone().ok_or_else(|| DeployError::Timeout {
            tx_hash: "0xfeed".into(),
            timeout: Duration::from_secs(120),
        })
    }
}

/// A store plus the stubs wired into shared state.
pub struct Harness {
    pub store: Arc<RecordStore>,
    pub generator: Arc<StubGenerator>,
    pub compiler: Arc<StubCompiler>,
    pub deployer: Arc<StubDeployer>,
    pub state: Arc<SharedState>,
}

impl Harness {
    pub fn new(
        generator: Arc<StubGenerator>,
        compiler: Arc<StubCompiler>,
        deployer: Arc<StubDeployer>,
        transform: SourceTransform,
    ) -> Self {
        let store = Arc::new(RecordStore::open_memory().unwrap());
        let state = Arc::new(SharedState::new(
            Arc::clone(&store),
            generator.clone(),
            compiler.clone(),
            deployer.clone(),
            transform,
        ));
        Self {
            store,
            generator,
            compiler,
            deployer,
            state,
        }
    }

    /// Every stage succeeds; deployment lands at [`DEAD_ADDRESS`].
    pub fn happy() -> Self {
        Self::new(
            StubGenerator::replying(&fenced_source()),
            StubCompiler::ok(),
            StubDeployer::at(DEAD_ADDRESS),
            SourceTransform::Identity,
        )
    }

    pub fn network_calls(&self) -> usize {
        self.generator.calls() + self.compiler.calls() + self.deployer.calls()
    }
}
