//! Solidity compilation through `solc --standard-json`.
//!
//! The source is compiled as a single in-memory file and only the ABI and
//! EVM bytecode are requested. Warnings are ignored; any diagnostic with
//! severity `error` fails the compilation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Name of the single source unit handed to the compiler.
pub const SOURCE_FILE: &str = "Contract.sol";

/// ABI and bytecode of one compiled contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledContract {
    pub name: String,
    pub abi: Value,
    /// Hex-encoded creation bytecode, without `0x`.
    pub bytecode: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to run solc: {0}")]
    Io(#[from] std::io::Error),
    #[error("solc did not finish within {0:?}")]
    Timeout(Duration),
    #[error("solc exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("unreadable compiler output: {0}")]
    Output(String),
    #[error("compilation failed: {}", .0.join("; "))]
    Diagnostics(Vec<String>),
    #[error("compilation produced no contracts")]
    NoContracts,
}

/// Something that compiles Solidity source into a deployable contract.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, source: &str) -> Result<CompiledContract, CompileError>;
}

/// Standard-JSON compiler input for a single source file.
pub fn standard_json_input(source: &str) -> Value {
    json!({
        "language": "Solidity",
        "sources": {
            SOURCE_FILE: { "content": source }
        },
        "settings": {
            "outputSelection": {
                "*": {
                    "*": ["abi", "evm.bytecode.object"]
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct StandardOutput {
    #[serde(default)]
    errors: Vec<Diagnostic>,
    #[serde(default)]
    contracts: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Diagnostic {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ContractOutput {
    #[serde(default)]
    abi: Value,
    #[serde(default)]
    evm: EvmOutput,
}

#[derive(Debug, Default, Deserialize)]
struct EvmOutput {
    #[serde(default)]
    bytecode: BytecodeOutput,
}

#[derive(Debug, Default, Deserialize)]
struct BytecodeOutput {
    #[serde(default)]
    object: String,
}

/// Extract the first contract from standard-JSON compiler output.
///
/// "First" follows the order the compiler wrote the contracts in.
pub fn parse_output(raw: &str) -> Result<CompiledContract, CompileError> {
    let output: StandardOutput =
        serde_json::from_str(raw).map_err(|e| CompileError::Output(e.to_string()))?;

    let errors: Vec<String> = output
        .errors
        .into_iter()
        .filter(|d| d.severity.eq_ignore_ascii_case("error"))
        .map(|d| d.message)
        .collect();
    if !errors.is_empty() {
        return Err(CompileError::Diagnostics(errors));
    }

    let (name, contract) = output
        .contracts
        .into_iter()
        .filter_map(|(_, file)| match file {
            Value::Object(contracts) => Some(contracts),
            _ => None,
        })
        .flatten()
        .next()
        .ok_or(CompileError::NoContracts)?;

    let contract: ContractOutput =
        serde_json::from_value(contract).map_err(|e| CompileError::Output(e.to_string()))?;
    Ok(CompiledContract {
        name,
        abi: contract.abi,
        bytecode: contract.evm.bytecode.object,
    })
}

/// The `solc` binary, run once per compilation.
pub struct Solc {
    path: PathBuf,
    timeout: Duration,
}

impl Solc {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Compiler for Solc {
    async fn compile(&self, source: &str) -> Result<CompiledContract, CompileError> {
        let input = serde_json::to_vec(&standard_json_input(source))
            .map_err(|e| CompileError::Output(e.to_string()))?;

        let mut child = Command::new(&self.path)
            .arg("--standard-json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            // dropping stdin closes the pipe so solc starts compiling
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CompileError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(CompileError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout =
            String::from_utf8(output.stdout).map_err(|e| CompileError::Output(e.to_string()))?;
        let contract = parse_output(&stdout)?;
        tracing::debug!(contract = %contract.name, bytecode_len = contract.bytecode.len() / 2, "Compiled contract");
        Ok(contract)
    }
}
