//! duna-server: DUNA records with LLM-generated, deployed Solidity contracts.
//!
//! The contract pipeline runs one record through
//! prompt → generation → source transform → solc → EVM deployment and
//! records the result. Everything else is record CRUD over HTTP.
//!
//! - `record` / `db`: the DUNA record and its SQLite store
//! - `prompt`: record → generation prompt
//! - `llm`: chat-completions client
//! - `transform`: reversible transform of stored source
//! - `compiler`: `solc --standard-json` adapter
//! - `chain`: transaction signing and deployment over JSON-RPC
//! - `pipeline`: sequencing, failure isolation, one-shot guard
//! - `web` / `server`: HTTP API and start-up

pub mod chain;
pub mod compiler;
pub mod config;
pub mod db;
pub mod id;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod record;
pub mod server;
pub mod transform;
pub mod web;
