//! Reversible transform applied to contract source before it is stored.
//!
//! This is the "obfuscation" stage of the pipeline. It hides nothing: the
//! `reverse` policy only reverses the order of characters. The compiler always
//! sees the plain source; the transform only shapes the stored copy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceTransform {
    /// Store source exactly as generated.
    #[default]
    Identity,
    /// Store source with its characters in reverse order.
    Reverse,
}

impl SourceTransform {
    /// Plain source to stored form.
    pub fn encode(self, source: &str) -> String {
        match self {
            SourceTransform::Identity => source.to_string(),
            SourceTransform::Reverse => source.chars().rev().collect(),
        }
    }

    /// Stored form back to plain source.
    pub fn decode(self, stored: &str) -> String {
        // reversal is its own inverse
        self.encode(stored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceTransform::Identity => "identity",
            SourceTransform::Reverse => "reverse",
        }
    }
}

impl std::str::FromStr for SourceTransform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(SourceTransform::Identity),
            "reverse" => Ok(SourceTransform::Reverse),
            other => Err(format!("unknown source transform {other:?}")),
        }
    }
}

impl std::fmt::Display for SourceTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
