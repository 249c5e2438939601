//! Renders a DUNA record into a contract-generation prompt.
//!
//! Everything here is a pure function of the record: the same record always
//! yields the same prompt, byte for byte.

use std::fmt::Write;

use crate::record::DunaRecord;

/// Solidity contract name derived from a record name.
///
/// Every character that is not an ASCII letter or digit becomes `_`, so
/// "Alpha Co" becomes `Alpha_Co`. Identifiers cannot start with a digit.
pub fn contract_name(record_name: &str) -> String {
    let mut name: String = record_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("Duna");
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Build the generation prompt for a record.
pub fn build_prompt(record: &DunaRecord) -> String {
    let contract = contract_name(&record.name);
    let description = if record.description.trim().is_empty() {
        "(none)"
    } else {
        record.description.trim()
    };

    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are an expert Solidity developer.");
    let _ = writeln!(
        prompt,
        "Write a complete Solidity smart contract named `{contract}` for the \
         Decentralized Unincorporated Nonprofit Association (DUNA) described below."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Organization: {}", record.name.trim());
    let _ = writeln!(prompt, "Description: {description}");
    let _ = writeln!(prompt, "Membership status: {}", record.membership_status);
    let _ = writeln!(prompt, "Compliance level: {}", record.compliance_level);
    if record.parameters.is_empty() {
        let _ = writeln!(prompt, "Parameters: (none)");
    } else {
        let _ = writeln!(prompt, "Parameters:");
        for (key, value) in &record.parameters {
            let _ = writeln!(prompt, "- {key}: {value}");
        }
    }
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Requirements:");
    let _ = writeln!(
        prompt,
        "- Start with an SPDX license identifier and `pragma solidity ^0.8.20;`."
    );
    let _ = writeln!(
        prompt,
        "- Define exactly one contract, `{contract}`, whose constructor takes no arguments."
    );
    let _ = writeln!(
        prompt,
        "- Keep the membership status (\"{}\") and compliance level ({}) as state \
         initialised to the values above, readable through view functions.",
        record.membership_status, record.compliance_level
    );
    let _ = writeln!(
        prompt,
        "- Only the deploying account may change the membership status or compliance \
         level, and every change emits an event."
    );
    let _ = writeln!(
        prompt,
        "- Represent each listed parameter as a state variable or constant where it fits."
    );
    let _ = write!(
        prompt,
        "- Reply with the Solidity source only, no explanations."
    );
    prompt
}

/// Remove one Markdown code fence wrapped around generated source.
///
/// Completion endpoints often answer with ```` ```solidity ... ``` ````.
/// Text that is not fenced is returned as-is.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return text;
    };
    match body.find('\n') {
        // the opening line may carry a language tag
        Some(newline) => body[newline + 1..].trim_end(),
        None => body.trim(),
    }
}
