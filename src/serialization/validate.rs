// Record validation on read
// Principle: one bad record never aborts the whole read
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::TxfToken;

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Semantic checks of a decoded TXF token; returns every problem found
pub fn validate_txf_token(token: &TxfToken) -> Vec<String> {
    let mut problems = Vec::new();

    if !is_hex(token.token_id()) {
        problems.push(format!("tokenId is not hex: {:?}", token.token_id()));
    }

    if token.genesis.data.token_type.is_empty() {
        problems.push("tokenType is empty".to_string());
    }

    if token.genesis.inclusion_proof.is_none() {
        problems.push("genesis has no inclusion proof".to_string());
    }

    for (index, tx) in token.transactions.iter().enumerate() {
        if tx.new_state_hash.is_empty() {
            problems.push(format!("transaction {} has empty newStateHash", index));
        }
        if let Some(source) = token.source_state_hash(index) {
            if tx.previous_state_hash != source {
                problems.push(format!(
                    "transaction {} previousStateHash does not follow the chain",
                    index
                ));
            }
        }
    }

    if !token.has_committed_prefix() {
        problems.push("committed transactions do not form a prefix".to_string());
    }

    problems
}

/// Minimum nested fields a token record needs to be usable at all
pub fn has_minimum_structure(value: &Value) -> bool {
    let token_id_present = value
        .pointer("/genesis/data/tokenId")
        .and_then(Value::as_str)
        .map(|id| !id.is_empty())
        .unwrap_or(false);
    let proof_present = value
        .pointer("/genesis/inclusionProof")
        .map(Value::is_object)
        .unwrap_or(false);
    let state_present = value.get("state").map(Value::is_object).unwrap_or(false);

    token_id_present && proof_present && state_present
}

/// Set `fields` of `record` to strings: absent or null become empty, other
/// scalars are stringified
fn coerce_strings(record: &mut Value, fields: &[&str]) {
    let Some(object) = record.as_object_mut() else {
        return;
    };
    for field in fields {
        let coerced = match object.get(*field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(_)) => continue,
            Some(other) => other.to_string(),
        };
        object.insert(field.to_string(), Value::String(coerced));
    }
}

fn coerce_proof(proof: Option<&mut Value>) {
    if let Some(authenticator) = proof.and_then(|p| p.get_mut("authenticator")) {
        coerce_strings(authenticator, &["stateHash"]);
    }
}

/// Copy of a token record with the scalar fields a typed decode insists on
/// filled in
fn lenient_token_value(value: &Value) -> Value {
    let mut value = value.clone();
    if let Some(data) = value.pointer_mut("/genesis/data") {
        coerce_strings(data, &["tokenId", "tokenType", "salt", "recipient"]);
    }
    coerce_proof(value.pointer_mut("/genesis/inclusionProof"));

    if let Some(transactions) = value.get_mut("transactions").and_then(Value::as_array_mut) {
        for tx in transactions {
            coerce_strings(tx, &["previousStateHash", "newStateHash"]);
            coerce_proof(tx.get_mut("inclusionProof"));
        }
    }
    value
}

/// Decode one token record. A record that fails the typed decode or the
/// semantic checks is still kept when it has the minimum structure. A key
/// naming another token is always rejected. Failures are appended to `errors`.
pub fn decode_token(
    key: &str,
    expected_id: &str,
    value: &Value,
    errors: &mut Vec<String>,
) -> Option<TxfToken> {
    let decoded = serde_json::from_value::<TxfToken>(value.clone()).or_else(|e| {
        if !has_minimum_structure(value) {
            return Err(e);
        }
        debug!("{}: decoding leniently ({})", key, e);
        serde_json::from_value::<TxfToken>(lenient_token_value(value))
    });
    let token = match decoded {
        Ok(token) => token,
        Err(e) => {
            errors.push(format!("{}: not a TXF token: {}", key, e));
            return None;
        }
    };

    if token.token_id() != expected_id {
        warn!("⚠️ Record {} holds token {}", key, token.token_id());
        errors.push(format!("{}: key does not match tokenId {}", key, token.token_id()));
        return None;
    }

    let problems = validate_txf_token(&token);
    if problems.is_empty() {
        return Some(token);
    }

    if has_minimum_structure(value) {
        debug!("{}: accepted by structural fallback ({})", key, problems.join("; "));
        return Some(token);
    }

    warn!("⚠️ Dropping record {}: {}", key, problems.join("; "));
    errors.push(format!("{}: {}", key, problems.join("; ")));
    None
}
