// Serialization - Replica document <-> in-memory inventory
// Principle: pure, no I/O; a single bad record never aborts the read

mod keys;
mod validate;

pub use keys::*;
pub use validate::{decode_token, has_minimum_structure, validate_txf_token};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::types::{
    InvalidEntry, NametagData, OutboxEntry, SentEntry, Token, Tombstone, TxfMeta, TxfToken,
};

/// Serialization errors
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Replica document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Replica document must be a JSON object")]
    NotAnObject,
}

/// In-memory view of one replica
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxfStorageData {
    pub meta: Option<TxfMeta>,
    pub nametag: Option<NametagData>,
    pub tombstones: Vec<Tombstone>,
    pub outbox: Vec<OutboxEntry>,
    pub sent: Vec<SentEntry>,
    pub invalid: Vec<InvalidEntry>,
    /// Active tokens by token id
    pub tokens: BTreeMap<String, TxfToken>,
    pub archived: BTreeMap<String, TxfToken>,
    /// Forked copies by `(token id, state hash)`
    pub forked: BTreeMap<(String, String), TxfToken>,
    /// Raw records the reader could not use, written back unchanged.
    /// For array keys only the rejected elements are kept.
    pub skipped: BTreeMap<String, Value>,
}

impl TxfStorageData {
    pub fn is_tombstoned(&self, token_id: &str, state_hash: &str) -> bool {
        self.tombstones.iter().any(|t| t.matches(token_id, state_hash))
    }

    /// Append a tombstone unless the same state is already recorded
    pub fn add_tombstone(&mut self, tombstone: Tombstone) -> bool {
        if self.is_tombstoned(&tombstone.token_id, &tombstone.state_hash) {
            return false;
        }
        self.tombstones.push(tombstone);
        true
    }

    /// Keep a divergent copy of `token` under its current state hash
    pub fn add_forked(&mut self, token: TxfToken) {
        let state_hash = token.current_state_hash().unwrap_or_default().to_string();
        self.forked
            .insert((token.token_id().to_string(), state_hash), token);
    }

    /// Active tokens wrapped for the validator
    pub fn active_tokens(&self) -> Vec<Token> {
        self.tokens.values().map(Token::from_txf).collect()
    }
}

/// Parse result: the inventory plus every per-record failure
#[derive(Debug, Clone, Default)]
pub struct ParsedStorage {
    pub data: TxfStorageData,
    pub validation_errors: Vec<String>,
}

fn decode_record<T: DeserializeOwned>(
    key: &str,
    value: &Value,
    errors: &mut Vec<String>,
    skipped: &mut BTreeMap<String, Value>,
) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            errors.push(format!("{}: {}", key, e));
            skipped.insert(key.to_string(), value.clone());
            None
        }
    }
}

/// Decode an array record element by element
fn decode_array<T: DeserializeOwned>(
    key: &str,
    value: &Value,
    errors: &mut Vec<String>,
    skipped: &mut BTreeMap<String, Value>,
) -> Vec<T> {
    let Some(items) = value.as_array() else {
        errors.push(format!("{}: expected an array", key));
        skipped.insert(key.to_string(), value.clone());
        return Vec::new();
    };

    let mut decoded = Vec::new();
    let mut rejected = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value(item.clone()) {
            Ok(record) => decoded.push(record),
            Err(e) => {
                errors.push(format!("{}[{}]: {}", key, i, e));
                rejected.push(item.clone());
            }
        }
    }
    if !rejected.is_empty() {
        skipped.insert(key.to_string(), Value::Array(rejected));
    }
    decoded
}

/// Parse a replica document (already decoded JSON)
pub fn parse_storage_data(document: &Value) -> Result<ParsedStorage, SerializationError> {
    let entries = document.as_object().ok_or(SerializationError::NotAnObject)?;

    let mut parsed = ParsedStorage::default();
    let mut skipped = BTreeMap::new();
    let errors = &mut parsed.validation_errors;
    let data = &mut parsed.data;

    for (key, value) in entries {
        let Some(storage_key) = StorageKey::parse(key) else {
            errors.push(format!("{}: unknown key", key));
            skipped.insert(key.clone(), value.clone());
            continue;
        };

        let token = match &storage_key {
            StorageKey::Active(token_id)
            | StorageKey::Archived(token_id)
            | StorageKey::Forked { token_id, .. } => {
                let token = decode_token(key, token_id, value, errors);
                if token.is_none() {
                    skipped.insert(key.clone(), value.clone());
                }
                token
            }
            _ => None,
        };

        match storage_key {
            StorageKey::Meta => data.meta = decode_record(key, value, errors, &mut skipped),
            StorageKey::Nametag => data.nametag = decode_record(key, value, errors, &mut skipped),
            StorageKey::Tombstones => {
                data.tombstones = decode_array(key, value, errors, &mut skipped)
            }
            StorageKey::Outbox => data.outbox = decode_array(key, value, errors, &mut skipped),
            StorageKey::Sent => data.sent = decode_array(key, value, errors, &mut skipped),
            StorageKey::Invalid => data.invalid = decode_array(key, value, errors, &mut skipped),
            StorageKey::Active(token_id) => {
                if let Some(token) = token {
                    data.tokens.insert(token_id, token);
                }
            }
            StorageKey::Archived(token_id) => {
                if let Some(token) = token {
                    data.archived.insert(token_id, token);
                }
            }
            StorageKey::Forked {
                token_id,
                state_hash,
            } => {
                if let Some(token) = token {
                    data.forked.insert((token_id, state_hash), token);
                }
            }
        }
    }
    data.skipped = skipped;

    debug!(
        "Parsed replica: {} active, {} archived, {} forked, {} tombstones, {} kept raw",
        data.tokens.len(),
        data.archived.len(),
        data.forked.len(),
        data.tombstones.len(),
        data.skipped.len()
    );

    Ok(parsed)
}

/// Parse a replica document from its JSON text
pub fn parse_storage_json(json: &str) -> Result<ParsedStorage, SerializationError> {
    let document: Value = serde_json::from_str(json)?;
    parse_storage_data(&document)
}

fn insert<T: Serialize>(
    map: &mut Map<String, Value>,
    key: String,
    value: &T,
) -> Result<(), SerializationError> {
    map.insert(key, serde_json::to_value(value)?);
    Ok(())
}

/// Build the replica document; empty collections omit their key
pub fn build_storage_data(data: &TxfStorageData) -> Result<Value, SerializationError> {
    let mut map = Map::new();

    let meta = data.meta.clone().unwrap_or_default();
    insert(&mut map, StorageKey::Meta.to_key(), &meta)?;

    if let Some(nametag) = &data.nametag {
        insert(&mut map, StorageKey::Nametag.to_key(), nametag)?;
    }
    if !data.tombstones.is_empty() {
        insert(&mut map, StorageKey::Tombstones.to_key(), &data.tombstones)?;
    }
    if !data.outbox.is_empty() {
        insert(&mut map, StorageKey::Outbox.to_key(), &data.outbox)?;
    }
    if !data.sent.is_empty() {
        insert(&mut map, StorageKey::Sent.to_key(), &data.sent)?;
    }
    if !data.invalid.is_empty() {
        insert(&mut map, StorageKey::Invalid.to_key(), &data.invalid)?;
    }

    for (token_id, token) in &data.tokens {
        insert(&mut map, StorageKey::Active(token_id.clone()).to_key(), token)?;
    }
    for (token_id, token) in &data.archived {
        insert(&mut map, StorageKey::Archived(token_id.clone()).to_key(), token)?;
    }
    for ((token_id, state_hash), token) in &data.forked {
        let key = StorageKey::Forked {
            token_id: token_id.clone(),
            state_hash: state_hash.clone(),
        };
        insert(&mut map, key.to_key(), token)?;
    }

    restore_skipped(&mut map, &data.skipped);
    Ok(Value::Object(map))
}

/// Put unusable records back next to the rebuilt ones
///
/// Array keys get their rejected elements appended, `_meta` keeps every raw
/// field the rebuilt record does not set. A rebuilt token record supersedes
/// a raw one under the same key.
fn restore_skipped(map: &mut Map<String, Value>, skipped: &BTreeMap<String, Value>) {
    let meta_key = StorageKey::Meta.to_key();

    for (key, raw) in skipped {
        match map.get_mut(key) {
            None => {
                map.insert(key.clone(), raw.clone());
            }
            Some(Value::Array(items)) => match raw {
                Value::Array(rejected) => items.extend(rejected.iter().cloned()),
                other => items.push(other.clone()),
            },
            Some(Value::Object(built)) if *key == meta_key => {
                if let Value::Object(fields) = raw {
                    for (field, value) in fields {
                        built.entry(field.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
            Some(_) => warn!("⚠️ Raw record {} superseded by a rebuilt one", key),
        }
    }
}
