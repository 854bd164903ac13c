// Keys - Flat key namespace of the replica document
//
// _meta                            format version + caller metadata
// _nametag                         registered nametag
// _tombstones / _outbox            arrays
// _sent / _invalid                 arrays
// _<tokenId>                       active token
// _archived_<tokenId>              superseded local state
// _forked_<tokenId>_<stateHash>    divergent copy kept for audit

pub const KEY_META: &str = "_meta";
pub const KEY_NAMETAG: &str = "_nametag";
pub const KEY_TOMBSTONES: &str = "_tombstones";
pub const KEY_OUTBOX: &str = "_outbox";
pub const KEY_SENT: &str = "_sent";
pub const KEY_INVALID: &str = "_invalid";

pub const PREFIX_ARCHIVED: &str = "_archived_";
pub const PREFIX_FORKED: &str = "_forked_";

/// A decoded replica key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKey {
    Meta,
    Nametag,
    Tombstones,
    Outbox,
    Sent,
    Invalid,
    Active(String),
    Archived(String),
    Forked { token_id: String, state_hash: String },
}

impl StorageKey {
    /// Dispatch a raw key by prefix; `None` for keys outside the namespace
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            KEY_META => return Some(StorageKey::Meta),
            KEY_NAMETAG => return Some(StorageKey::Nametag),
            KEY_TOMBSTONES => return Some(StorageKey::Tombstones),
            KEY_OUTBOX => return Some(StorageKey::Outbox),
            KEY_SENT => return Some(StorageKey::Sent),
            KEY_INVALID => return Some(StorageKey::Invalid),
            _ => {}
        }

        if let Some(token_id) = key.strip_prefix(PREFIX_ARCHIVED) {
            return (!token_id.is_empty()).then(|| StorageKey::Archived(token_id.to_string()));
        }

        if let Some(rest) = key.strip_prefix(PREFIX_FORKED) {
            let (token_id, state_hash) = rest.split_once('_')?;
            if token_id.is_empty() || state_hash.is_empty() {
                return None;
            }
            return Some(StorageKey::Forked {
                token_id: token_id.to_string(),
                state_hash: state_hash.to_string(),
            });
        }

        let token_id = key.strip_prefix('_')?;
        if token_id.is_empty() || token_id.contains('_') {
            return None;
        }
        Some(StorageKey::Active(token_id.to_string()))
    }

    pub fn to_key(&self) -> String {
        match self {
            StorageKey::Meta => KEY_META.to_string(),
            StorageKey::Nametag => KEY_NAMETAG.to_string(),
            StorageKey::Tombstones => KEY_TOMBSTONES.to_string(),
            StorageKey::Outbox => KEY_OUTBOX.to_string(),
            StorageKey::Sent => KEY_SENT.to_string(),
            StorageKey::Invalid => KEY_INVALID.to_string(),
            StorageKey::Active(token_id) => format!("_{}", token_id),
            StorageKey::Archived(token_id) => format!("{}{}", PREFIX_ARCHIVED, token_id),
            StorageKey::Forked {
                token_id,
                state_hash,
            } => format!("{}{}_{}", PREFIX_FORKED, token_id, state_hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_keys() {
        assert_eq!(StorageKey::parse("_meta"), Some(StorageKey::Meta));
        assert_eq!(StorageKey::parse("_tombstones"), Some(StorageKey::Tombstones));
        assert_eq!(StorageKey::parse("_outbox"), Some(StorageKey::Outbox));
        assert_eq!(StorageKey::parse("_nametag"), Some(StorageKey::Nametag));
    }

    #[test]
    fn test_token_keys() {
        assert_eq!(
            StorageKey::parse("_abc123"),
            Some(StorageKey::Active("abc123".to_string()))
        );
        assert_eq!(
            StorageKey::parse("_archived_abc123"),
            Some(StorageKey::Archived("abc123".to_string()))
        );
        assert_eq!(
            StorageKey::parse("_forked_abc123_ff00"),
            Some(StorageKey::Forked {
                token_id: "abc123".to_string(),
                state_hash: "ff00".to_string(),
            })
        );
    }

    #[test]
    fn test_keys_outside_namespace() {
        assert_eq!(StorageKey::parse("meta"), None);
        assert_eq!(StorageKey::parse("_"), None);
        assert_eq!(StorageKey::parse("_archived_"), None);
        assert_eq!(StorageKey::parse("_forked_abc"), None);
        assert_eq!(StorageKey::parse("_integrity_x"), None);
    }

    #[test]
    fn test_to_key_inverts_parse() {
        for raw in ["_meta", "_sent", "_abc", "_archived_abc", "_forked_abc_0011"] {
            let key = StorageKey::parse(raw).unwrap();
            assert_eq!(key.to_key(), raw);
        }
    }
}
