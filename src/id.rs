use crate::fetch::INDEX_NAME;
use std::fmt;

/// Identifier of one item document, safe to use as a file stem.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(String);

impl ItemId {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let safe = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !safe || raw == INDEX_NAME {
            return Err(IdError::Unsafe(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a record has no usable id. Both cases skip the record.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("no `id` query parameter")]
    Missing,
    #[error("id `{0}` is not usable as a file name")]
    Unsafe(String),
}

/// Returns the first `id` query parameter of `url`.
pub fn extract_item_id(url: &str) -> Result<ItemId, IdError> {
    let Some((_, query)) = url.split_once('?') else {
        return Err(IdError::Missing);
    };
    let query = query.split_once('#').map_or(query, |(query, _)| query);

    let raw = query
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(key, _)| *key == "id")
        .map(|(_, value)| value)
        .ok_or(IdError::Missing)?;
    if raw.is_empty() {
        return Err(IdError::Missing);
    }

    let raw = raw.replace('+', " ");
    let decoded = urlencoding::decode(&raw).map_err(|_| IdError::Unsafe(raw.clone()))?;
    ItemId::parse(&decoded)
}
