//! Rewrites of fetched documents before they are persisted.
//!
//! Index documents only get the vendor token substitution. Item documents
//! additionally get the links key renamed, their links relabelled, and legacy
//! viewer URLs pointed at the frame viewer.

use crate::config::RewriteRules;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Index,
    Item,
}

pub struct Transformer {
    rules: RewriteRules,
}

impl Transformer {
    pub fn new(rules: RewriteRules) -> Self {
        Self { rules }
    }

    pub fn transform(&self, value: &Value, kind: DocumentKind) -> Value {
        match value {
            Value::String(text) => Value::String(self.rewrite_string(text, kind)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.transform(item, kind))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(self.transform_object(map, kind)),
            Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        }
    }

    fn transform_object(&self, map: &Map<String, Value>, kind: DocumentKind) -> Map<String, Value> {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            if kind == DocumentKind::Item && *key == self.rules.links_key {
                out.insert(self.rules.renamed_links_key.clone(), self.relabel_links(value));
            } else {
                out.insert(key.clone(), self.transform(value, kind));
            }
        }
        out
    }

    fn relabel_links(&self, value: &Value) -> Value {
        let Value::Array(links) = value else {
            return self.transform(value, DocumentKind::Item);
        };
        let links = links.iter().enumerate().map(|(position, link)| {
            match self.transform(link, DocumentKind::Item) {
                Value::Object(mut link) => {
                    link.insert(
                        self.rules.link_label_field.clone(),
                        Value::String(format!("Link {}", position + 1)),
                    );
                    Value::Object(link)
                }
                other => other,
            }
        });
        Value::Array(links.collect())
    }

    /// Applies the string rules; link URLs are string leaves like any other.
    pub fn rewrite_string(&self, text: &str, kind: DocumentKind) -> String {
        let text = if self.rules.vendor_token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.rules.vendor_token, &self.rules.vendor_replacement)
        };
        if kind == DocumentKind::Item {
            if let Some(rewritten) = self.rewrite_viewer_url(&text) {
                return rewritten;
            }
        }
        text
    }

    fn rewrite_viewer_url(&self, text: &str) -> Option<String> {
        let legacy = self.rules.legacy_viewer_prefix.as_str();
        if legacy.is_empty() {
            return None;
        }
        let rest = text.strip_prefix(legacy)?;
        // The prefix ends in a query key, so `?srcset=` must not match `?src`.
        if rest.is_empty() || rest.starts_with('=') || rest.starts_with('&') {
            Some(format!("{}{rest}", self.rules.frame_viewer_prefix))
        } else {
            None
        }
    }
}
