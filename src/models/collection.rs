use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::models::token::Token;

pub const SCHEMA_VERSION: u32 = 1;

/// The unit actually written to a backend. Every save replaces the whole
/// document; there are no partial updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCollection {
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for TokenCollection {
    fn default() -> Self {
        Self::empty()
    }
}

impl TokenCollection {
    pub fn empty() -> Self {
        Self {
            tokens: Vec::new(),
            schema_version: SCHEMA_VERSION,
            last_updated: Utc::now(),
        }
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        let mut collection = Self {
            tokens,
            ..Self::empty()
        };
        collection.dedupe();
        collection
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tokens.iter().any(|t| t.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Token> {
        self.tokens.iter_mut().find(|t| t.id == id)
    }

    pub fn insert(&mut self, token: Token) -> Result<(), StoreError> {
        if self.contains(&token.id) {
            return Err(StoreError::DuplicateId(token.id));
        }
        self.tokens.push(token);
        Ok(())
    }

    /// Replace the token with the same id. Returns `false` if none exists.
    pub fn replace(&mut self, token: Token) -> bool {
        match self.get_mut(&token.id) {
            Some(slot) => {
                *slot = token;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Token> {
        let index = self.tokens.iter().position(|t| t.id == id)?;
        Some(self.tokens.remove(index))
    }

    /// Drop every token whose expiry is at or before `now`. Returns the
    /// number removed.
    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|t| !t.is_expired_at(now));
        before - self.tokens.len()
    }

    /// Keep the first occurrence of each id. Returns the number dropped.
    pub fn dedupe(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.tokens.len();
        self.tokens.retain(|t| seen.insert(t.id.clone()));
        before - self.tokens.len()
    }

    /// Stamp the collection before a save.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
        self.schema_version = SCHEMA_VERSION;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::TokenStatus;
    use chrono::Duration;

    fn token(id: &str) -> Token {
        Token {
            id: id.into(),
            name: id.into(),
            secret_hash: format!("hash-{}", id),
            permissions: Default::default(),
            status: TokenStatus::Active,
            created_at: Utc::now(),
            expires_at: None,
            auxiliary_data: None,
        }
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut c = TokenCollection::empty();
        c.insert(token("t1")).unwrap();
        let err = c.insert(token("t1")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(id) if id == "t1"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let mut second = token("t1");
        second.secret_hash = "other".into();
        let c = TokenCollection::from_tokens(vec![token("t1"), second, token("t2")]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("t1").unwrap().secret_hash, "hash-t1");
    }

    #[test]
    fn test_replace_and_remove() {
        let mut c = TokenCollection::from_tokens(vec![token("t1")]);
        let mut changed = token("t1");
        changed.name = "renamed".into();
        assert!(c.replace(changed));
        assert_eq!(c.get("t1").unwrap().name, "renamed");
        assert!(!c.replace(token("missing")));

        assert!(c.remove("t1").is_some());
        assert!(c.remove("t1").is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_remove_expired() {
        let now = Utc::now();
        let mut expired = token("old");
        expired.expires_at = Some(now - Duration::minutes(1));
        let mut future = token("new");
        future.expires_at = Some(now + Duration::minutes(1));
        let mut c = TokenCollection::from_tokens(vec![expired, future, token("forever")]);

        assert_eq!(c.remove_expired(now), 1);
        assert!(!c.contains("old"));
        assert!(c.contains("new") && c.contains("forever"));
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let c: TokenCollection = serde_json::from_str("{}").unwrap();
        assert!(c.is_empty());
        assert_eq!(c.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_wire_format_field_names() {
        let json = serde_json::to_value(TokenCollection::from_tokens(vec![token("t1")])).unwrap();
        assert!(json.get("tokens").unwrap().is_array());
        assert_eq!(json["schemaVersion"], SCHEMA_VERSION);
        assert!(json.get("lastUpdated").is_some());
    }
}
