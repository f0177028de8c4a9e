//! Shard keys and the static shard mapping.
//!
//! A shard key is the lowercase last hex digit of an aggregate's UUID, which
//! caps the topology at 16 shards. The mapping from key to connection string
//! is loaded once at startup and never changes for the life of the process.

use crate::{ConfigError, EntityId};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::Path;

/// Number of distinct shard keys the routing scheme can produce.
pub const SHARD_COUNT: usize = 16;

/// One of the 16 shard symbols (`0`-`9`, `a`-`f`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey(char);

impl ShardKey {
    /// All keys in hex order.
    pub fn all() -> impl Iterator<Item = ShardKey> {
        "0123456789abcdef".chars().map(ShardKey)
    }

    /// Derive the owning shard of an identifier from the last character of
    /// its canonical lowercase hyphenated form.
    pub fn for_id(id: &EntityId) -> Self {
        let nibble = id.as_bytes()[15] & 0x0f;
        ShardKey(char::from_digit(nibble as u32, 16).unwrap_or('0'))
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_digit() || ('a'..='f').contains(&c) => Ok(ShardKey(c)),
            _ => Err(ConfigError::InvalidValue {
                field: "shard_key".to_string(),
                value: raw.to_string(),
                reason: "expected a single lowercase hex digit".to_string(),
            }),
        }
    }

    pub fn as_char(&self) -> char {
        self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ShardKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShardKey::parse(s)
    }
}

/// Connection string for one shard. Never printed in clear.
#[derive(Clone)]
pub struct ShardDsn(SecretString);

impl ShardDsn {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self(SecretString::from(dsn.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// The DSN with any password replaced by `***`, safe for logs.
    pub fn redacted(&self) -> String {
        redact_dsn(self.expose())
    }
}

impl fmt::Debug for ShardDsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ShardDsn").field(&self.redacted()).finish()
    }
}

/// Replace the password component of a URL-style DSN with `***`.
///
/// Key/value style DSNs (`host=... password=...`) have the password value
/// masked as well.
pub fn redact_dsn(dsn: &str) -> String {
    if let Some((scheme, rest)) = dsn.split_once("://") {
        if let Some((userinfo, host)) = rest.rsplit_once('@') {
            let user = userinfo.split(':').next().unwrap_or_default();
            return format!("{}://{}:***@{}", scheme, user, host);
        }
        return dsn.to_string();
    }

    dsn.split_whitespace()
        .map(|part| match part.split_once('=') {
            Some((key, _)) if key.eq_ignore_ascii_case("password") => format!("{}=***", key),
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Immutable shard-key → connection-string table, in file order.
#[derive(Debug, Clone)]
pub struct ShardMapping {
    entries: Vec<(ShardKey, ShardDsn)>,
}

impl ShardMapping {
    /// Build a mapping from explicit pairs. Order is preserved.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (ShardKey, S)>,
        S: Into<String>,
    {
        let mut entries: Vec<(ShardKey, ShardDsn)> = Vec::new();
        for (key, dsn) in pairs {
            let dsn = dsn.into();
            if dsn.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("mapping[{}]", key),
                    value: String::new(),
                    reason: "connection string must not be empty".to_string(),
                });
            }
            if entries.iter().any(|(existing, _)| *existing == key) {
                return Err(ConfigError::InvalidValue {
                    field: "mapping".to_string(),
                    value: key.to_string(),
                    reason: "duplicate shard key".to_string(),
                });
            }
            entries.push((key, ShardDsn::new(dsn)));
        }
        if entries.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "mapping".to_string(),
            });
        }
        Ok(Self { entries })
    }

    /// Parse a JSON object of the form `{"<key>": "<dsn>", ...}`.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let value: JsonValue = serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
            source_name: "mapping".to_string(),
            reason: e.to_string(),
        })?;

        let object = match value {
            JsonValue::Object(object) if !object.is_empty() => object,
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "mapping".to_string(),
                    value: String::new(),
                    reason: "mapping file must be a non-empty JSON object: {shard_key: dsn}"
                        .to_string(),
                })
            }
        };

        let mut pairs = Vec::with_capacity(object.len());
        for (raw_key, dsn) in object {
            let key = ShardKey::parse(&raw_key)?;
            let dsn = match dsn {
                JsonValue::String(dsn) => dsn,
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("mapping[{}]", raw_key),
                        value: other.to_string(),
                        reason: "connection string must be a JSON string".to_string(),
                    })
                }
            };
            pairs.push((key, dsn));
        }
        Self::from_pairs(pairs)
    }

    /// Load the mapping file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, key: &ShardKey) -> Option<&ShardDsn> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, dsn)| dsn)
    }

    pub fn contains(&self, key: &ShardKey) -> bool {
        self.get(key).is_some()
    }

    /// Entries in their fixed iteration order.
    pub fn iter(&self) -> impl Iterator<Item = (&ShardKey, &ShardDsn)> {
        self.entries.iter().map(|(key, dsn)| (key, dsn))
    }

    pub fn keys(&self) -> impl Iterator<Item = ShardKey> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every key the router can produce has a shard.
    pub fn is_complete(&self) -> bool {
        ShardKey::all().all(|key| self.contains(&key))
    }

    /// Keys the router can produce that this mapping lacks.
    pub fn missing_keys(&self) -> Vec<ShardKey> {
        ShardKey::all().filter(|key| !self.contains(key)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use uuid::Uuid;

    fn full_mapping_json() -> String {
        let body = ShardKey::all()
            .map(|k| format!("\"{}\": \"postgresql://app:pw@db-{}:5432/travel\"", k, k))
            .collect::<Vec<_>>()
            .join(",");
        format!("{{{}}}", body)
    }

    #[test]
    fn test_shard_key_matches_last_hex_char() {
        for _ in 0..64 {
            let id = Uuid::new_v4();
            let last = id.to_string().chars().last().unwrap();
            assert_eq!(ShardKey::for_id(&id).as_char(), last);
        }
    }

    #[test]
    fn test_shard_key_parse_rejects_non_hex() {
        assert!(ShardKey::parse("a").is_ok());
        assert!(ShardKey::parse("A").is_err());
        assert!(ShardKey::parse("g").is_err());
        assert!(ShardKey::parse("10").is_err());
        assert!(ShardKey::parse("").is_err());
    }

    #[test]
    fn test_mapping_preserves_file_order() {
        let raw = r#"{"f": "postgresql://a@h/f", "0": "postgresql://a@h/0", "7": "postgresql://a@h/7"}"#;
        let mapping = ShardMapping::from_json_str(raw).unwrap();
        let keys: Vec<char> = mapping.keys().map(|k| k.as_char()).collect();
        assert_eq!(keys, vec!['f', '0', '7']);
        assert!(!mapping.is_complete());
        assert_eq!(mapping.missing_keys().len(), 13);
    }

    #[test]
    fn test_mapping_complete() {
        let mapping = ShardMapping::from_json_str(&full_mapping_json()).unwrap();
        assert_eq!(mapping.len(), SHARD_COUNT);
        assert!(mapping.is_complete());
    }

    #[test]
    fn test_mapping_rejects_bad_documents() {
        assert!(matches!(
            ShardMapping::from_json_str("[]"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ShardMapping::from_json_str("{}"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ShardMapping::from_json_str(r#"{"0": 5}"#),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ShardMapping::from_json_str(r#"{"0": "  "}"#),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ShardMapping::from_json_str("not json"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_mapping_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(full_mapping_json().as_bytes()).unwrap();
        let mapping = ShardMapping::load(file.path()).unwrap();
        assert!(mapping.is_complete());

        let missing = ShardMapping::load("/nonexistent/mapping.json");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_redact_dsn() {
        assert_eq!(
            redact_dsn("postgresql://app:s3cret@db:5432/travel"),
            "postgresql://app:***@db:5432/travel"
        );
        assert_eq!(
            redact_dsn("host=db user=app password=s3cret dbname=travel"),
            "host=db user=app password=*** dbname=travel"
        );
        let dsn = ShardDsn::new("postgresql://app:s3cret@db/travel");
        assert!(!format!("{:?}", dsn).contains("s3cret"));
    }
}
