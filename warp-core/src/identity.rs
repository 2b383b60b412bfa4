//! Identity types for workflow orchestrator entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ENTITY ID TYPE SYSTEM
// ============================================================================

/// Trait for type-safe entity IDs.
///
/// Compile-time safety so that, say, a `SessionId` can never be passed where
/// a `TemplateId` is expected. Each entity type gets its own strongly-typed
/// wrapper around a `Uuid`.
pub trait EntityIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The name of the entity type (e.g., "session", "template").
    const ENTITY_NAME: &'static str;

    /// Create a new ID from a UUID.
    fn new(uuid: Uuid) -> Self;

    /// Get the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Create a nil (all zeros) ID.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    /// Create a new timestamp-sortable UUIDv7 ID.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Create a new random UUIDv4 ID.
    fn new_v4() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Error type for parsing entity IDs from strings.
#[derive(Debug, Clone)]
pub struct EntityIdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for EntityIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to parse {} ID from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for EntityIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

macro_rules! define_entity_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self::new)
                    .map_err(|e| EntityIdParseError {
                        entity_name: Self::ENTITY_NAME,
                        input: s.to_string(),
                        source: e,
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                Uuid::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

// ============================================================================
// ENTITY ID TYPES
// ============================================================================

define_entity_id!(SessionId, "session", "Type-safe ID for a conversation session.");
define_entity_id!(UserId, "user", "Type-safe ID for the connected user.");
define_entity_id!(
    PermissionRequestId,
    "permission_request",
    "Type-safe ID for a permission request."
);
define_entity_id!(
    QuestionId,
    "question",
    "Type-safe ID for an outstanding user question."
);

// ============================================================================
// OTHER IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// CONTENT-ADDRESSED TEMPLATE ID
// ============================================================================

/// Stable identifier for a `WorkflowTemplate`, derived from a canonical hash
/// of its steps and edges rather than randomly generated. Two templates with
/// identical structure always share the same `TemplateId`, which is what lets
/// the Designer's output coalesce with an existing stored template.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId([u8; 32]);

impl TemplateId {
    /// Derive a template id from the SHA-256 hash of pre-serialized canonical bytes.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// A non-content-addressed id for tests/fixtures that just need a
    /// unique, valid `TemplateId` and don't care what it hashes from.
    pub fn now_v7() -> Self {
        Self::from_canonical_bytes(Uuid::now_v7().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemplateId({})", self.to_hex())
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Error returned when a `TemplateId` cannot be parsed from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateIdParseError(pub String);

impl fmt::Display for TemplateIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid template id: {}", self.0)
    }
}

impl std::error::Error for TemplateIdParseError {}

impl FromStr for TemplateId {
    type Err = TemplateIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| TemplateIdParseError(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(TemplateIdParseError(s.to_string()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for TemplateId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TemplateId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_type_safety() {
        let session_id = SessionId::now_v7();
        let template_id = TemplateId::now_v7();
        assert_ne!(session_id.as_uuid(), template_id.as_uuid());
    }

    #[test]
    fn entity_id_display() {
        let id = SessionId::new(Uuid::nil());
        assert_eq!(
            format!("{:?}", id),
            "SessionId(00000000-0000-0000-0000-000000000000)"
        );
        assert_eq!(format!("{}", id), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn entity_id_from_str() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id: SessionId = uuid_str.parse().expect("valid UUID should parse");
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn entity_id_parse_error() {
        let result: Result<SessionId, _> = "not-a-uuid".parse();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.entity_name, "session");
    }

    #[test]
    fn entity_id_serde_round_trip() {
        let id = TemplateId::now_v7();
        let json = serde_json::to_string(&id).expect("serialize");
        assert!(json.starts_with('"'));
        let back: TemplateId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }

    #[test]
    fn entity_id_default_is_nil() {
        assert_eq!(SessionId::default(), SessionId::nil());
    }

    #[test]
    fn template_id_is_content_addressed() {
        let a = TemplateId::from_canonical_bytes(b"same plan");
        let b = TemplateId::from_canonical_bytes(b"same plan");
        let c = TemplateId::from_canonical_bytes(b"different plan");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn template_id_round_trips_through_hex() {
        let id = TemplateId::from_canonical_bytes(b"round trip");
        let hex = id.to_hex();
        let parsed: TemplateId = hex.parse().expect("valid hex should parse");
        assert_eq!(id, parsed);
    }
}
