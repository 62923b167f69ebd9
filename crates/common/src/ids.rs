use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Wrapping the UUID keeps order, payment and user identifiers from being
/// mixed up at call sites.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Declares a string-backed identifier newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order.
    OrderId
);

uuid_id!(
    /// Unique identifier for a payment attempt.
    PaymentId
);

uuid_id!(
    /// Identifier of an already-authenticated user.
    UserId
);

string_id!(
    /// Opaque identifier of an anonymous shopping session.
    SessionId
);

string_id!(
    /// Catalog product identifier.
    ProductId
);

string_id!(
    /// Catalog variant identifier.
    VariantId
);

/// The identity a cart is scoped to.
///
/// A user cart is durable; a session cart is ephemeral and expires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OwnerKey {
    User(UserId),
    Session(SessionId),
}

/// Error returned when an owner key string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid owner key: {0}")]
pub struct OwnerKeyParseError(pub String);

impl OwnerKey {
    /// Creates an owner key for a user.
    pub fn user(user_id: UserId) -> Self {
        OwnerKey::User(user_id)
    }

    /// Creates an owner key for an anonymous session.
    pub fn session(session_id: impl Into<SessionId>) -> Self {
        OwnerKey::Session(session_id.into())
    }

    /// Returns the user id when this key belongs to a user.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            OwnerKey::User(id) => Some(*id),
            OwnerKey::Session(_) => None,
        }
    }

    /// Returns true if this is a session-scoped key.
    pub fn is_session(&self) -> bool {
        matches!(self, OwnerKey::Session(_))
    }

    /// Returns the storage representation (`user:{uuid}` or `session:{id}`).
    pub fn as_key(&self) -> String {
        match self {
            OwnerKey::User(id) => format!("user:{id}"),
            OwnerKey::Session(id) => format!("session:{id}"),
        }
    }

    /// Parses the storage representation produced by [`OwnerKey::as_key`].
    pub fn parse(key: &str) -> Result<Self, OwnerKeyParseError> {
        if let Some(rest) = key.strip_prefix("user:") {
            let uuid = Uuid::parse_str(rest).map_err(|_| OwnerKeyParseError(key.to_string()))?;
            return Ok(OwnerKey::User(UserId::from_uuid(uuid)));
        }
        match key.strip_prefix("session:") {
            Some(rest) if !rest.is_empty() => Ok(OwnerKey::Session(SessionId::new(rest))),
            _ => Err(OwnerKeyParseError(key.to_string())),
        }
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl From<UserId> for OwnerKey {
    fn from(id: UserId) -> Self {
        OwnerKey::User(id)
    }
}

impl From<SessionId> for OwnerKey {
    fn from(id: SessionId) -> Self {
        OwnerKey::Session(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_new_creates_unique_ids() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn payment_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = PaymentId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn product_id_string_conversion() {
        let id = ProductId::new("SKU-001");
        assert_eq!(id.as_str(), "SKU-001");

        let id2: ProductId = "SKU-002".into();
        assert_eq!(id2.as_str(), "SKU-002");
    }

    #[test]
    fn owner_key_round_trips_through_storage_form() {
        let user = OwnerKey::user(UserId::new());
        assert_eq!(OwnerKey::parse(&user.as_key()).unwrap(), user);

        let session = OwnerKey::session("abc123");
        assert_eq!(session.as_key(), "session:abc123");
        assert_eq!(OwnerKey::parse("session:abc123").unwrap(), session);
    }

    #[test]
    fn owner_key_rejects_malformed_keys() {
        assert!(OwnerKey::parse("user:not-a-uuid").is_err());
        assert!(OwnerKey::parse("session:").is_err());
        assert!(OwnerKey::parse("cart:42").is_err());
    }

    #[test]
    fn owner_key_user_and_session_are_exclusive() {
        let user_id = UserId::new();
        let user = OwnerKey::user(user_id);
        assert_eq!(user.user_id(), Some(user_id));
        assert!(!user.is_session());

        let session = OwnerKey::session("s-1");
        assert_eq!(session.user_id(), None);
        assert!(session.is_session());
    }

    #[test]
    fn owner_key_serialization_is_tagged() {
        let key = OwnerKey::session("s-1");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["kind"], "session");
        assert_eq!(json["id"], "s-1");
    }
}
