//! Transaction and participant identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&$name> for $name {
            fn from(id: &$name) -> Self {
                id.clone()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_id!(
    /// Identifies a distributed transaction.
    ///
    /// Assigned by the caller and expected to be unique for the lifetime of
    /// the system. [`TransactionId::generate`] produces a random UUID-based
    /// id for callers that have no natural key.
    TransactionId
);

string_id!(
    /// Identifies a participant registered with a coordinator.
    ParticipantId
);

impl TransactionId {
    /// Generates a fresh random transaction id (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn display_is_inner_string() {
        let id = TransactionId::new("tx-42");
        assert_eq!(id.to_string(), "tx-42");
        assert_eq!(id.as_str(), "tx-42");
        assert_eq!(id, "tx-42");
    }

    #[test]
    fn conversions_agree() {
        let a = ParticipantId::from("p1");
        let b = ParticipantId::from(String::from("p1"));
        let c = ParticipantId::from(&a);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(c.into_inner(), "p1");
    }

    #[test]
    fn generated_ids_are_distinct() {
        let ids: HashSet<_> = (0..64).map(|_| TransactionId::generate()).collect();
        assert_eq!(ids.len(), 64);
    }
}
