use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, rejecting empty or whitespace-only input.
            pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(TypeError::EmptyIdentifier($label));
                }
                Ok(Self(value))
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier holds no characters.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// The authenticated principal whose private collection is being changed.
    OwnerId,
    "owner id"
);

string_id!(
    /// System-generated spot identifier, unique per owner and immutable.
    SpotId,
    "spot id"
);

string_id!(
    /// External identifier of a physical place (from a places lookup).
    ///
    /// Unique per owner among that owner's spots.
    PlaceId,
    "place id"
);

/// Explicit owner context handed to every coordinator call.
///
/// Replaces ambient "current user" state: the caller decides who is acting,
/// and an anonymous session is a fatal precondition failure for every
/// mutating operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Anonymous,
    Authenticated(OwnerId),
}

impl Session {
    /// Session for an authenticated owner.
    pub fn owner(owner: OwnerId) -> Self {
        Self::Authenticated(owner)
    }

    /// The authenticated owner, if any.
    pub fn current_owner(&self) -> Option<&OwnerId> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(owner) => Some(owner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_identifiers() {
        assert_eq!(
            PlaceId::new("   "),
            Err(TypeError::EmptyIdentifier("place id"))
        );
        assert_eq!(OwnerId::new(""), Err(TypeError::EmptyIdentifier("owner id")));
    }

    #[test]
    fn serializes_transparently() {
        let id = SpotId::new("abc123").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
        let back: SpotId = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn debug_and_display() {
        let id = OwnerId::new("u1").unwrap();
        assert_eq!(format!("{id}"), "u1");
        assert_eq!(format!("{id:?}"), "OwnerId(u1)");
    }

    #[test]
    fn session_owner() {
        assert!(Session::Anonymous.current_owner().is_none());
        let owner = OwnerId::new("u1").unwrap();
        let session = Session::owner(owner.clone());
        assert_eq!(session.current_owner(), Some(&owner));
        assert_eq!(Session::default(), Session::Anonymous);
    }
}
