//! # Cluster Identifiers
//!
//! Typed identifiers for everything addressable in the cluster. Each type is
//! an immutable wrapper around one [`compound::CompoundId`] restricted to an
//! exact field set:
//!
//! | Type            | Fields                                 |
//! |-----------------|----------------------------------------|
//! | [`InstanceId`]    | instance                               |
//! | [`ApplicationId`] | application                            |
//! | [`NodeId`]        | instance, application                  |
//! | [`ResourceId`]    | instance, application, resource        |
//! | [`TaskId`]        | instance, application, resource, task  |
//!
//! Narrower ids derive their broader ids (`TaskId -> ResourceId -> NodeId ->
//! InstanceId`), never the other way round.
//!
//! ## Usage
//!
//! ```rust
//! use cluster_types::{NodeId, ResourceId, TaskId};
//!
//! let node = NodeId::random();
//! let task = TaskId::for_resource(&ResourceId::for_node(&node));
//!
//! assert_eq!(task.node_id(), node);
//! assert_eq!(NodeId::parse(node.as_str()).unwrap(), node);
//! ```
//!
//! String and byte renderings are computed on first use and cached.

pub(crate) mod compound;
mod error;
mod node;
mod resource;

pub use compound::Field;
pub use error::{IdError, InvalidIdError};
pub use node::{ApplicationId, InstanceId, NodeId};
pub use resource::{ResourceId, TaskId};

/// Generates an identifier type over a fixed field set
///
/// The generated type carries the compound value plus lazily filled caches
/// for its string and binary forms. Equality, hashing and ordering only
/// consider the type's own fields.
macro_rules! compound_identifier {
    (
        $(#[$meta:meta])*
        $name:ident, $error:ident, [$($field:ident),+]
    ) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            id: $crate::id::compound::CompoundId,
            string: once_cell::sync::OnceCell<String>,
            bytes: once_cell::sync::OnceCell<Vec<u8>>,
        }

        impl $name {
            /// Fields carried by this identifier, in canonical order
            pub const FIELDS: &'static [$crate::id::Field] = &[$($crate::id::Field::$field),+];

            /// Length of the binary form
            pub const SIZE_IN_BYTES: usize =
                $crate::id::compound::encoded_len(Self::FIELDS.len());

            /// Wrap a value already known to hold exactly `FIELDS`
            pub(crate) fn wrap(id: $crate::id::compound::CompoundId) -> Self {
                Self {
                    id,
                    string: once_cell::sync::OnceCell::new(),
                    bytes: once_cell::sync::OnceCell::new(),
                }
            }

            pub(crate) fn from_compound(
                id: $crate::id::compound::CompoundId,
            ) -> Result<Self, $crate::id::InvalidIdError> {
                id.restrict_to_exactly(Self::FIELDS)
                    .map(Self::wrap)
                    .map_err($crate::id::InvalidIdError::$error)
            }

            /// Drop every field beyond `FIELDS` from a richer value
            pub(crate) fn narrowed(id: &$crate::id::compound::CompoundId) -> Self {
                Self::wrap(id.project(Self::FIELDS))
            }

            /// Fresh identifier with a random value per field
            pub fn random() -> Self {
                let builder = Self::FIELDS
                    .iter()
                    .fold($crate::id::compound::Builder::new(), |b, field| b.with_random(*field));
                Self::wrap(builder.build())
            }

            /// Parse the canonical string form
            pub fn parse(input: &str) -> Result<Self, $crate::id::InvalidIdError> {
                $crate::id::compound::CompoundId::parse_str(input)
                    .map_err($crate::id::InvalidIdError::$error)
                    .and_then(Self::from_compound)
            }

            /// Parse the canonical binary form
            pub fn from_bytes(input: &[u8]) -> Result<Self, $crate::id::InvalidIdError> {
                $crate::id::compound::CompoundId::parse_bytes(input)
                    .map_err($crate::id::InvalidIdError::$error)
                    .and_then(Self::from_compound)
            }

            pub fn as_str(&self) -> &str {
                self.string.get_or_init(|| self.id.canonical_string())
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.bytes.get_or_init(|| self.id.canonical_bytes())
            }

            pub(crate) fn compound(&self) -> &$crate::id::compound::CompoundId {
                &self.id
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id.eq_on(&other.id, Self::FIELDS)
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.id.hash_on(Self::FIELDS, state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.id.cmp(&other.id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::id::InvalidIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = $crate::id::InvalidIdError;

            fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
                Self::from_bytes(bytes)
            }
        }

        #[cfg(feature = "serialization")]
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        #[cfg(feature = "serialization")]
        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::parse(&text).map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use compound_identifier;
