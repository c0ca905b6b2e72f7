//! 32-byte identities for writers and cores.
//!
//! Keys order bytewise; that order is the deterministic tie-break used
//! wherever concurrent writers must be sequenced. They display and
//! serialize as lowercase hex.
//!
//! # Examples
//!
//! ```
//! use concord_core::keys::{CoreKey, WriterKey};
//!
//! let bootstrap = WriterKey::from_bytes([7; 32]);
//! let a = CoreKey::for_view(&bootstrap, "list", &[bootstrap]);
//! let b = CoreKey::for_view(&bootstrap, "list", &[bootstrap]);
//! assert_eq!(a, b);
//! assert_eq!(WriterKey::from_hex(&bootstrap.to_hex()).unwrap(), bootstrap);
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::contexts;
use crate::errors::{BaseError, BaseResult};

macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                blake3::Hash::from_bytes(self.0).to_hex().to_string()
            }

            pub fn from_hex(hex: &str) -> BaseResult<Self> {
                blake3::Hash::from_hex(hex)
                    .map(|h| Self(*h.as_bytes()))
                    .map_err(|e| BaseError::Decode {
                        details: format!("invalid key {hex:?}: {e}"),
                    })
            }

            /// First eight hex characters, for log fields.
            pub fn short(&self) -> String {
                let mut hex = self.to_hex();
                hex.truncate(8);
                hex
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let hex = String::deserialize(deserializer)?;
                Self::from_hex(&hex).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_key!(
    /// Identity of a writer. Equal to the key of the writer's log core.
    WriterKey
);

define_key!(
    /// Identity of an append-only log core.
    CoreKey
);

impl WriterKey {
    /// The local writer key of a store with the given primary key.
    pub fn from_primary(primary: &[u8; 32]) -> Self {
        Self(blake3::derive_key(contexts::LOCAL_WRITER, primary))
    }

    pub fn core_key(&self) -> CoreKey {
        CoreKey(self.0)
    }
}

impl From<WriterKey> for CoreKey {
    fn from(key: WriterKey) -> Self {
        key.core_key()
    }
}

impl CoreKey {
    /// Key of the named view core for one indexer set.
    ///
    /// Every replica that agrees on `(bootstrap, name, indexers)` derives
    /// the same key. The indexer order does not matter.
    pub fn for_view(bootstrap: &WriterKey, name: &str, indexers: &[WriterKey]) -> Self {
        let mut sorted = indexers.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut hasher = blake3::Hasher::new_derive_key(contexts::VIEW_CORE);
        hasher.update(bootstrap.as_bytes());
        hasher.update(&(name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&(sorted.len() as u64).to_le_bytes());
        for key in &sorted {
            hasher.update(key.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// The writer owning this core, when it is a writer core.
    pub fn writer_key(&self) -> WriterKey {
        WriterKey(self.0)
    }
}
