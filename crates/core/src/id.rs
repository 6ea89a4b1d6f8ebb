// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node-prefixed unique identifiers.
//!
//! Every entity ID has the form `<prefix>-<suffix>`: a 4-character node
//! prefix derived from the configured instance name, a separator, and an
//! 18-character URL-safe random suffix whose first and last characters are
//! alphanumeric. The prefix is initialised once at startup and is read-only
//! for the lifetime of the process.

use parking_lot::RwLock;

/// Maximum byte length for an inline ID.
///
/// All generated IDs are exactly 23 bytes (4-char prefix + `-` + 18-char
/// random suffix). `from_string` accepts shorter IDs but debug-asserts
/// they fit.
pub const ID_MAX_LEN: usize = 23;

const PREFIX_LEN: usize = 4;
const SUFFIX_LEN: usize = 18;
const DEFAULT_PREFIX: &str = "unkn";
const PAD: char = 'x';

static NODE_PREFIX: RwLock<Option<String>> = RwLock::new(None);

/// Initialise the process-wide node prefix from the instance name.
///
/// Single-writer init: the first call wins, later calls are ignored with a
/// warning left to the caller (the kernel initialises exactly once during
/// startup). Derivation: lowercase, strip `.`, `-` and `_`, truncate or
/// right-pad to 4 characters; empty results fall back to `"unkn"`.
pub fn init_node_prefix(instance_name: &str) {
    let mut guard = NODE_PREFIX.write();
    if guard.is_none() {
        *guard = Some(derive_prefix(instance_name));
    }
}

/// The current node prefix, or `"unkn"` before initialisation.
pub fn node_prefix() -> String {
    NODE_PREFIX.read().clone().unwrap_or_else(|| DEFAULT_PREFIX.to_string())
}

#[cfg(any(test, feature = "test-support"))]
pub fn reset_node_prefix() {
    *NODE_PREFIX.write() = None;
}

fn derive_prefix(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect();
    if cleaned.is_empty() {
        return DEFAULT_PREFIX.to_string();
    }
    cleaned.truncate(PREFIX_LEN);
    while cleaned.len() < PREFIX_LEN {
        cleaned.push(PAD);
    }
    cleaned
}

/// Generate a fresh node-prefixed ID string.
pub fn fresh_id() -> String {
    format!("{}-{}", node_prefix(), random_suffix())
}

/// 18 URL-safe random characters with alphanumeric endpoints.
///
/// nanoid's alphabet includes `-` and `_`; endpoints are resampled so IDs
/// remain selectable by double-click and safe to embed in key namespaces.
fn random_suffix() -> String {
    loop {
        let s = nanoid::nanoid!(SUFFIX_LEN);
        let bytes = s.as_bytes();
        if bytes[0].is_ascii_alphanumeric() && bytes[SUFFIX_LEN - 1].is_ascii_alphanumeric() {
            return s;
        }
    }
}

/// Returns a string slice truncated to at most `n` characters.
pub fn short(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        &s[..n]
    }
}

/// Fixed-size inline ID buffer. Always ≤ 23 ASCII bytes, `Copy`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdBuf {
    len: u8,
    buf: [u8; ID_MAX_LEN],
}

impl std::hash::Hash for IdBuf {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash only the active bytes so it matches str::hash,
        // which is required for Borrow<str> HashMap lookups.
        self.as_str().hash(state);
    }
}

impl IdBuf {
    pub const fn empty() -> Self {
        Self { len: 0, buf: [0; ID_MAX_LEN] }
    }

    pub fn new(s: &str) -> Self {
        debug_assert!(
            s.len() <= ID_MAX_LEN,
            "ID exceeds {} bytes ({} bytes): {:?}",
            ID_MAX_LEN,
            s.len(),
            s,
        );
        let len = s.len().min(ID_MAX_LEN);
        let mut buf = [0u8; ID_MAX_LEN];
        buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { len: len as u8, buf }
    }

    pub fn as_str(&self) -> &str {
        // Invariant: only constructed from &str, always valid UTF-8.
        match std::str::from_utf8(&self.buf[..self.len as usize]) {
            Ok(s) => s,
            Err(_) => unreachable!("IdBuf constructed from non-UTF-8"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::borrow::Borrow<str> for IdBuf {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Debug for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for IdBuf {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for IdBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.len() > ID_MAX_LEN {
            return Err(serde::de::Error::custom(format!(
                "ID exceeds {} bytes: {:?}",
                ID_MAX_LEN, s
            )));
        }
        Ok(IdBuf::new(&s))
    }
}

/// Define a newtype ID wrapper around [`IdBuf`].
///
/// Generates `fresh()` for node-prefixed random ID generation,
/// `from_string()` for parsing, `as_str()`, `short()`, `Display`,
/// `From<String>`, `From<&str>`, `PartialEq<str>`, `Borrow<str>`, and
/// `Deref` implementations.
///
/// ```ignore
/// define_id! {
///     /// Doc comment for the ID type.
///     pub struct TokenId;
/// }
/// ```
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $crate::id::IdBuf);

        impl $name {
            /// Generate a new random ID with the node prefix.
            pub fn fresh() -> Self {
                Self($crate::id::IdBuf::new(&$crate::id::fresh_id()))
            }

            /// Create ID from existing string (for parsing/deserialization)
            pub fn from_string(id: impl AsRef<str>) -> Self {
                Self($crate::id::IdBuf::new(id.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            /// Returns a string slice truncated to at most `n` characters.
            pub fn short(&self, n: usize) -> &str {
                $crate::id::short(self.0.as_str(), n)
            }

            /// Returns true if the ID is an empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0.as_str() == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
