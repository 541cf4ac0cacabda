use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global string interner for node and edge IDs.
static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::default);

/// Counter shared by all provisional IDs so they never collide across kinds.
static PROVISIONAL: AtomicU64 = AtomicU64::new(0);

/// Row identifiers arrive from the backing store as either integers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Int(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

macro_rules! interned_id {
    ($(#[$meta:meta])* $name:ident, $sigil:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Spur);

        impl $name {
            /// Intern a string as an ID, or return the existing one.
            pub fn intern(s: &str) -> Self {
                $name(INTERNER.get_or_intern(s))
            }

            /// Resolve back to a string slice.
            pub fn as_str(&self) -> &str {
                INTERNER.resolve(&self.0)
            }

            /// Generate a unique ID with a prefix (e.g. `pending_3`).
            pub fn with_prefix(prefix: &str) -> Self {
                let n = PROVISIONAL.fetch_add(1, Ordering::Relaxed);
                Self::intern(&format!("{prefix}_{n}"))
            }
        }

        impl From<i64> for $name {
            fn from(n: i64) -> Self {
                Self::intern(&n.to_string())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::intern(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($sigil, "{}"), self.as_str())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($sigil, "{}"), self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = RawId::deserialize(deserializer)?;
                Ok($name::intern(&raw.into_string()))
            }
        }
    };
}

interned_id!(
    /// A lightweight, interned identifier for canvas nodes.
    /// Internally a `Spur` index: 4 bytes, Copy, Eq, Hash in O(1).
    NodeId,
    "#"
);

interned_id!(
    /// Interned identifier for edges (connections between nodes).
    EdgeId,
    "~"
);

impl NodeId {
    /// Provisional ID for a node created locally and not yet confirmed.
    pub fn provisional() -> Self {
        Self::with_prefix("pending")
    }

    /// Whether this ID was minted locally by [`NodeId::provisional`].
    pub fn is_provisional(&self) -> bool {
        self.as_str().starts_with("pending_")
    }
}

impl EdgeId {
    pub fn provisional() -> Self {
        Self::with_prefix("pending_edge")
    }
}
