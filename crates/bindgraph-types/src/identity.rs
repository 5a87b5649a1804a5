use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Defines a newtype over a store-assigned `i64` serial.
macro_rules! serial_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw serial as stored in the backing store.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// The raw serial.
            pub const fn get(self) -> i64 {
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
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|e| TypeError::InvalidId(format!("{s:?}: {e}")))
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

serial_id!(
    /// Serial number of a resource in the backing store.
    ///
    /// Resources are created and destroyed by a lifecycle collaborator; the
    /// bind graph only refers to them by this number. [`ResourceId::NONE`]
    /// stands for "no resource" in lookups that do not fail on absence.
    ResourceId
);

serial_id!(
    /// Identifier of a single bind (named edge).
    BindId
);

serial_id!(
    /// Identifier of a pending cleanup request. Assigned in insertion order.
    CleanupId
);

impl ResourceId {
    /// The absent resource. Returned for unresolved path segments.
    pub const NONE: Self = Self(0);

    /// Default serial of the root collection, the universal ancestor of all
    /// absolute paths.
    pub const ROOT: Self = Self(2);

    /// Returns `true` for [`ResourceId::NONE`].
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}
