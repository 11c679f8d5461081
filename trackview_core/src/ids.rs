//! Strongly-typed identifiers for graph elements and stream entities.
//!
//! Every identifier is a `u32` on the wire. Keeping one newtype per
//! collection stops a station id from ever being looked up as a unit id.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(v: u32) -> Self {
                Self(v)
            }
        }
    };
}

newtype_id!(
    /// Identifies a node (junction point) of the track graph.
    NodeId
);

newtype_id!(
    /// Identifies a line or arc segment of the track graph.
    SegmentId
);

newtype_id!(
    /// Identifies a docking spot on the track where units load and unload.
    DockId
);

newtype_id!(
    /// Identifies a transport unit (robot).
    UnitId
);

newtype_id!(
    /// Identifies a processing station (device).
    StationId
);

newtype_id!(
    /// Identifies a cargo carrier.
    CarrierId
);

newtype_id!(
    /// Identifies a transport job.
    JobId
);
