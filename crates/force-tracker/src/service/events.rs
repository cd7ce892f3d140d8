//! Change notifications published by [`ForceService`](super::ForceService).

use crate::domain::ForceSnapshot;

/// A change to the force directory.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "event", rename_all = "snake_case")
)]
pub enum ForceEvent {
    /// A report was accepted
    Updated(ForceSnapshot),
    /// A force was removed
    Removed {
        /// Force identifier
        id: String,
    },
    /// All forces were removed
    Cleared,
    /// A force went silent past the disconnect threshold
    Disconnected {
        /// Force identifier
        id: String,
    },
}

impl ForceEvent {
    /// Id of the affected force, if the event concerns a single force.
    pub fn force_id(&self) -> Option<&str> {
        match self {
            Self::Updated(snapshot) => Some(&snapshot.id),
            Self::Removed { id } | Self::Disconnected { id } => Some(id),
            Self::Cleared => None,
        }
    }
}
