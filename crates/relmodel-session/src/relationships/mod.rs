//! Relationship containers.
//!
//! Every relationship property of an entity owns a container: [`HasOne`] for
//! to-one properties, [`HasMany`] for to-many properties. Containers cache
//! what was resolved, remember whether the relationship was modified, and
//! guard reverse-side synchronization with a [`SyncState`].

mod collection;
mod has_many;
mod has_one;

pub use collection::RelationshipCollection;
pub use has_many::HasMany;
pub use has_one::HasOne;

use crate::entity::EntityRef;
use relmodel_core::{EntityKind, Error, Result};

/// Re-entrancy guard of a container.
///
/// While a container propagates a change to the reverse side it is
/// `Propagating`; every attempt to propagate back into it is suppressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    /// No propagation in progress.
    #[default]
    Idle,
    /// Changing the reverse side.
    Propagating,
}

impl SyncState {
    /// Enter propagation. Returns `false`, leaving the state alone, if a
    /// propagation is already in progress.
    pub fn begin(&mut self) -> bool {
        match self {
            SyncState::Idle => {
                *self = SyncState::Propagating;
                true
            }
            SyncState::Propagating => false,
        }
    }

    /// Leave propagation.
    pub fn end(&mut self) {
        *self = SyncState::Idle;
    }

    /// Is a propagation in progress?
    pub fn is_propagating(self) -> bool {
        self == SyncState::Propagating
    }
}

/// Lifecycle of a container's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Nothing read or set yet.
    Unresolved,
    /// Resolved and unchanged since the last flush.
    Clean,
    /// Changed since the last flush.
    Modified,
}

/// Whether a to-many container holds its fetched members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Members were never fetched, or were dropped by a flush.
    NotFetched,
    /// Members are cached in the container.
    Fetched,
}

pub(crate) fn ensure_kind(entity: &EntityRef, expected: EntityKind, property: &str) -> Result<()> {
    let entity = entity.borrow();
    if entity.kind() == expected {
        return Ok(());
    }
    Err(Error::InvalidInput(format!(
        "property '{}' cannot hold an entity of kind {}",
        property,
        entity.metadata().name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_rejects_nested_propagation() {
        let mut state = SyncState::default();
        assert!(!state.is_propagating());
        assert!(state.begin());
        assert!(state.is_propagating());
        assert!(!state.begin());
        assert!(state.is_propagating());
        state.end();
        assert_eq!(state, SyncState::Idle);
        assert!(state.begin());
    }
}
