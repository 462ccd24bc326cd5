//! To-many containers and the to-many half of the entity relationship API.

use super::{ContainerState, FetchState, RelationshipCollection, SyncState, ensure_kind};
use crate::entity::EntityRef;
use relmodel_core::{RelationshipId, RelationshipKind, RelationshipMetadata, Result};

/// Container of a to-many property (one-has-many or many-has-many).
///
/// Members added or removed in memory are kept as pending changes until the
/// next flush; reads merge them over whatever was fetched.
#[derive(Debug)]
pub struct HasMany {
    relationship: RelationshipId,
    collection: Option<Vec<EntityRef>>,
    to_add: Vec<EntityRef>,
    to_remove: Vec<EntityRef>,
    modified: bool,
    sync: SyncState,
}

impl HasMany {
    pub(crate) fn new(relationship: RelationshipId) -> Self {
        Self {
            relationship,
            collection: None,
            to_add: Vec::new(),
            to_remove: Vec::new(),
            modified: false,
            sync: SyncState::Idle,
        }
    }

    /// Relationship descriptor of the property.
    pub fn relationship(&self) -> RelationshipId {
        self.relationship
    }

    /// Lifecycle state.
    pub fn state(&self) -> ContainerState {
        if self.modified {
            ContainerState::Modified
        } else if self.collection.is_some() {
            ContainerState::Clean
        } else {
            ContainerState::Unresolved
        }
    }

    /// Are the fetched members cached?
    pub fn fetch_state(&self) -> FetchState {
        if self.collection.is_some() {
            FetchState::Fetched
        } else {
            FetchState::NotFetched
        }
    }

    /// Changed since the last flush?
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Re-entrancy guard.
    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    /// Members added in memory and not flushed yet.
    pub fn pending_adds(&self) -> &[EntityRef] {
        &self.to_add
    }

    /// Members removed in memory and not flushed yet.
    pub fn pending_removes(&self) -> &[EntityRef] {
        &self.to_remove
    }

    pub fn has_pending(&self) -> bool {
        !self.to_add.is_empty() || !self.to_remove.is_empty()
    }

    pub(crate) fn cached(&self) -> Option<&[EntityRef]> {
        self.collection.as_deref()
    }

    pub(crate) fn set_fetched(&mut self, members: Vec<EntityRef>) {
        self.collection = Some(members);
    }

    /// `base` with the pending changes applied.
    pub(crate) fn merged(&self, base: Vec<EntityRef>) -> Vec<EntityRef> {
        let mut members: Vec<EntityRef> = base
            .into_iter()
            .filter(|member| !self.to_remove.contains(member))
            .collect();
        for member in &self.to_add {
            if !members.contains(member) {
                members.push(member.clone());
            }
        }
        members
    }

    pub(crate) fn add_pending(&mut self, member: &EntityRef) -> bool {
        if let Some(at) = self.to_remove.iter().position(|m| m == member) {
            self.to_remove.remove(at);
            return true;
        }
        if self.to_add.contains(member) {
            return false;
        }
        if self.collection.as_ref().is_some_and(|c| c.contains(member)) {
            return false;
        }
        self.to_add.push(member.clone());
        true
    }

    pub(crate) fn remove_pending(&mut self, member: &EntityRef) -> bool {
        if let Some(at) = self.to_add.iter().position(|m| m == member) {
            self.to_add.remove(at);
            return true;
        }
        if self.to_remove.contains(member) {
            return false;
        }
        if self.collection.as_ref().is_some_and(|c| !c.contains(member)) {
            return false;
        }
        self.to_remove.push(member.clone());
        true
    }

    pub(crate) fn sync_mut(&mut self) -> &mut SyncState {
        &mut self.sync
    }

    pub(crate) fn mark_modified(&mut self) {
        self.modified = true;
    }

    /// Append a member discovered from the reverse side to the fetched cache.
    pub(crate) fn init_member(&mut self, member: &EntityRef) {
        if let Some(collection) = &mut self.collection {
            if !collection.contains(member) {
                collection.push(member.clone());
            }
        }
    }

    /// Fold the pending changes into the cache once storage reflects them.
    pub(crate) fn commit_pending(&mut self) {
        if let Some(collection) = self.collection.take() {
            self.collection = Some(self.merged(collection));
        }
        self.to_add.clear();
        self.to_remove.clear();
    }

    /// Back to not fetched, with nothing pending.
    pub(crate) fn reset(&mut self) {
        self.collection = None;
        self.to_add.clear();
        self.to_remove.clear();
        self.modified = false;
    }
}

impl EntityRef {
    fn to_many_metadata(&self, name: &str) -> Result<RelationshipMetadata> {
        let entity = self.borrow();
        let id = entity.has_many(name)?.relationship();
        Ok(entity.schema().relationship(id).clone())
    }

    /// Query handle over the members of a to-many property.
    pub fn collection(&self, name: &str) -> Result<RelationshipCollection> {
        let rel = self.to_many_metadata(name)?;
        Ok(RelationshipCollection::new(self.clone(), name, rel))
    }

    /// Add `member` to a to-many property.
    ///
    /// The reverse side follows: a one-has-many member points its to-one
    /// property here, a many-has-many member adds this entity to its own
    /// collection. Returns whether anything changed.
    pub fn add(&self, name: &str, member: &EntityRef) -> Result<bool> {
        self.change_member(name, member, true)
    }

    /// Remove `member` from a to-many property; the reverse side follows.
    pub fn remove(&self, name: &str, member: &EntityRef) -> Result<bool> {
        self.change_member(name, member, false)
    }

    fn change_member(&self, name: &str, member: &EntityRef, add: bool) -> Result<bool> {
        if self.borrow().has_many(name)?.sync_state().is_propagating() {
            return Ok(false);
        }
        let rel = self.to_many_metadata(name)?;
        ensure_kind(member, rel.target, name)?;

        {
            let mut entity = self.borrow_mut();
            let container = entity.has_many_mut(name)?;
            let changed = if add {
                container.add_pending(member)
            } else {
                container.remove_pending(member)
            };
            if !changed {
                return Ok(false);
            }
            container.mark_modified();
            container.sync_mut().begin();
            entity.set_as_modified(Some(name));
        }

        let result = match (rel.kind, rel.reverse.as_deref()) {
            (RelationshipKind::OneHasMany, Some(reverse)) => {
                let parent = if add { Some(self) } else { None };
                member.set_entity(reverse, parent).map(|_| ())
            }
            (RelationshipKind::ManyHasMany, Some(reverse)) => {
                if add {
                    member.add(reverse, self).map(|_| ())
                } else {
                    member.remove(reverse, self).map(|_| ())
                }
            }
            _ => Ok(()),
        };

        self.borrow_mut().has_many_mut(name)?.sync_mut().end();
        result.map(|()| true)
    }

    /// Replace the members of a to-many property.
    ///
    /// Current members missing from `members` are removed, new ones added,
    /// each with reverse-side synchronization.
    pub fn set_collection(&self, name: &str, members: &[EntityRef]) -> Result<()> {
        let current = self.collection(name)?.fetch_all()?;
        for old in current.iter().filter(|m| !members.contains(m)) {
            self.remove(name, old)?;
        }
        for new in members.iter().filter(|m| !current.contains(m)) {
            self.add(name, new)?;
        }
        Ok(())
    }

    /// Is `member` part of the to-many property?
    pub fn contains(&self, name: &str, member: &EntityRef) -> Result<bool> {
        Ok(self.collection(name)?.fetch_all()?.contains(member))
    }

    /// Number of members of the to-many property.
    pub fn count(&self, name: &str) -> Result<usize> {
        self.collection(name)?.count()
    }

    /// Are the members of the to-many property cached?
    pub fn fetch_state(&self, name: &str) -> Result<FetchState> {
        Ok(self.borrow().has_many(name)?.fetch_state())
    }

    /// Pending `(added, removed)` members of the to-many property.
    pub fn pending_changes(&self, name: &str) -> Result<(Vec<EntityRef>, Vec<EntityRef>)> {
        let entity = self.borrow();
        let container = entity.has_many(name)?;
        Ok((
            container.pending_adds().to_vec(),
            container.pending_removes().to_vec(),
        ))
    }

    /// Record `member` as fetched from the reverse side, without marking
    /// anything modified.
    pub(crate) fn init_member(&self, name: &str, member: &EntityRef) -> Result<()> {
        let mut entity = self.borrow_mut();
        let container = entity.has_many_mut(name)?;
        if !container.sync_state().is_propagating() {
            container.init_member(member);
        }
        Ok(())
    }
}
