//! Storage reflection: how entity properties map onto storage columns.
//!
//! The persistence and relationship layers only depend on the narrow
//! [`StorageReflection`] contract. [`UnderscoredStorageReflection`] is the
//! stock convention: camelCase properties become snake_case columns and
//! foreign-key properties get an `_id` suffix.

use crate::identifiers::{table_alias, to_camel_case, to_snake_case};
use crate::metadata::{EntityMetadata, LinkTableInfo, PropertyKind, Schema};
use crate::row::Row;
use crate::value::Value;
use std::collections::HashMap;

/// Storage-level naming and key information for one entity kind.
pub trait StorageReflection {
    /// Name of the backing table.
    fn storage_name(&self) -> &str;

    /// Rename entity properties to storage columns, in order.
    fn convert_entity_to_storage(&self, data: Vec<(String, Value)>) -> Vec<(String, Value)> {
        data.into_iter()
            .map(|(key, value)| (self.convert_entity_to_storage_key(&key), value))
            .collect()
    }

    /// Rename the columns of a storage row to entity properties.
    fn convert_storage_to_entity(&self, row: &Row) -> Vec<(String, Value)> {
        row.iter()
            .map(|(column, value)| (self.convert_storage_to_entity_key(column), value.clone()))
            .collect()
    }

    /// Storage column of a property.
    fn convert_entity_to_storage_key(&self, property: &str) -> String;

    /// Property of a storage column.
    fn convert_storage_to_entity_key(&self, column: &str) -> String;

    /// Primary key columns, in key order.
    fn storage_primary_key(&self) -> &[String];

    /// Sequence feeding the primary key, if the store uses one.
    fn primary_sequence_name(&self) -> Option<&str>;

    /// Join table name for a many-has-many relationship towards `target`.
    fn many_has_many_storage_name(&self, target: &dyn StorageReflection) -> String {
        format!("{}_x_{}", self.storage_name(), target.storage_name())
    }

    /// Join table columns `(this side, target side)`.
    fn many_has_many_storage_primary_keys(&self, target: &dyn StorageReflection) -> (String, String) {
        (
            format!("{}_id", table_alias(self.storage_name())),
            format!("{}_id", table_alias(target.storage_name())),
        )
    }

    /// Join table for the main side of a many-has-many relationship.
    fn many_has_many_link(&self, target: &dyn StorageReflection) -> LinkTableInfo {
        let (local, remote) = self.many_has_many_storage_primary_keys(target);
        LinkTableInfo::new(self.many_has_many_storage_name(target), local, remote)
    }
}

/// camelCase properties ↔ snake_case columns, foreign keys suffixed with `_id`.
#[derive(Debug, Clone)]
pub struct UnderscoredStorageReflection {
    table: String,
    primary_key: Vec<String>,
    sequence: Option<String>,
    to_storage: HashMap<String, String>,
    to_entity: HashMap<String, String>,
}

impl UnderscoredStorageReflection {
    /// Build the mapping for one entity kind.
    pub fn new(schema: &Schema, entity: &EntityMetadata) -> Self {
        let mut to_storage = HashMap::new();
        let mut to_entity = HashMap::new();
        for prop in &entity.properties {
            let column = match prop.kind {
                PropertyKind::Relationship(id) if schema.relationship(id).stores_column() => {
                    format!("{}_id", to_snake_case(&prop.name))
                }
                _ => to_snake_case(&prop.name),
            };
            to_entity.insert(column.clone(), prop.name.clone());
            to_storage.insert(prop.name.clone(), column);
        }
        let primary_key = entity
            .primary_key
            .iter()
            .map(|key| to_storage.get(key).cloned().unwrap_or_else(|| to_snake_case(key)))
            .collect();
        Self {
            table: entity.table.clone(),
            primary_key,
            sequence: None,
            to_storage,
            to_entity,
        }
    }

    /// Read generated identities from `sequence`.
    #[must_use]
    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = Some(sequence.into());
        self
    }
}

impl StorageReflection for UnderscoredStorageReflection {
    fn storage_name(&self) -> &str {
        &self.table
    }

    fn convert_entity_to_storage_key(&self, property: &str) -> String {
        self.to_storage
            .get(property)
            .cloned()
            .unwrap_or_else(|| to_snake_case(property))
    }

    fn convert_storage_to_entity_key(&self, column: &str) -> String {
        self.to_entity
            .get(column)
            .cloned()
            .unwrap_or_else(|| to_camel_case(column))
    }

    fn storage_primary_key(&self) -> &[String] {
        &self.primary_key
    }

    fn primary_sequence_name(&self) -> Option<&str> {
        self.sequence.as_deref()
    }
}
