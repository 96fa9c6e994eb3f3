//! Migration descriptors and the ordered descriptor set.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};
use crate::operations::MigrationOperation;

/// Sortable migration identifier: a digit prefix, `_`, and a name.
///
/// Ids order lexicographically, so the digit prefix should be a fixed-width
/// timestamp (e.g. `201904151230451_AddStatus`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId(String);

impl MigrationId {
    /// Validates and wraps an id.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let Some((prefix, name)) = id.split_once('_') else {
            return Err(MigrateError::Validation(format!(
                "Migration id '{}' must look like <digits>_<name>",
                id
            )));
        };
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MigrateError::Validation(format!(
                "Migration id '{}' must start with a numeric timestamp",
                id
            )));
        }
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(MigrateError::Validation(format!(
                "Migration id '{}' needs a name without whitespace after the timestamp",
                id
            )));
        }
        Ok(Self(id))
    }

    /// The full id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The human-readable part after the timestamp.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.split_once('_').map_or("", |(_, name)| name)
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MigrationId {
    type Error = MigrateError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.0
    }
}

/// An immutable migration: an id plus the `up` and `down` operation lists.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationDescriptor {
    id: MigrationId,
    up: Vec<MigrationOperation>,
    down: Vec<MigrationOperation>,
    checksum: String,
}

impl MigrationDescriptor {
    /// Starts building a descriptor.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            id: id.into(),
            up: Vec::new(),
            down: None,
        }
    }

    /// Creates a descriptor. When `down` is `None` it is derived from `up`.
    pub fn from_parts(
        id: impl Into<String>,
        up: Vec<MigrationOperation>,
        down: Option<Vec<MigrationOperation>>,
    ) -> Result<Self> {
        let id = MigrationId::parse(id)?;
        let down = match down {
            Some(down) => down,
            None => derive_down(&id, &up)?,
        };
        let checksum = checksum(&up, &down)?;
        Ok(Self {
            id,
            up,
            down,
            checksum,
        })
    }

    /// The migration id.
    #[must_use]
    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    /// Forward operations.
    #[must_use]
    pub fn up(&self) -> &[MigrationOperation] {
        &self.up
    }

    /// Backward operations.
    #[must_use]
    pub fn down(&self) -> &[MigrationOperation] {
        &self.down
    }

    /// Hex SHA-256 of the serialized `up` and `down` lists.
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

fn derive_down(id: &MigrationId, up: &[MigrationOperation]) -> Result<Vec<MigrationOperation>> {
    up.iter()
        .enumerate()
        .rev()
        .map(|(index, op)| {
            op.reverse().ok_or_else(|| {
                MigrateError::Validation(format!(
                    "Migration '{}' has no down operations and operation {} ({}) cannot be reversed",
                    id,
                    index,
                    op.description()
                ))
            })
        })
        .collect()
}

fn checksum(up: &[MigrationOperation], down: &[MigrationOperation]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(up)?);
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(down)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Builder for [`MigrationDescriptor`].
pub struct DescriptorBuilder {
    id: String,
    up: Vec<MigrationOperation>,
    down: Option<Vec<MigrationOperation>>,
}

impl DescriptorBuilder {
    /// Appends a forward operation.
    #[must_use]
    pub fn up(mut self, operation: MigrationOperation) -> Self {
        self.up.push(operation);
        self
    }

    /// Appends a backward operation. Once called, `down` is no longer derived.
    #[must_use]
    pub fn down(mut self, operation: MigrationOperation) -> Self {
        self.down.get_or_insert_with(Vec::new).push(operation);
        self
    }

    /// Sets the backward list explicitly, possibly empty.
    #[must_use]
    pub fn down_operations(mut self, operations: Vec<MigrationOperation>) -> Self {
        self.down = Some(operations);
        self
    }

    /// Validates the id and derives `down` if it was not given.
    pub fn build(self) -> Result<MigrationDescriptor> {
        MigrationDescriptor::from_parts(self.id, self.up, self.down)
    }
}

/// The full, ordered descriptor list.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<MigrationDescriptor>,
}

impl MigrationSet {
    /// Sorts the descriptors by id and rejects duplicates.
    pub fn new(mut migrations: Vec<MigrationDescriptor>) -> Result<Self> {
        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = migrations.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(MigrateError::Validation(format!(
                "Duplicate migration id '{}'",
                pair[0].id
            )));
        }
        Ok(Self { migrations })
    }

    /// Descriptors in id order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MigrationDescriptor> {
        self.migrations.iter()
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Looks up a descriptor by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&MigrationDescriptor> {
        self.position(id).map(|i| &self.migrations[i])
    }

    /// Position of an id in the ordered list.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.id.as_str() == id)
    }

    /// Descriptor at a position.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&MigrationDescriptor> {
        self.migrations.get(index)
    }
}
