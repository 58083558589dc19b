//! Canonical identity graph and the per-run builder that accumulates it.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Application type reported to the graph sink.
pub const APPLICATION_TYPE: &str = "IDaaS";

/// A user account from the source system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub unique_id: String,
    pub display_name: String,
    pub primary_email: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub last_login_at: Option<String>,
    pub group_memberships: Vec<GroupRef>,
    pub custom_attributes: BTreeMap<String, Value>,
}

impl Identity {
    /// Creates an identity with only its identifier set.
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            display_name: String::new(),
            primary_email: None,
            status: None,
            created_at: None,
            last_login_at: None,
            group_memberships: Vec::new(),
            custom_attributes: BTreeMap::new(),
        }
    }

    /// Display name, falling back to the identifier when empty.
    #[must_use]
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.unique_id
        } else {
            &self.display_name
        }
    }
}

/// Reference to a group as found on an identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRef {
    pub unique_id: String,
    pub display_name: String,
}

/// A group, created once per run on first sight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub unique_id: String,
    pub display_name: String,
}

/// Identity to group edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Membership {
    pub identity_id: String,
    pub group_id: String,
}

/// Effect classes a permission can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PermissionKind {
    DataRead,
    DataWrite,
    MetadataRead,
    MetadataWrite,
}

/// Named permission and its effect classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionDefinition {
    pub name: String,
    pub kinds: Vec<PermissionKind>,
}

/// Target of a permission grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    #[default]
    Application,
}

/// A permission granted to an identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PermissionGrant {
    pub identity_id: String,
    pub permission: String,
    pub scope: GrantScope,
}

/// Value type of a custom property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
}

impl PropertyType {
    /// Type of a scalar JSON value, `None` for null, arrays and objects.
    #[must_use]
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(Self::String),
            Value::Number(_) => Some(Self::Number),
            Value::Bool(_) => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// Per-record failures while folding into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("property '{name}' is defined as {existing:?} but got {found:?}")]
    PropertyTypeConflict {
        name: String,
        existing: PropertyType,
        found: PropertyType,
    },

    #[error("property '{0}' has an unsupported value type")]
    UnsupportedPropertyValue(String),

    #[error("permission '{0}' is not defined")]
    UnknownPermission(String),

    #[error("identity '{0}' is not in the graph")]
    UnknownIdentity(String),

    #[error("group '{0}' is not in the graph")]
    UnknownGroup(String),
}

/// Accumulates identities, groups and grants over one run.
///
/// Identities are upserted by id. Groups keep the first definition seen.
/// Memberships and grants are sets, so repeated inserts are no-ops.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    application_name: String,
    application_type: String,
    description: String,
    identities: Vec<Identity>,
    identity_index: HashMap<String, usize>,
    groups: Vec<Group>,
    group_index: HashMap<String, usize>,
    memberships: BTreeSet<Membership>,
    permissions: BTreeMap<String, PermissionDefinition>,
    grants: BTreeSet<PermissionGrant>,
    property_types: BTreeMap<String, PropertyType>,
}

impl GraphBuilder {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            application_type: APPLICATION_TYPE.to_string(),
            description: String::new(),
            identities: Vec::new(),
            identity_index: HashMap::new(),
            groups: Vec::new(),
            group_index: HashMap::new(),
            memberships: BTreeSet::new(),
            permissions: BTreeMap::new(),
            grants: BTreeSet::new(),
            property_types: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declares a property type up front, replacing any earlier declaration.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.property_types.insert(name.into(), property_type);
        self
    }

    /// Declares a property type. Redeclaring with the same type is a no-op.
    pub fn define_property(
        &mut self,
        name: impl Into<String>,
        property_type: PropertyType,
    ) -> Result<(), GraphError> {
        let name = name.into();
        match self.property_types.get(&name) {
            Some(existing) if *existing != property_type => Err(GraphError::PropertyTypeConflict {
                name,
                existing: *existing,
                found: property_type,
            }),
            Some(_) => Ok(()),
            None => {
                self.property_types.insert(name, property_type);
                Ok(())
            }
        }
    }

    /// Declares a permission that grants may refer to.
    pub fn define_permission(&mut self, name: impl Into<String>, kinds: &[PermissionKind]) {
        let name = name.into();
        self.permissions.insert(
            name.clone(),
            PermissionDefinition {
                name,
                kinds: kinds.to_vec(),
            },
        );
    }

    #[must_use]
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.contains_key(name)
    }

    /// Inserts or replaces an identity and links its groups.
    ///
    /// Custom attribute types are checked before anything is written, so a
    /// rejected identity leaves the graph untouched. On replace, scalar fields
    /// take the new values and group memberships are merged.
    pub fn upsert_identity(&mut self, identity: Identity) -> Result<(), GraphError> {
        let mut new_properties = Vec::new();
        for (name, value) in &identity.custom_attributes {
            let found = PropertyType::of(value)
                .ok_or_else(|| GraphError::UnsupportedPropertyValue(name.clone()))?;
            match self.property_types.get(name) {
                Some(existing) if *existing != found => {
                    return Err(GraphError::PropertyTypeConflict {
                        name: name.clone(),
                        existing: *existing,
                        found,
                    });
                }
                Some(_) => {}
                None => new_properties.push((name.clone(), found)),
            }
        }
        for (name, found) in new_properties {
            self.property_types.insert(name, found);
        }

        let identity_id = identity.unique_id.clone();
        let refs = identity.group_memberships.clone();

        match self.identity_index.get(&identity_id) {
            Some(&idx) => {
                let existing = &mut self.identities[idx];
                let mut merged = std::mem::take(&mut existing.group_memberships);
                for group in identity.group_memberships.iter() {
                    if !merged.iter().any(|g| g.unique_id == group.unique_id) {
                        merged.push(group.clone());
                    }
                }
                *existing = Identity {
                    group_memberships: merged,
                    ..identity
                };
            }
            None => {
                self.identity_index
                    .insert(identity_id.clone(), self.identities.len());
                self.identities.push(identity);
            }
        }

        for group in &refs {
            self.ensure_group(group);
            self.memberships.insert(Membership {
                identity_id: identity_id.clone(),
                group_id: group.unique_id.clone(),
            });
        }
        Ok(())
    }

    /// Creates the group unless one with the same id exists. Returns whether
    /// it was created.
    pub fn ensure_group(&mut self, group: &GroupRef) -> bool {
        if self.group_index.contains_key(&group.unique_id) {
            return false;
        }
        self.group_index
            .insert(group.unique_id.clone(), self.groups.len());
        self.groups.push(Group {
            unique_id: group.unique_id.clone(),
            display_name: group.display_name.clone(),
        });
        true
    }

    /// Links an identity to a group. Returns whether the edge is new.
    pub fn add_membership(&mut self, identity_id: &str, group_id: &str) -> Result<bool, GraphError> {
        let idx = *self
            .identity_index
            .get(identity_id)
            .ok_or_else(|| GraphError::UnknownIdentity(identity_id.to_string()))?;
        let group = self
            .group_index
            .get(group_id)
            .map(|&g| self.groups[g].clone())
            .ok_or_else(|| GraphError::UnknownGroup(group_id.to_string()))?;

        let inserted = self.memberships.insert(Membership {
            identity_id: identity_id.to_string(),
            group_id: group_id.to_string(),
        });
        if inserted {
            let identity = &mut self.identities[idx];
            if !identity
                .group_memberships
                .iter()
                .any(|g| g.unique_id == group.unique_id)
            {
                identity.group_memberships.push(GroupRef {
                    unique_id: group.unique_id,
                    display_name: group.display_name,
                });
            }
        }
        Ok(inserted)
    }

    /// Grants an application-wide permission. Returns whether the grant is new.
    pub fn grant(&mut self, identity_id: &str, permission: &str) -> Result<bool, GraphError> {
        if !self.permissions.contains_key(permission) {
            return Err(GraphError::UnknownPermission(permission.to_string()));
        }
        if !self.identity_index.contains_key(identity_id) {
            return Err(GraphError::UnknownIdentity(identity_id.to_string()));
        }
        Ok(self.grants.insert(PermissionGrant {
            identity_id: identity_id.to_string(),
            permission: permission.to_string(),
            scope: GrantScope::Application,
        }))
    }

    #[must_use]
    pub fn identity(&self, unique_id: &str) -> Option<&Identity> {
        self.identity_index
            .get(unique_id)
            .map(|&idx| &self.identities[idx])
    }

    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn membership_count(&self) -> usize {
        self.memberships.len()
    }

    #[must_use]
    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }

    /// Freezes the builder into the object pushed to the sink.
    #[must_use]
    pub fn finish(self) -> ApplicationGraph {
        ApplicationGraph {
            name: self.application_name,
            application_type: self.application_type,
            description: self.description,
            property_definitions: self.property_types,
            permissions: self.permissions.into_values().collect(),
            identities: self.identities,
            groups: self.groups,
            memberships: self.memberships.into_iter().collect(),
            grants: self.grants.into_iter().collect(),
        }
    }
}

/// Finished graph of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationGraph {
    pub name: String,
    pub application_type: String,
    pub description: String,
    pub property_definitions: BTreeMap<String, PropertyType>,
    pub permissions: Vec<PermissionDefinition>,
    pub identities: Vec<Identity>,
    pub groups: Vec<Group>,
    pub memberships: Vec<Membership>,
    pub grants: Vec<PermissionGrant>,
}

impl ApplicationGraph {
    /// Grants held by one identity.
    pub fn grants_for<'a>(
        &'a self,
        identity_id: &'a str,
    ) -> impl Iterator<Item = &'a PermissionGrant> + 'a {
        self.grants
            .iter()
            .filter(move |g| g.identity_id == identity_id)
    }

    /// Members of one group.
    pub fn members_of<'a>(&'a self, group_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.memberships
            .iter()
            .filter(move |m| m.group_id == group_id)
            .map(|m| m.identity_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group(id: &str, name: &str) -> GroupRef {
        GroupRef {
            unique_id: id.into(),
            display_name: name.into(),
        }
    }

    fn identity_in(id: &str, groups: &[GroupRef]) -> Identity {
        Identity {
            group_memberships: groups.to_vec(),
            ..Identity::new(id)
        }
    }

    #[test]
    fn test_shared_group_created_once_with_two_edges() {
        let mut builder = GraphBuilder::new("app");
        builder
            .upsert_identity(identity_in("u1", &[group("g1", "Admins")]))
            .unwrap();
        builder
            .upsert_identity(identity_in("u2", &[group("g1", "Renamed")]))
            .unwrap();

        let graph = builder.finish();
        assert_eq!(graph.groups.len(), 1);
        assert_eq!(graph.groups[0].display_name, "Admins");
        assert_eq!(graph.members_of("g1").collect::<Vec<_>>(), vec!["u1", "u2"]);
    }

    #[test]
    fn test_upsert_replaces_fields_and_merges_groups() {
        let mut builder = GraphBuilder::new("app");
        let mut first = identity_in("u1", &[group("g1", "G1")]);
        first.display_name = "Old".into();
        builder.upsert_identity(first).unwrap();

        let mut second = identity_in("u1", &[group("g2", "G2")]);
        second.display_name = "New".into();
        builder.upsert_identity(second).unwrap();

        assert_eq!(builder.identity_count(), 1);
        let stored = builder.identity("u1").unwrap();
        assert_eq!(stored.display_name, "New");
        assert_eq!(stored.group_memberships.len(), 2);
        assert_eq!(builder.membership_count(), 2);
    }

    #[test]
    fn test_add_membership_is_idempotent() {
        let mut builder = GraphBuilder::new("app");
        builder.upsert_identity(Identity::new("u1")).unwrap();
        builder.ensure_group(&group("g1", "G1"));

        assert!(builder.add_membership("u1", "g1").unwrap());
        assert!(!builder.add_membership("u1", "g1").unwrap());
        assert_eq!(builder.membership_count(), 1);
        assert_eq!(builder.identity("u1").unwrap().group_memberships.len(), 1);

        assert_eq!(
            builder.add_membership("ghost", "g1"),
            Err(GraphError::UnknownIdentity("ghost".into()))
        );
        assert_eq!(
            builder.add_membership("u1", "nope"),
            Err(GraphError::UnknownGroup("nope".into()))
        );
    }

    #[test]
    fn test_grant_requires_defined_permission_and_identity() {
        let mut builder = GraphBuilder::new("app");
        builder.define_permission("access", &[PermissionKind::DataRead]);
        builder.upsert_identity(Identity::new("u1")).unwrap();

        assert!(builder.grant("u1", "access").unwrap());
        assert!(!builder.grant("u1", "access").unwrap());
        assert_eq!(
            builder.grant("u1", "admin"),
            Err(GraphError::UnknownPermission("admin".into()))
        );
        assert_eq!(
            builder.grant("u9", "access"),
            Err(GraphError::UnknownIdentity("u9".into()))
        );
        assert_eq!(builder.grant_count(), 1);
    }

    #[test]
    fn test_property_type_conflict_rejects_identity() {
        let mut builder = GraphBuilder::new("app");
        let mut first = Identity::new("u1");
        first
            .custom_attributes
            .insert("custom_level".into(), json!(3));
        builder.upsert_identity(first).unwrap();

        let mut second = identity_in("u2", &[group("g1", "G1")]);
        second
            .custom_attributes
            .insert("custom_level".into(), json!("three"));
        let err = builder.upsert_identity(second).unwrap_err();

        assert!(matches!(err, GraphError::PropertyTypeConflict { .. }));
        assert_eq!(builder.identity_count(), 1);
        assert_eq!(builder.group_count(), 0);
    }

    #[test]
    fn test_define_property() {
        let mut builder = GraphBuilder::new("app");
        builder.define_property("email", PropertyType::String).unwrap();
        builder.define_property("email", PropertyType::String).unwrap();
        assert!(builder
            .define_property("email", PropertyType::Boolean)
            .is_err());
    }

    #[test]
    fn test_identity_name_falls_back_to_id() {
        let identity = Identity::new("u1");
        assert_eq!(identity.name(), "u1");
    }
}
