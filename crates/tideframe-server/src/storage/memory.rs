//! In-memory storage backend.
//!
//! Backs tests and throwaway deployments. Every instance handed out by
//! one [`MemoryFactory`] shares the same underlying state, mirroring how
//! pooled SQLite instances share one database file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tideframe_core::store::{
    GroupAclRow, GroupRow, PropertyRow, RosterGroupRow, RosterUserRow, UserAclRow, UserRow,
};
use tideframe_core::unix_time;

use super::{ProtocolStorage, StorageError, StorageFactory};

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, UserRow>,
    groups: HashMap<String, GroupRow>,
    user_acls: HashMap<String, Vec<UserAclRow>>,
    group_acls: HashMap<String, Vec<GroupAclRow>>,
    user_properties: HashMap<String, Vec<PropertyRow>>,
    group_properties: HashMap<String, Vec<PropertyRow>>,
    roster_users: HashMap<String, Vec<RosterUserRow>>,
    roster_groups: HashMap<String, Vec<RosterGroupRow>>,
}

/// Shared-state in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    /// A fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Factory handing out instances that share one state.
#[derive(Debug, Clone, Default)]
pub struct MemoryFactory {
    storage: MemoryStorage,
}

impl MemoryFactory {
    /// A factory over the given store (lets tests inspect it directly).
    pub fn with_storage(storage: MemoryStorage) -> Self {
        Self { storage }
    }
}

impl StorageFactory for MemoryFactory {
    fn open(&self) -> Result<Box<dyn ProtocolStorage>, StorageError> {
        Ok(Box::new(self.storage.clone()))
    }
}

impl ProtocolStorage for MemoryStorage {
    fn user_add(&mut self, name: &str, gecos: &str, password: &str) -> Result<(), StorageError> {
        self.with(|s| {
            if s.users.contains_key(name) {
                return Err(StorageError::Database(format!("user exists: {name}")));
            }
            s.users.insert(name.to_string(), UserRow {
                name: name.to_string(),
                gecos: gecos.to_string(),
                password: Some(password.to_string()),
                timestamp: unix_time(),
            });
            Ok(())
        })
    }

    fn user_get(&mut self, name: &str) -> Result<Option<UserRow>, StorageError> {
        self.with(|s| Ok(s.users.get(name).cloned()))
    }

    fn user_set(
        &mut self,
        name: &str,
        gecos: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(row) = s.users.get_mut(name) {
                if let Some(gecos) = gecos {
                    row.gecos = gecos.to_string();
                }
                if let Some(password) = password {
                    row.password = Some(password.to_string());
                }
            }
            Ok(())
        })
    }

    fn user_delete(&mut self, name: &str) -> Result<(), StorageError> {
        self.with(|s| {
            s.users.remove(name);
            s.user_acls.remove(name);
            s.user_properties.remove(name);
            s.roster_users.remove(name);
            s.roster_groups.remove(name);
            Ok(())
        })
    }

    fn group_add(&mut self, name: &str, topic: Option<&str>) -> Result<(), StorageError> {
        self.with(|s| {
            if s.groups.contains_key(name) {
                return Err(StorageError::Database(format!("group exists: {name}")));
            }
            s.groups.insert(name.to_string(), GroupRow {
                name: name.to_string(),
                topic: topic.map(str::to_string),
                timestamp: unix_time(),
            });
            Ok(())
        })
    }

    fn group_get(&mut self, name: &str) -> Result<Option<GroupRow>, StorageError> {
        self.with(|s| Ok(s.groups.get(name).cloned()))
    }

    fn group_set(&mut self, name: &str, topic: Option<&str>) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(row) = s.groups.get_mut(name) {
                row.topic = topic.map(str::to_string);
            }
            Ok(())
        })
    }

    fn group_delete(&mut self, name: &str) -> Result<(), StorageError> {
        self.with(|s| {
            s.groups.remove(name);
            s.group_acls.remove(name);
            s.group_properties.remove(name);
            Ok(())
        })
    }

    fn user_acl_all(&mut self, name: &str) -> Result<Vec<UserAclRow>, StorageError> {
        self.with(|s| Ok(s.user_acls.get(name).cloned().unwrap_or_default()))
    }

    fn user_acl_add(
        &mut self,
        name: &str,
        acl: &str,
        setter: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            let rows = s.user_acls.entry(name.to_string()).or_default();
            rows.retain(|r| r.acl != acl);
            rows.push(UserAclRow {
                acl: acl.to_string(),
                setter: setter.map(str::to_string),
                reason: reason.map(str::to_string),
                timestamp: unix_time(),
            });
            Ok(())
        })
    }

    fn user_acl_del(&mut self, name: &str, acl: &str) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(rows) = s.user_acls.get_mut(name) {
                rows.retain(|r| r.acl != acl);
            }
            Ok(())
        })
    }

    fn user_acl_del_all(&mut self, name: &str) -> Result<(), StorageError> {
        self.with(|s| {
            s.user_acls.remove(name);
            Ok(())
        })
    }

    fn group_acl_all(&mut self, name: &str) -> Result<Vec<GroupAclRow>, StorageError> {
        self.with(|s| Ok(s.group_acls.get(name).cloned().unwrap_or_default()))
    }

    fn group_acl_add(
        &mut self,
        group: &str,
        user: &str,
        acl: &str,
        setter: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            let rows = s.group_acls.entry(group.to_string()).or_default();
            rows.retain(|r| !(r.target == user && r.acl == acl));
            rows.push(GroupAclRow {
                acl: acl.to_string(),
                target: user.to_string(),
                setter: setter.map(str::to_string),
                reason: reason.map(str::to_string),
                timestamp: unix_time(),
            });
            Ok(())
        })
    }

    fn group_acl_del(&mut self, group: &str, user: &str, acl: &str) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(rows) = s.group_acls.get_mut(group) {
                rows.retain(|r| !(r.target == user && r.acl == acl));
            }
            Ok(())
        })
    }

    fn group_acl_del_all(&mut self, group: &str) -> Result<(), StorageError> {
        self.with(|s| {
            s.group_acls.remove(group);
            Ok(())
        })
    }

    fn user_property_all(&mut self, name: &str) -> Result<Vec<PropertyRow>, StorageError> {
        self.with(|s| Ok(s.user_properties.get(name).cloned().unwrap_or_default()))
    }

    fn user_property_set(
        &mut self,
        name: &str,
        property: &str,
        value: Option<&str>,
        setter: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            let rows = s.user_properties.entry(name.to_string()).or_default();
            rows.retain(|r| r.property != property);
            rows.push(PropertyRow {
                property: property.to_string(),
                value: value.map(str::to_string),
                setter: setter.map(str::to_string),
                timestamp: unix_time(),
            });
            Ok(())
        })
    }

    fn user_property_del(&mut self, name: &str, property: &str) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(rows) = s.user_properties.get_mut(name) {
                rows.retain(|r| r.property != property);
            }
            Ok(())
        })
    }

    fn group_property_all(&mut self, name: &str) -> Result<Vec<PropertyRow>, StorageError> {
        self.with(|s| Ok(s.group_properties.get(name).cloned().unwrap_or_default()))
    }

    fn group_property_set(
        &mut self,
        group: &str,
        property: &str,
        value: Option<&str>,
        setter: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            let rows = s.group_properties.entry(group.to_string()).or_default();
            rows.retain(|r| r.property != property);
            rows.push(PropertyRow {
                property: property.to_string(),
                value: value.map(str::to_string),
                setter: setter.map(str::to_string),
                timestamp: unix_time(),
            });
            Ok(())
        })
    }

    fn group_property_del(&mut self, group: &str, property: &str) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(rows) = s.group_properties.get_mut(group) {
                rows.retain(|r| r.property != property);
            }
            Ok(())
        })
    }

    fn roster_user_all(&mut self, owner: &str) -> Result<Vec<RosterUserRow>, StorageError> {
        self.with(|s| Ok(s.roster_users.get(owner).cloned().unwrap_or_default()))
    }

    fn roster_user_add(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
        pending: bool,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            let rows = s.roster_users.entry(owner.to_string()).or_default();
            rows.retain(|r| r.target != target);
            rows.push(RosterUserRow {
                target: target.to_string(),
                alias: alias.map(str::to_string),
                group_tag: group_tag.map(str::to_string),
                pending,
                blocked: false,
            });
            Ok(())
        })
    }

    fn roster_user_set(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
        pending: Option<bool>,
        blocked: Option<bool>,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(row) = s
                .roster_users
                .get_mut(owner)
                .and_then(|rows| rows.iter_mut().find(|r| r.target == target))
            {
                if alias.is_some() {
                    row.alias = alias.map(str::to_string);
                }
                if group_tag.is_some() {
                    row.group_tag = group_tag.map(str::to_string);
                }
                if let Some(pending) = pending {
                    row.pending = pending;
                }
                if let Some(blocked) = blocked {
                    row.blocked = blocked;
                }
            }
            Ok(())
        })
    }

    fn roster_user_del(&mut self, owner: &str, target: &str) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(rows) = s.roster_users.get_mut(owner) {
                rows.retain(|r| r.target != target);
            }
            Ok(())
        })
    }

    fn roster_group_all(&mut self, owner: &str) -> Result<Vec<RosterGroupRow>, StorageError> {
        self.with(|s| Ok(s.roster_groups.get(owner).cloned().unwrap_or_default()))
    }

    fn roster_group_add(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            let rows = s.roster_groups.entry(owner.to_string()).or_default();
            rows.retain(|r| r.target != target);
            rows.push(RosterGroupRow {
                target: target.to_string(),
                alias: alias.map(str::to_string),
                group_tag: group_tag.map(str::to_string),
            });
            Ok(())
        })
    }

    fn roster_group_set(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(row) = s
                .roster_groups
                .get_mut(owner)
                .and_then(|rows| rows.iter_mut().find(|r| r.target == target))
            {
                if alias.is_some() {
                    row.alias = alias.map(str::to_string);
                }
                if group_tag.is_some() {
                    row.group_tag = group_tag.map(str::to_string);
                }
            }
            Ok(())
        })
    }

    fn roster_group_del(&mut self, owner: &str, target: &str) -> Result<(), StorageError> {
        self.with(|s| {
            if let Some(rows) = s.roster_groups.get_mut(owner) {
                rows.retain(|r| r.target != target);
            }
            Ok(())
        })
    }
}
