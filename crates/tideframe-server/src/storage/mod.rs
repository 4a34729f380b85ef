//! Storage abstraction: synchronous backends behind an async façade.
//!
//! A backend ([`ProtocolStorage`]) is synchronous and single-threaded;
//! the [`AsyncStorage`] façade offloads each call to a blocking worker
//! that checks an instance out of a shared pool (constructing one through
//! the stateless [`StorageFactory`] when the pool is dry) and returns it
//! on completion. Concurrency inside a backend is mediated by the
//! per-database lock in [`lock`].

mod error;
pub mod lock;
mod memory;
mod sqlite;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use sqlite::{SqliteFactory, SqliteStorage};
use tideframe_core::store::{
    GroupAclRow, GroupRow, PropertyRow, RosterGroupRow, RosterUserRow, StoreOp, StoreSink,
    UserAclRow, UserRow,
};

/// A synchronous storage backend.
///
/// One instance is owned by one worker at a time; implementations need no
/// internal synchronization beyond the per-database lock discipline.
#[allow(missing_docs, clippy::too_many_arguments)]
pub trait ProtocolStorage: Send {
    fn user_add(&mut self, name: &str, gecos: &str, password: &str) -> Result<(), StorageError>;
    fn user_get(&mut self, name: &str) -> Result<Option<UserRow>, StorageError>;
    fn user_set(
        &mut self,
        name: &str,
        gecos: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), StorageError>;
    fn user_delete(&mut self, name: &str) -> Result<(), StorageError>;

    fn group_add(&mut self, name: &str, topic: Option<&str>) -> Result<(), StorageError>;
    fn group_get(&mut self, name: &str) -> Result<Option<GroupRow>, StorageError>;
    fn group_set(&mut self, name: &str, topic: Option<&str>) -> Result<(), StorageError>;
    fn group_delete(&mut self, name: &str) -> Result<(), StorageError>;

    fn user_acl_all(&mut self, name: &str) -> Result<Vec<UserAclRow>, StorageError>;
    fn user_acl_add(
        &mut self,
        name: &str,
        acl: &str,
        setter: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), StorageError>;
    fn user_acl_del(&mut self, name: &str, acl: &str) -> Result<(), StorageError>;
    fn user_acl_del_all(&mut self, name: &str) -> Result<(), StorageError>;

    fn group_acl_all(&mut self, name: &str) -> Result<Vec<GroupAclRow>, StorageError>;
    fn group_acl_add(
        &mut self,
        group: &str,
        user: &str,
        acl: &str,
        setter: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), StorageError>;
    fn group_acl_del(&mut self, group: &str, user: &str, acl: &str) -> Result<(), StorageError>;
    fn group_acl_del_all(&mut self, group: &str) -> Result<(), StorageError>;

    fn user_property_all(&mut self, name: &str) -> Result<Vec<PropertyRow>, StorageError>;
    fn user_property_set(
        &mut self,
        name: &str,
        property: &str,
        value: Option<&str>,
        setter: Option<&str>,
    ) -> Result<(), StorageError>;
    fn user_property_del(&mut self, name: &str, property: &str) -> Result<(), StorageError>;

    fn group_property_all(&mut self, name: &str) -> Result<Vec<PropertyRow>, StorageError>;
    fn group_property_set(
        &mut self,
        group: &str,
        property: &str,
        value: Option<&str>,
        setter: Option<&str>,
    ) -> Result<(), StorageError>;
    fn group_property_del(&mut self, group: &str, property: &str) -> Result<(), StorageError>;

    fn roster_user_all(&mut self, owner: &str) -> Result<Vec<RosterUserRow>, StorageError>;
    fn roster_user_add(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
        pending: bool,
    ) -> Result<(), StorageError>;
    fn roster_user_set(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
        pending: Option<bool>,
        blocked: Option<bool>,
    ) -> Result<(), StorageError>;
    fn roster_user_del(&mut self, owner: &str, target: &str) -> Result<(), StorageError>;

    fn roster_group_all(&mut self, owner: &str) -> Result<Vec<RosterGroupRow>, StorageError>;
    fn roster_group_add(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
    ) -> Result<(), StorageError>;
    fn roster_group_set(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
    ) -> Result<(), StorageError>;
    fn roster_group_del(&mut self, owner: &str, target: &str) -> Result<(), StorageError>;
}

/// Stateless constructor of backend instances.
pub trait StorageFactory: Send + Sync {
    /// Open one backend instance.
    fn open(&self) -> Result<Box<dyn ProtocolStorage>, StorageError>;
}

/// Resolve a backend by its configured name.
pub fn factory_for(
    backend: &str,
    path: &Path,
    migrations: Option<&Path>,
) -> Result<Arc<dyn StorageFactory>, StorageError> {
    match backend {
        "sqlite" => Ok(Arc::new(SqliteFactory::new(path, migrations))),
        "memory" => Ok(Arc::new(memory::MemoryFactory::default())),
        other => Err(StorageError::BackendNotFound(other.to_string())),
    }
}

type Pool = Arc<Mutex<Vec<Box<dyn ProtocolStorage>>>>;

/// Async façade over a pool of synchronous backends.
#[derive(Clone)]
pub struct AsyncStorage {
    factory: Arc<dyn StorageFactory>,
    pool: Pool,
}

impl AsyncStorage {
    /// A façade with an empty pool; instances are created on demand.
    pub fn new(factory: Arc<dyn StorageFactory>) -> Self {
        Self { factory, pool: Arc::new(Mutex::new(Vec::new())) }
    }

    async fn call<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn ProtocolStorage) -> Result<R, StorageError> + Send + 'static,
    {
        let factory = self.factory.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let checked_out = pool.lock().unwrap_or_else(PoisonError::into_inner).pop();
            let mut backend = match checked_out {
                Some(backend) => backend,
                None => factory.open()?,
            };

            let out = f(backend.as_mut());
            pool.lock().unwrap_or_else(PoisonError::into_inner).push(backend);
            out
        })
        .await
        .map_err(|e| StorageError::Worker(e.to_string()))?
    }

    /// Look up a user row.
    pub async fn user_get(&self, name: &str) -> Result<Option<UserRow>, StorageError> {
        let name = name.to_string();
        self.call(move |b| b.user_get(&name)).await
    }

    /// Create a user row.
    pub async fn user_add(
        &self,
        name: &str,
        gecos: &str,
        password: &str,
    ) -> Result<(), StorageError> {
        let (name, gecos, password) = (name.to_string(), gecos.to_string(), password.to_string());
        self.call(move |b| b.user_add(&name, &gecos, &password)).await
    }

    /// Delete a user row.
    pub async fn user_delete(&self, name: &str) -> Result<(), StorageError> {
        let name = name.to_string();
        self.call(move |b| b.user_delete(&name)).await
    }

    /// Look up a group row.
    pub async fn group_get(&self, name: &str) -> Result<Option<GroupRow>, StorageError> {
        let name = name.to_string();
        self.call(move |b| b.group_get(&name)).await
    }

    /// Create a group row.
    pub async fn group_add(&self, name: &str, topic: Option<&str>) -> Result<(), StorageError> {
        let name = name.to_string();
        let topic = topic.map(str::to_string);
        self.call(move |b| b.group_add(&name, topic.as_deref())).await
    }

    /// All ACL rows of a user.
    pub async fn user_acl_all(&self, name: &str) -> Result<Vec<UserAclRow>, StorageError> {
        let name = name.to_string();
        self.call(move |b| b.user_acl_all(&name)).await
    }

    /// All ACL rows of a group.
    pub async fn group_acl_all(&self, name: &str) -> Result<Vec<GroupAclRow>, StorageError> {
        let name = name.to_string();
        self.call(move |b| b.group_acl_all(&name)).await
    }

    /// All property rows of a user.
    pub async fn user_property_all(&self, name: &str) -> Result<Vec<PropertyRow>, StorageError> {
        let name = name.to_string();
        self.call(move |b| b.user_property_all(&name)).await
    }

    /// All property rows of a group.
    pub async fn group_property_all(&self, name: &str) -> Result<Vec<PropertyRow>, StorageError> {
        let name = name.to_string();
        self.call(move |b| b.group_property_all(&name)).await
    }

    /// All user-roster rows of an owner.
    pub async fn roster_user_all(&self, owner: &str) -> Result<Vec<RosterUserRow>, StorageError> {
        let owner = owner.to_string();
        self.call(move |b| b.roster_user_all(&owner)).await
    }

    /// All group-roster rows of an owner.
    pub async fn roster_group_all(&self, owner: &str) -> Result<Vec<RosterGroupRow>, StorageError> {
        let owner = owner.to_string();
        self.call(move |b| b.roster_group_all(&owner)).await
    }

    /// Apply one queued write-through operation.
    pub async fn apply(&self, op: StoreOp) -> Result<(), StorageError> {
        self.call(move |b| apply_op(b, &op)).await
    }
}

fn apply_op(b: &mut dyn ProtocolStorage, op: &StoreOp) -> Result<(), StorageError> {
    match op {
        StoreOp::UserSet { name, gecos, password } => {
            b.user_set(name, gecos.as_deref(), password.as_deref())
        },
        StoreOp::UserAclAdd { name, acl, setter, reason } => {
            b.user_acl_add(name, acl, setter.as_deref(), reason.as_deref())
        },
        StoreOp::UserAclDel { name, acl } => b.user_acl_del(name, acl),
        StoreOp::GroupSet { name, topic } => b.group_set(name, topic.as_deref()),
        StoreOp::GroupAclAdd { group, user, acl, setter, reason } => {
            b.group_acl_add(group, user, acl, setter.as_deref(), reason.as_deref())
        },
        StoreOp::GroupAclDel { group, user, acl } => b.group_acl_del(group, user, acl),
        StoreOp::UserPropertySet { name, property, value, setter } => {
            b.user_property_set(name, property, value.as_deref(), setter.as_deref())
        },
        StoreOp::UserPropertyDel { name, property } => b.user_property_del(name, property),
        StoreOp::GroupPropertySet { group, property, value, setter } => {
            b.group_property_set(group, property, value.as_deref(), setter.as_deref())
        },
        StoreOp::GroupPropertyDel { group, property } => b.group_property_del(group, property),
        StoreOp::RosterUserAdd { owner, target, alias, group_tag, pending } => {
            b.roster_user_add(owner, target, alias.as_deref(), group_tag.as_deref(), *pending)
        },
        StoreOp::RosterUserSet { owner, target, alias, group_tag, pending, blocked } => b
            .roster_user_set(
                owner,
                target,
                alias.as_deref(),
                group_tag.as_deref(),
                *pending,
                *blocked,
            ),
        StoreOp::RosterUserDel { owner, target } => b.roster_user_del(owner, target),
        StoreOp::RosterGroupAdd { owner, target, alias, group_tag } => {
            b.roster_group_add(owner, target, alias.as_deref(), group_tag.as_deref())
        },
        StoreOp::RosterGroupSet { owner, target, alias, group_tag } => {
            b.roster_group_set(owner, target, alias.as_deref(), group_tag.as_deref())
        },
        StoreOp::RosterGroupDel { owner, target } => b.roster_group_del(owner, target),
    }
}

/// Spawn the persister draining write-through ops into storage.
///
/// Failures are logged; the in-memory graph has already moved on, and the
/// client has already been answered.
pub fn spawn_persister(storage: AsyncStorage) -> StoreSink {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            if let Err(err) = storage.apply(op).await {
                tracing::error!(%err, "write-through persistence failed");
            }
        }
    });
    StoreSink::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        let err = factory_for("etchasketch", Path::new("x"), None).err();
        assert_eq!(
            err,
            Some(StorageError::BackendNotFound("etchasketch".to_string()))
        );
    }

    #[tokio::test]
    async fn facade_round_trips_through_the_pool() {
        let factory = factory_for("memory", Path::new(""), None).unwrap();
        let storage = AsyncStorage::new(factory);

        storage.user_add("alice", "Alice", "$argon2id$fake").await.unwrap();
        let row = storage.user_get("alice").await.unwrap().unwrap();
        assert_eq!(row.gecos, "Alice");

        assert!(storage.user_get("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_routes_ops_to_the_right_family() {
        let factory = factory_for("memory", Path::new(""), None).unwrap();
        let storage = AsyncStorage::new(factory);

        storage.user_add("alice", "Alice", "$argon2id$fake").await.unwrap();
        storage
            .apply(StoreOp::UserAclAdd {
                name: "alice".into(),
                acl: "user:auspex".into(),
                setter: None,
                reason: None,
            })
            .await
            .unwrap();

        let acls = storage.user_acl_all("alice").await.unwrap();
        assert_eq!(acls.len(), 1);
        assert_eq!(acls[0].acl, "user:auspex");
    }
}
