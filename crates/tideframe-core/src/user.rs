//! The user entity.

use std::collections::HashSet;

use tideframe_proto::target;

use crate::{
    SessionId,
    acl::UserAclSet,
    property::{PropertyScope, PropertySet},
    roster::Roster,
    store::{PropertyRow, RosterGroupRow, RosterUserRow, StoreOp, StoreSink, UserAclRow, UserRow},
    unix_time,
};

/// A registered user.
///
/// A user is *online* iff its session set is non-empty; the server's
/// online index contains exactly the online users. Sessions are owned by
/// the server's transport table; the ids here are lookups, never lifetime
/// extenders.
#[derive(Debug)]
pub struct User {
    name: String,
    key: String,
    gecos: String,
    password: Option<String>,
    /// User-scope ACLs.
    pub acl: UserAclSet,
    /// Typed metadata.
    pub properties: PropertySet,
    /// The user's private peer/group list.
    pub roster: Roster,
    /// Live session ids.
    pub sessions: HashSet<SessionId>,
    /// Case-folded names of joined groups.
    pub groups: HashSet<String>,
    /// Options announced at signon.
    pub options: Vec<String>,
    /// Creation time, seconds since the epoch.
    pub created: u64,
    sink: StoreSink,
}

impl User {
    /// A freshly registered user with empty sets.
    pub fn new(name: &str, gecos: &str, password: Option<String>, sink: StoreSink) -> Self {
        let key = target::fold(name);
        Self {
            name: name.to_string(),
            gecos: gecos.to_string(),
            password,
            acl: UserAclSet::new(key.clone(), sink.clone()),
            properties: PropertySet::new(key.clone(), PropertyScope::User, sink.clone()),
            roster: Roster::new(key.clone(), sink.clone()),
            sessions: HashSet::new(),
            groups: HashSet::new(),
            options: Vec::new(),
            created: unix_time(),
            key,
            sink,
        }
    }

    /// Inflate a user from persisted rows, sets eagerly populated.
    #[allow(clippy::too_many_arguments)]
    pub fn from_storage(
        row: &UserRow,
        acl_rows: &[UserAclRow],
        prop_rows: &[PropertyRow],
        roster_users: &[RosterUserRow],
        roster_groups: &[RosterGroupRow],
        sink: StoreSink,
    ) -> Self {
        let key = target::fold(&row.name);
        Self {
            name: row.name.clone(),
            gecos: row.gecos.clone(),
            password: row.password.clone(),
            acl: UserAclSet::from_rows(key.clone(), sink.clone(), acl_rows),
            properties: PropertySet::from_rows(
                key.clone(),
                PropertyScope::User,
                sink.clone(),
                prop_rows,
            ),
            roster: Roster::from_rows(key.clone(), sink.clone(), roster_users, roster_groups),
            sessions: HashSet::new(),
            groups: HashSet::new(),
            options: Vec::new(),
            created: row.timestamp,
            key,
            sink,
        }
    }

    /// Display name, as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-folded handle; the index key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Display name (gecos).
    pub fn gecos(&self) -> &str {
        &self.gecos
    }

    /// Update gecos; write-through.
    pub fn set_gecos(&mut self, gecos: &str) {
        self.gecos = gecos.to_string();
        self.sink.send(StoreOp::UserSet {
            name: self.key.clone(),
            gecos: Some(self.gecos.clone()),
            password: None,
        });
    }

    /// Stored password hash, if loaded.
    pub fn password_hash(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Replace the password hash; write-through. `hash` must already be a
    /// PHC string — plaintext never reaches this type.
    pub fn set_password_hash(&mut self, hash: String) {
        self.sink.send(StoreOp::UserSet {
            name: self.key.clone(),
            gecos: None,
            password: Some(hash.clone()),
        });
        self.password = Some(hash);
    }

    /// Whether any session is attached.
    pub fn is_online(&self) -> bool {
        !self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_user_is_offline_with_empty_sets() {
        let user = User::new("Alice", "Alice Liddell", None, StoreSink::disconnected());
        assert_eq!(user.name(), "Alice");
        assert_eq!(user.key(), "alice");
        assert!(!user.is_online());
        assert!(user.acl.is_empty());
        assert!(user.properties.is_empty());
        assert!(user.roster.is_empty());
    }

    #[test]
    fn gecos_and_password_are_write_through() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut user = User::new("alice", "Alice", None, StoreSink::new(tx));

        user.set_gecos("Alice in Chains");
        user.set_password_hash("$argon2id$fake".to_string());

        match rx.try_recv().unwrap() {
            StoreOp::UserSet { name, gecos, password } => {
                assert_eq!(name, "alice");
                assert_eq!(gecos.as_deref(), Some("Alice in Chains"));
                assert!(password.is_none());
            },
            other => panic!("unexpected op {other:?}"),
        }
        match rx.try_recv().unwrap() {
            StoreOp::UserSet { password, gecos, .. } => {
                assert_eq!(password.as_deref(), Some("$argon2id$fake"));
                assert!(gecos.is_none());
            },
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn inflation_populates_sets_eagerly() {
        let row = UserRow {
            name: "alice".into(),
            gecos: "Alice".into(),
            password: Some("$argon2id$fake".into()),
            timestamp: 1_700_000_000,
        };
        let acl_rows = vec![UserAclRow {
            acl: "user:auspex".into(),
            setter: Some("admin".into()),
            reason: None,
            timestamp: 1_700_000_001,
        }];
        let prop_rows = vec![PropertyRow {
            property: "private".into(),
            value: None,
            setter: None,
            timestamp: 1_700_000_002,
        }];
        let roster_rows = vec![RosterUserRow {
            target: "bob".into(),
            alias: None,
            group_tag: None,
            pending: false,
            blocked: false,
        }];

        let user = User::from_storage(
            &row,
            &acl_rows,
            &prop_rows,
            &roster_rows,
            &[],
            StoreSink::disconnected(),
        );
        assert_eq!(user.created, 1_700_000_000);
        assert!(user.acl.has(crate::acl::UserVerb::UserAuspex));
        assert!(user.properties.has("private"));
        assert!(user.roster.has("bob"));
        assert_eq!(user.password_hash(), Some("$argon2id$fake"));
    }
}
