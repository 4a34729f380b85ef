//! The group entity.

use std::collections::HashSet;

use tideframe_proto::target;

use crate::{
    acl::GroupAclSet,
    errors::GroupError,
    property::{PropertyScope, PropertySet},
    store::{GroupAclRow, GroupRow, PropertyRow, StoreOp, StoreSink},
    unix_time,
};

/// A named conversation space.
///
/// Membership is symmetric with [`User::groups`]: the server controller
/// updates both sides so `user ∈ group.members ⇔ group ∈ user.groups`
/// holds after every mutation. Groups are created on first join and never
/// implicitly destroyed.
///
/// [`User::groups`]: crate::User
#[derive(Debug)]
pub struct Group {
    name: String,
    key: String,
    topic: Option<String>,
    /// Per-member ACLs.
    pub acl: GroupAclSet,
    /// Typed metadata.
    pub properties: PropertySet,
    /// Case-folded handles of current members.
    pub members: HashSet<String>,
    /// Creation time, seconds since the epoch.
    pub created: u64,
    sink: StoreSink,
}

impl Group {
    /// A freshly created group. The `#` sigil is prepended if missing.
    pub fn new(name: &str, sink: StoreSink) -> Self {
        let name = if name.starts_with('#') {
            name.to_string()
        } else {
            format!("#{name}")
        };
        let key = target::fold(&name);
        Self {
            name,
            topic: None,
            acl: GroupAclSet::new(key.clone(), sink.clone()),
            properties: PropertySet::new(key.clone(), PropertyScope::Group, sink.clone()),
            members: HashSet::new(),
            created: unix_time(),
            key,
            sink,
        }
    }

    /// Inflate a group from persisted rows, sets eagerly populated.
    pub fn from_storage(
        row: &GroupRow,
        acl_rows: &[GroupAclRow],
        prop_rows: &[PropertyRow],
        sink: StoreSink,
    ) -> Self {
        let key = target::fold(&row.name);
        Self {
            name: row.name.clone(),
            topic: row.topic.clone(),
            acl: GroupAclSet::from_rows(key.clone(), sink.clone(), acl_rows),
            properties: PropertySet::from_rows(
                key.clone(),
                PropertyScope::Group,
                sink.clone(),
                prop_rows,
            ),
            members: HashSet::new(),
            created: row.timestamp,
            key,
            sink,
        }
    }

    /// Display name, `#`-prefixed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-folded name; the index key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current topic.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Update the topic; write-through.
    pub fn set_topic(&mut self, topic: Option<String>) {
        self.topic = topic;
        self.sink.send(StoreOp::GroupSet { name: self.key.clone(), topic: self.topic.clone() });
    }

    /// Record a member. The caller updates the user's side of the
    /// relation.
    pub fn insert_member(&mut self, user_key: &str) -> Result<(), GroupError> {
        if !self.members.insert(user_key.to_string()) {
            return Err(GroupError::Addition(format!("Duplicate user added: {user_key}")));
        }
        Ok(())
    }

    /// Drop a member. The caller updates the user's side of the relation.
    pub fn remove_member(&mut self, user_key: &str) -> Result<(), GroupError> {
        if !self.members.remove(user_key) {
            return Err(GroupError::Removal(format!("Nonexistent user removed: {user_key}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigil_is_prepended() {
        let group = Group::new("room", StoreSink::disconnected());
        assert_eq!(group.name(), "#room");
        assert_eq!(group.key(), "#room");

        let group = Group::new("#Lounge", StoreSink::disconnected());
        assert_eq!(group.name(), "#Lounge");
        assert_eq!(group.key(), "#lounge");
    }

    #[test]
    fn membership_rejects_duplicates_and_absentees() {
        let mut group = Group::new("#room", StoreSink::disconnected());
        group.insert_member("alice").unwrap();
        assert!(matches!(group.insert_member("alice"), Err(GroupError::Addition(_))));

        group.remove_member("alice").unwrap();
        assert!(matches!(group.remove_member("alice"), Err(GroupError::Removal(_))));
    }

    #[test]
    fn topic_is_write_through() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut group = Group::new("#room", StoreSink::new(tx));

        group.set_topic(Some("welcome".into()));
        assert_eq!(group.topic(), Some("welcome"));

        match rx.try_recv().unwrap() {
            StoreOp::GroupSet { name, topic } => {
                assert_eq!(name, "#room");
                assert_eq!(topic.as_deref(), Some("welcome"));
            },
            other => panic!("unexpected op {other:?}"),
        }
    }
}
