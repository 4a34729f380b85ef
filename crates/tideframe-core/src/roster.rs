//! Per-user rosters.
//!
//! A roster is a user's private list of peers and groups: aliases, an
//! optional grouping tag, and (for user targets) pending friend-request
//! and block flags. Entries are keyed by the case-folded target name and
//! owned by the owning user.

use std::collections::BTreeMap;

use tideframe_proto::target;

use crate::{
    errors::UserError,
    store::{RosterGroupRow, RosterUserRow, StoreOp, StoreSink},
};

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEntry {
    /// A peer user.
    User {
        /// Display alias; defaults to the folded target handle.
        alias: String,
        /// Owner-chosen grouping tag.
        group_tag: Option<String>,
        /// Friend request not yet accepted.
        pending: bool,
        /// Target is blocked.
        blocked: bool,
    },
    /// A group.
    Group {
        /// Display alias; defaults to the folded target name.
        alias: String,
        /// Owner-chosen grouping tag.
        group_tag: Option<String>,
    },
}

impl RosterEntry {
    /// The entry's alias.
    pub fn alias(&self) -> &str {
        match self {
            Self::User { alias, .. } | Self::Group { alias, .. } => alias,
        }
    }
}

/// A user's roster.
#[derive(Debug)]
pub struct Roster {
    owner: String,
    map: BTreeMap<String, RosterEntry>,
    sink: StoreSink,
}

impl Roster {
    /// An empty roster for `owner` (case-folded handle).
    pub fn new(owner: impl Into<String>, sink: StoreSink) -> Self {
        Self { owner: owner.into(), map: BTreeMap::new(), sink }
    }

    /// Populate from storage rows without re-persisting them.
    pub fn from_rows(
        owner: impl Into<String>,
        sink: StoreSink,
        users: &[RosterUserRow],
        groups: &[RosterGroupRow],
    ) -> Self {
        let mut roster = Self::new(owner, sink);
        for row in users {
            let key = target::fold(&row.target);
            roster.map.insert(key.clone(), RosterEntry::User {
                alias: row.alias.clone().unwrap_or_else(|| key.clone()),
                group_tag: row.group_tag.clone(),
                pending: row.pending,
                blocked: row.blocked,
            });
        }
        for row in groups {
            let key = target::fold(&row.target);
            roster.map.insert(key.clone(), RosterEntry::Group {
                alias: row.alias.clone().unwrap_or_else(|| key.clone()),
                group_tag: row.group_tag.clone(),
            });
        }
        roster
    }

    /// Whether `name` is on the roster.
    pub fn has(&self, name: &str) -> bool {
        self.map.contains_key(&target::fold(name))
    }

    /// The entry for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&RosterEntry> {
        self.map.get(&target::fold(name))
    }

    /// Add a target; the entry kind follows the target's sigil.
    pub fn add(
        &mut self,
        name: &str,
        alias: Option<String>,
        group_tag: Option<String>,
        pending: bool,
    ) -> Result<(), UserError> {
        let key = target::fold(name);
        if self.map.contains_key(&key) {
            return Err(UserError(format!("Roster entry already exists: {key}")));
        }

        let alias = alias.unwrap_or_else(|| key.clone());
        if target::is_group(&key) {
            self.sink.send(StoreOp::RosterGroupAdd {
                owner: self.owner.clone(),
                target: key.clone(),
                alias: Some(alias.clone()),
                group_tag: group_tag.clone(),
            });
            self.map.insert(key, RosterEntry::Group { alias, group_tag });
        } else {
            self.sink.send(StoreOp::RosterUserAdd {
                owner: self.owner.clone(),
                target: key.clone(),
                alias: Some(alias.clone()),
                group_tag: group_tag.clone(),
                pending,
            });
            self.map.insert(key, RosterEntry::User { alias, group_tag, pending, blocked: false });
        }
        Ok(())
    }

    /// Update fields of an existing entry; `None` leaves a field alone.
    pub fn set(
        &mut self,
        name: &str,
        alias: Option<String>,
        group_tag: Option<String>,
        pending: Option<bool>,
        blocked: Option<bool>,
    ) -> Result<(), UserError> {
        let key = target::fold(name);
        let entry = self
            .map
            .get_mut(&key)
            .ok_or_else(|| UserError(format!("No such roster entry: {key}")))?;

        match entry {
            RosterEntry::User {
                alias: cur_alias,
                group_tag: cur_tag,
                pending: cur_pending,
                blocked: cur_blocked,
            } => {
                if let Some(alias) = alias.clone() {
                    *cur_alias = alias;
                }
                if group_tag.is_some() {
                    *cur_tag = group_tag.clone();
                }
                if let Some(pending) = pending {
                    *cur_pending = pending;
                }
                if let Some(blocked) = blocked {
                    *cur_blocked = blocked;
                }
                self.sink.send(StoreOp::RosterUserSet {
                    owner: self.owner.clone(),
                    target: key,
                    alias,
                    group_tag,
                    pending,
                    blocked,
                });
            },
            RosterEntry::Group { alias: cur_alias, group_tag: cur_tag } => {
                if let Some(alias) = alias.clone() {
                    *cur_alias = alias;
                }
                if group_tag.is_some() {
                    *cur_tag = group_tag.clone();
                }
                self.sink.send(StoreOp::RosterGroupSet {
                    owner: self.owner.clone(),
                    target: key,
                    alias,
                    group_tag,
                });
            },
        }
        Ok(())
    }

    /// Remove an entry.
    pub fn delete(&mut self, name: &str) -> Result<(), UserError> {
        let key = target::fold(name);
        let entry = self
            .map
            .remove(&key)
            .ok_or_else(|| UserError(format!("No such roster entry: {key}")))?;

        self.sink.send(match entry {
            RosterEntry::User { .. } => {
                StoreOp::RosterUserDel { owner: self.owner.clone(), target: key }
            },
            RosterEntry::Group { .. } => {
                StoreOp::RosterGroupDel { owner: self.owner.clone(), target: key }
            },
        });
        Ok(())
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RosterEntry)> {
        self.map.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kind_follows_sigil() {
        let mut roster = Roster::new("alice", StoreSink::disconnected());
        roster.add("Bob", None, None, true).unwrap();
        roster.add("#Room", Some("the room".into()), None, false).unwrap();

        assert!(matches!(roster.get("bob"), Some(RosterEntry::User { pending: true, .. })));
        assert!(matches!(roster.get("#room"), Some(RosterEntry::Group { .. })));
        assert_eq!(roster.get("#room").unwrap().alias(), "the room");
        // Alias defaults to the folded target.
        assert_eq!(roster.get("BOB").unwrap().alias(), "bob");
    }

    #[test]
    fn duplicate_add_fails() {
        let mut roster = Roster::new("alice", StoreSink::disconnected());
        roster.add("bob", None, None, false).unwrap();
        assert!(roster.add("Bob", None, None, false).is_err());
    }

    #[test]
    fn set_updates_only_given_fields() {
        let mut roster = Roster::new("alice", StoreSink::disconnected());
        roster.add("bob", Some("bobby".into()), None, true).unwrap();

        roster.set("bob", None, None, Some(false), Some(true)).unwrap();
        match roster.get("bob").unwrap() {
            RosterEntry::User { alias, pending, blocked, .. } => {
                assert_eq!(alias, "bobby");
                assert!(!pending);
                assert!(blocked);
            },
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn delete_enqueues_matching_scope() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut roster = Roster::new("alice", StoreSink::new(tx));

        roster.add("#room", None, None, false).unwrap();
        roster.delete("#room").unwrap();
        assert!(roster.delete("#room").is_err());

        assert!(matches!(rx.try_recv().unwrap(), StoreOp::RosterGroupAdd { .. }));
        assert!(matches!(rx.try_recv().unwrap(), StoreOp::RosterGroupDel { .. }));
    }
}
