//! ACL verbs and the user/group ACL sets.
//!
//! Verbs are drawn from closed enumerations; strings outside them are
//! rejected when parsed, so a set never holds an unknown verb. Every
//! entry records who set it, why, and when. Mutations are write-through:
//! memory first, then a queued [`StoreOp`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{
    errors::AclError,
    store::{GroupAclRow, StoreOp, StoreSink, UserAclRow},
    unix_time,
};

/// User-scope ACL verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum UserVerb {
    UserAuspex,
    UserRegister,
    UserRevoke,
    UserGrant,
    UserDisconnect,
    UserBan,
    GroupAuspex,
    GroupRegister,
    GroupOverride,
    GroupRevoke,
    GroupBan,
    ProhibitBan,
    ProhibitUsermessage,
}

impl UserVerb {
    /// The wire spelling of the verb.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserAuspex => "user:auspex",
            Self::UserRegister => "user:register",
            Self::UserRevoke => "user:revoke",
            Self::UserGrant => "user:grant",
            Self::UserDisconnect => "user:disconnect",
            Self::UserBan => "user:ban",
            Self::GroupAuspex => "group:auspex",
            Self::GroupRegister => "group:register",
            Self::GroupOverride => "group:override",
            Self::GroupRevoke => "group:revoke",
            Self::GroupBan => "group:ban",
            Self::ProhibitBan => "prohibit:ban",
            Self::ProhibitUsermessage => "prohibit:usermessage",
        }
    }
}

impl fmt::Display for UserVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserVerb {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "user:auspex" => Self::UserAuspex,
            "user:register" => Self::UserRegister,
            "user:revoke" => Self::UserRevoke,
            "user:grant" => Self::UserGrant,
            "user:disconnect" => Self::UserDisconnect,
            "user:ban" => Self::UserBan,
            "group:auspex" => Self::GroupAuspex,
            "group:register" => Self::GroupRegister,
            "group:override" => Self::GroupOverride,
            "group:revoke" => Self::GroupRevoke,
            "group:ban" => Self::GroupBan,
            "prohibit:ban" => Self::ProhibitBan,
            "prohibit:usermessage" => Self::ProhibitUsermessage,
            other => return Err(AclError::Value(other.to_string())),
        })
    }
}

/// Group-scope ACL verbs (without the `grant:` forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum GroupVerb {
    Kick,
    Ban,
    Mute,
    Voice,
    Invex,
    Topic,
    Property,
    Clear,
    Owner,
    Admin,
    Op,
    Halfop,
    Grant,
    ProhibitBan,
    ProhibitMute,
}

impl GroupVerb {
    /// The wire spelling of the verb.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Mute => "mute",
            Self::Voice => "voice",
            Self::Invex => "invex",
            Self::Topic => "topic",
            Self::Property => "property",
            Self::Clear => "clear",
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Op => "op",
            Self::Halfop => "halfop",
            Self::Grant => "grant",
            Self::ProhibitBan => "prohibit:ban",
            Self::ProhibitMute => "prohibit:mute",
        }
    }

    fn parse_plain(s: &str) -> Option<Self> {
        Some(match s {
            "kick" => Self::Kick,
            "ban" => Self::Ban,
            "mute" => Self::Mute,
            "voice" => Self::Voice,
            "invex" => Self::Invex,
            "topic" => Self::Topic,
            "property" => Self::Property,
            "clear" => Self::Clear,
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            "op" => Self::Op,
            "halfop" => Self::Halfop,
            "grant" => Self::Grant,
            "prohibit:ban" => Self::ProhibitBan,
            "prohibit:mute" => Self::ProhibitMute,
            _ => return None,
        })
    }
}

/// A storable group ACL name: a plain verb, a scoped grant
/// (`grant:<verb>`), or the blanket grant `grant:*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupAcl {
    /// A plain verb.
    Verb(GroupVerb),
    /// Authority to grant one specific verb.
    GrantOf(GroupVerb),
    /// Authority to grant any verb.
    GrantAll,
}

impl fmt::Display for GroupAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verb(v) => f.write_str(v.as_str()),
            Self::GrantOf(v) => write!(f, "grant:{}", v.as_str()),
            Self::GrantAll => f.write_str("grant:*"),
        }
    }
}

impl FromStr for GroupAcl {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "grant:*" {
            return Ok(Self::GrantAll);
        }
        if let Some(inner) = s.strip_prefix("grant:") {
            if let Some(verb) = GroupVerb::parse_plain(inner) {
                return Ok(Self::GrantOf(verb));
            }
            return Err(AclError::Value(s.to_string()));
        }
        GroupVerb::parse_plain(s)
            .map(Self::Verb)
            .ok_or_else(|| AclError::Value(s.to_string()))
    }
}

/// Metadata attached to one ACL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    /// Handle of the granting user.
    pub setter: Option<String>,
    /// Free-form reason.
    pub reason: Option<String>,
    /// Grant time, seconds since the epoch.
    pub time: u64,
}

impl AclEntry {
    fn new(setter: Option<String>, reason: Option<String>, time: Option<u64>) -> Self {
        Self { setter, reason, time: time.unwrap_or_else(unix_time) }
    }
}

/// The ACL set attached to one user.
#[derive(Debug)]
pub struct UserAclSet {
    owner: String,
    map: BTreeMap<UserVerb, AclEntry>,
    sink: StoreSink,
}

impl UserAclSet {
    /// An empty set for `owner` (case-folded handle).
    pub fn new(owner: impl Into<String>, sink: StoreSink) -> Self {
        Self { owner: owner.into(), map: BTreeMap::new(), sink }
    }

    /// Populate from storage rows without re-persisting them.
    ///
    /// Rows with an unknown verb are skipped; they can only appear if the
    /// store was written by something outside the closed enumeration.
    pub fn from_rows(owner: impl Into<String>, sink: StoreSink, rows: &[UserAclRow]) -> Self {
        let mut set = Self::new(owner, sink);
        for row in rows {
            match row.acl.parse::<UserVerb>() {
                Ok(verb) => {
                    set.map.insert(
                        verb,
                        AclEntry::new(row.setter.clone(), row.reason.clone(), Some(row.timestamp)),
                    );
                },
                Err(_) => {
                    tracing::warn!(owner = %set.owner, acl = %row.acl, "skipping unknown ACL row");
                },
            }
        }
        set
    }

    /// Whether the verb is held.
    pub fn has(&self, verb: UserVerb) -> bool {
        self.map.contains_key(&verb)
    }

    /// Whether any of the verbs is held.
    pub fn has_any(&self, verbs: impl IntoIterator<Item = UserVerb>) -> bool {
        verbs.into_iter().any(|v| self.has(v))
    }

    /// Whether all of the verbs are held.
    pub fn has_all(&self, verbs: impl IntoIterator<Item = UserVerb>) -> bool {
        verbs.into_iter().all(|v| self.has(v))
    }

    /// The entry for a verb, if held.
    pub fn get(&self, verb: UserVerb) -> Option<&AclEntry> {
        self.map.get(&verb)
    }

    /// Grant a verb.
    pub fn add(
        &mut self,
        verb: UserVerb,
        setter: Option<String>,
        reason: Option<String>,
    ) -> Result<(), AclError> {
        if self.map.contains_key(&verb) {
            return Err(AclError::Exists(verb.to_string()));
        }

        let entry = AclEntry::new(setter, reason, None);
        self.sink.send(StoreOp::UserAclAdd {
            name: self.owner.clone(),
            acl: verb.to_string(),
            setter: entry.setter.clone(),
            reason: entry.reason.clone(),
        });
        self.map.insert(verb, entry);
        Ok(())
    }

    /// Revoke a verb.
    pub fn delete(&mut self, verb: UserVerb) -> Result<(), AclError> {
        if self.map.remove(&verb).is_none() {
            return Err(AclError::DoesNotExist);
        }

        self.sink.send(StoreOp::UserAclDel { name: self.owner.clone(), acl: verb.to_string() });
        Ok(())
    }

    /// All held verbs with their entries, in verb order.
    pub fn iter(&self) -> impl Iterator<Item = (UserVerb, &AclEntry)> {
        self.map.iter().map(|(v, e)| (*v, e))
    }

    /// Number of held verbs.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no verbs are held.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The ACL set attached to one group: per-member verb maps.
#[derive(Debug)]
pub struct GroupAclSet {
    group: String,
    map: BTreeMap<String, BTreeMap<GroupAcl, AclEntry>>,
    sink: StoreSink,
}

impl GroupAclSet {
    /// An empty set for `group` (case-folded name).
    pub fn new(group: impl Into<String>, sink: StoreSink) -> Self {
        Self { group: group.into(), map: BTreeMap::new(), sink }
    }

    /// Populate from storage rows without re-persisting them.
    pub fn from_rows(group: impl Into<String>, sink: StoreSink, rows: &[GroupAclRow]) -> Self {
        let mut set = Self::new(group, sink);
        for row in rows {
            match row.acl.parse::<GroupAcl>() {
                Ok(acl) => {
                    set.map.entry(row.target.clone()).or_default().insert(
                        acl,
                        AclEntry::new(row.setter.clone(), row.reason.clone(), Some(row.timestamp)),
                    );
                },
                Err(_) => {
                    tracing::warn!(group = %set.group, acl = %row.acl, "skipping unknown ACL row");
                },
            }
        }
        set
    }

    /// Whether `user` holds `acl` in this group.
    pub fn has(&self, user: &str, acl: GroupAcl) -> bool {
        self.map.get(user).is_some_and(|m| m.contains_key(&acl))
    }

    /// Whether `user` holds any of the names.
    pub fn has_any(&self, user: &str, acls: impl IntoIterator<Item = GroupAcl>) -> bool {
        acls.into_iter().any(|a| self.has(user, a))
    }

    /// The entry for `(user, acl)`, if held.
    pub fn get(&self, user: &str, acl: GroupAcl) -> Option<&AclEntry> {
        self.map.get(user).and_then(|m| m.get(&acl))
    }

    /// Grant `acl` to `user` in this group.
    pub fn add(
        &mut self,
        user: &str,
        acl: GroupAcl,
        setter: Option<String>,
        reason: Option<String>,
    ) -> Result<(), AclError> {
        let entries = self.map.entry(user.to_string()).or_default();
        if entries.contains_key(&acl) {
            return Err(AclError::Exists(acl.to_string()));
        }

        let entry = AclEntry::new(setter, reason, None);
        self.sink.send(StoreOp::GroupAclAdd {
            group: self.group.clone(),
            user: user.to_string(),
            acl: acl.to_string(),
            setter: entry.setter.clone(),
            reason: entry.reason.clone(),
        });
        entries.insert(acl, entry);
        Ok(())
    }

    /// Revoke `acl` from `user` in this group.
    pub fn delete(&mut self, user: &str, acl: GroupAcl) -> Result<(), AclError> {
        let removed = self.map.get_mut(user).and_then(|m| m.remove(&acl));
        if removed.is_none() {
            return Err(AclError::DoesNotExist);
        }
        if self.map.get(user).is_some_and(BTreeMap::is_empty) {
            self.map.remove(user);
        }

        self.sink.send(StoreOp::GroupAclDel {
            group: self.group.clone(),
            user: user.to_string(),
            acl: acl.to_string(),
        });
        Ok(())
    }

    /// Drop every entry for `user` (member purge; not persisted per-verb).
    pub fn delete_all(&mut self, user: &str) {
        self.map.remove(user);
    }

    /// All `(user, acl, entry)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&str, GroupAcl, &AclEntry)> {
        self.map
            .iter()
            .flat_map(|(user, m)| m.iter().map(move |(acl, e)| (user.as_str(), *acl, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_verbs_round_trip() {
        for verb in [
            "user:auspex",
            "user:register",
            "user:revoke",
            "user:grant",
            "user:disconnect",
            "user:ban",
            "group:auspex",
            "group:register",
            "group:override",
            "group:revoke",
            "group:ban",
            "prohibit:ban",
            "prohibit:usermessage",
        ] {
            assert_eq!(verb.parse::<UserVerb>().unwrap().as_str(), verb);
        }

        assert!(matches!("user:frobnicate".parse::<UserVerb>(), Err(AclError::Value(_))));
        assert!(matches!("op".parse::<UserVerb>(), Err(AclError::Value(_))));
    }

    #[test]
    fn group_acls_round_trip() {
        for acl in ["kick", "op", "grant", "prohibit:mute", "grant:*", "grant:topic"] {
            assert_eq!(acl.parse::<GroupAcl>().unwrap().to_string(), acl);
        }

        assert!(matches!("grant:frobnicate".parse::<GroupAcl>(), Err(AclError::Value(_))));
        assert!(matches!("user:auspex".parse::<GroupAcl>(), Err(AclError::Value(_))));
    }

    #[test]
    fn grant_revoke_closure() {
        let mut set = UserAclSet::new("alice", StoreSink::disconnected());
        let before = set.has(UserVerb::UserAuspex);

        set.add(UserVerb::UserAuspex, Some("admin".into()), None).unwrap();
        assert!(set.has(UserVerb::UserAuspex));
        set.delete(UserVerb::UserAuspex).unwrap();

        assert_eq!(set.has(UserVerb::UserAuspex), before);
    }

    #[test]
    fn duplicate_add_and_missing_delete_fail() {
        let mut set = UserAclSet::new("alice", StoreSink::disconnected());
        set.add(UserVerb::UserGrant, None, None).unwrap();
        assert!(matches!(set.add(UserVerb::UserGrant, None, None), Err(AclError::Exists(_))));
        assert!(matches!(set.delete(UserVerb::UserBan), Err(AclError::DoesNotExist)));
    }

    #[test]
    fn group_set_tracks_per_user_entries() {
        let mut set = GroupAclSet::new("#room", StoreSink::disconnected());
        set.add("alice", GroupAcl::Verb(GroupVerb::Op), Some("bob".into()), None).unwrap();
        set.add("alice", GroupAcl::GrantAll, None, None).unwrap();

        assert!(set.has("alice", GroupAcl::Verb(GroupVerb::Op)));
        assert!(!set.has("bob", GroupAcl::Verb(GroupVerb::Op)));
        assert!(set.has_any(
            "alice",
            [GroupAcl::Verb(GroupVerb::Grant), GroupAcl::GrantAll],
        ));

        set.delete("alice", GroupAcl::Verb(GroupVerb::Op)).unwrap();
        assert!(!set.has("alice", GroupAcl::Verb(GroupVerb::Op)));
        assert!(matches!(
            set.delete("alice", GroupAcl::Verb(GroupVerb::Op)),
            Err(AclError::DoesNotExist)
        ));
    }

    #[test]
    fn mutations_enqueue_store_ops() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut set = UserAclSet::new("alice", StoreSink::new(tx));

        set.add(UserVerb::UserBan, Some("admin".into()), Some("spam".into())).unwrap();
        set.delete(UserVerb::UserBan).unwrap();

        match rx.try_recv().unwrap() {
            StoreOp::UserAclAdd { name, acl, setter, reason } => {
                assert_eq!(name, "alice");
                assert_eq!(acl, "user:ban");
                assert_eq!(setter.as_deref(), Some("admin"));
                assert_eq!(reason.as_deref(), Some("spam"));
            },
            other => panic!("unexpected op {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), StoreOp::UserAclDel { .. }));
    }

    #[test]
    fn populate_skips_unknown_rows() {
        let rows = vec![
            UserAclRow {
                acl: "user:auspex".into(),
                setter: None,
                reason: None,
                timestamp: 1_700_000_000,
            },
            UserAclRow { acl: "bogus:verb".into(), setter: None, reason: None, timestamp: 0 },
        ];
        let set = UserAclSet::from_rows("alice", StoreSink::disconnected(), &rows);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(UserVerb::UserAuspex).unwrap().time, 1_700_000_000);
    }

    mod closed_enumerations {
        use proptest::prelude::*;
        use proptest::sample::select;

        use super::*;

        static ALL_USER_VERBS: [UserVerb; 13] = [
            UserVerb::UserAuspex,
            UserVerb::UserRegister,
            UserVerb::UserRevoke,
            UserVerb::UserGrant,
            UserVerb::UserDisconnect,
            UserVerb::UserBan,
            UserVerb::GroupAuspex,
            UserVerb::GroupRegister,
            UserVerb::GroupOverride,
            UserVerb::GroupRevoke,
            UserVerb::GroupBan,
            UserVerb::ProhibitBan,
            UserVerb::ProhibitUsermessage,
        ];

        // The enumerations are closed: any string that parses must
        // display back to exactly itself, and any rejection must echo
        // the input.
        proptest! {
            #[test]
            fn user_verb_parsing_is_closed(s in "[a-z:*]{0,24}") {
                match s.parse::<UserVerb>() {
                    Ok(verb) => prop_assert_eq!(verb.to_string(), s),
                    Err(AclError::Value(echoed)) => prop_assert_eq!(echoed, s),
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
            }

            #[test]
            fn group_acl_parsing_is_closed(s in "[a-z:*]{0,24}") {
                match s.parse::<GroupAcl>() {
                    Ok(acl) => prop_assert_eq!(acl.to_string(), s),
                    Err(AclError::Value(echoed)) => prop_assert_eq!(echoed, s),
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
            }

            #[test]
            fn grant_revoke_closure_holds_for_every_verb(
                verb in select(&ALL_USER_VERBS[..]),
            ) {
                let mut set = UserAclSet::new("alice", StoreSink::disconnected());
                let before = set.has(verb);

                set.add(verb, None, None).unwrap();
                prop_assert!(set.has(verb));
                set.delete(verb).unwrap();

                prop_assert_eq!(set.has(verb), before);
            }
        }
    }
}
