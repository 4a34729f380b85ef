//! Write-through persistence queue and storage row shapes.
//!
//! Entity sets mutate memory synchronously and enqueue a [`StoreOp`] on
//! their [`StoreSink`]; the server's persister task drains the queue and
//! applies each op through the async storage façade. Write paths therefore
//! never suspend, and a storage failure never corrupts the in-memory
//! graph (it is logged and surfaced separately).
//!
//! The row structs are the shapes storage backends produce and consume;
//! they mirror the relational schema's logical columns.

use tokio::sync::mpsc;

/// A persisted user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    /// Case-folded handle.
    pub name: String,
    /// Display name.
    pub gecos: String,
    /// Salted password hash (PHC string); never plaintext.
    pub password: Option<String>,
    /// Creation time, seconds since the epoch.
    pub timestamp: u64,
}

/// A persisted group row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRow {
    /// Case-folded name, `#`-prefixed.
    pub name: String,
    /// Group topic.
    pub topic: Option<String>,
    /// Creation time, seconds since the epoch.
    pub timestamp: u64,
}

/// A persisted user-scope ACL row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAclRow {
    /// The ACL verb.
    pub acl: String,
    /// Handle of the granting user.
    pub setter: Option<String>,
    /// Free-form reason.
    pub reason: Option<String>,
    /// Grant time, seconds since the epoch.
    pub timestamp: u64,
}

/// A persisted group-scope ACL row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAclRow {
    /// The ACL verb.
    pub acl: String,
    /// Handle of the user the ACL applies to.
    pub target: String,
    /// Handle of the granting user.
    pub setter: Option<String>,
    /// Free-form reason.
    pub reason: Option<String>,
    /// Grant time, seconds since the epoch.
    pub timestamp: u64,
}

/// A persisted property row (user- or group-scoped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRow {
    /// Property name.
    pub property: String,
    /// Typed value in string form; `None` for flag properties.
    pub value: Option<String>,
    /// Handle of the setting user.
    pub setter: Option<String>,
    /// Set time, seconds since the epoch.
    pub timestamp: u64,
}

/// A persisted user-roster row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterUserRow {
    /// Case-folded target handle.
    pub target: String,
    /// Display alias.
    pub alias: Option<String>,
    /// Owner-chosen grouping tag.
    pub group_tag: Option<String>,
    /// Friend request not yet accepted.
    pub pending: bool,
    /// Target is blocked.
    pub blocked: bool,
}

/// A persisted group-roster row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterGroupRow {
    /// Case-folded target group name.
    pub target: String,
    /// Display alias.
    pub alias: Option<String>,
    /// Owner-chosen grouping tag.
    pub group_tag: Option<String>,
}

/// One queued write-through operation.
///
/// Creations (users, groups) are not here: they are awaited through the
/// storage façade by their handlers so failures can be reported to the
/// client before anything is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum StoreOp {
    UserSet { name: String, gecos: Option<String>, password: Option<String> },
    UserAclAdd { name: String, acl: String, setter: Option<String>, reason: Option<String> },
    UserAclDel { name: String, acl: String },
    GroupSet { name: String, topic: Option<String> },
    GroupAclAdd {
        group: String,
        user: String,
        acl: String,
        setter: Option<String>,
        reason: Option<String>,
    },
    GroupAclDel { group: String, user: String, acl: String },
    UserPropertySet {
        name: String,
        property: String,
        value: Option<String>,
        setter: Option<String>,
    },
    UserPropertyDel { name: String, property: String },
    GroupPropertySet {
        group: String,
        property: String,
        value: Option<String>,
        setter: Option<String>,
    },
    GroupPropertyDel { group: String, property: String },
    RosterUserAdd {
        owner: String,
        target: String,
        alias: Option<String>,
        group_tag: Option<String>,
        pending: bool,
    },
    RosterUserSet {
        owner: String,
        target: String,
        alias: Option<String>,
        group_tag: Option<String>,
        pending: Option<bool>,
        blocked: Option<bool>,
    },
    RosterUserDel { owner: String, target: String },
    RosterGroupAdd {
        owner: String,
        target: String,
        alias: Option<String>,
        group_tag: Option<String>,
    },
    RosterGroupSet {
        owner: String,
        target: String,
        alias: Option<String>,
        group_tag: Option<String>,
    },
    RosterGroupDel { owner: String, target: String },
}

/// Handle for enqueueing write-through operations.
///
/// Sending never blocks and never fails loudly: if the persister is gone
/// (shutdown, tests), the op is dropped with a debug log.
#[derive(Debug, Clone)]
pub struct StoreSink {
    tx: Option<mpsc::UnboundedSender<StoreOp>>,
}

impl StoreSink {
    /// A sink feeding the given queue.
    pub fn new(tx: mpsc::UnboundedSender<StoreOp>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards every op. For ephemeral entities and tests.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Enqueue one operation.
    pub fn send(&self, op: StoreOp) {
        if let Some(tx) = &self.tx {
            if tx.send(op).is_err() {
                tracing::debug!("store sink closed, dropping write-through op");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_delivers_ops_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = StoreSink::new(tx);

        sink.send(StoreOp::UserSet {
            name: "alice".into(),
            gecos: Some("Alice".into()),
            password: None,
        });
        sink.send(StoreOp::UserAclDel { name: "alice".into(), acl: "user:ban".into() });

        assert!(matches!(rx.try_recv(), Ok(StoreOp::UserSet { .. })));
        assert!(matches!(rx.try_recv(), Ok(StoreOp::UserAclDel { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnected_sink_drops_silently() {
        StoreSink::disconnected().send(StoreOp::UserPropertyDel {
            name: "alice".into(),
            property: "private".into(),
        });
    }
}
