//! `acl-set`, `acl-del` and `acl-list`.
//!
//! Target resolution: a `#`-prefixed target is a group and requires an
//! explicit `user` key naming the member whose ACLs change; anything
//! else is a user target. The grant check gates mutation: on a group the
//! setter must be a member holding `grant`, `grant:*` or a matching
//! `grant:<verb>`; on a user the setter must hold `user:grant` plus
//! every verb being granted.

use async_trait::async_trait;
use tideframe_core::{
    SessionId,
    acl::{GroupAcl, GroupVerb, UserVerb},
};
use tideframe_proto::{Frame, Kval, kval, target};

use crate::{
    dispatcher::{Command, CommandFailure, HandlerResult},
    server::{Server, TargetRef},
};

enum AclTarget {
    Group {
        group: TargetRef,
        /// The member whose entries change; optional for listings.
        member: Option<TargetRef>,
        verbs: Vec<GroupAcl>,
    },
    User {
        user: TargetRef,
        verbs: Vec<UserVerb>,
    },
}

struct Resolved {
    target: AclTarget,
    kwds: Kval,
}

// Read path: a storage failure here surfaces as a missing target, not
// an internal error.
async fn lookup(server: &mut Server, name: &str) -> Option<TargetRef> {
    match server.get_any_target(name).await {
        Ok(found) => found,
        Err(err) => {
            tracing::error!(%err, "storage failure during ACL lookup");
            None
        },
    }
}

/// Resolve the frame's target(s). `mutation` demands both the `acl`
/// values and, for group targets, an explicit `user` key; listings need
/// neither.
async fn resolve(
    server: &mut Server,
    frame: &Frame,
    mutation: bool,
) -> Result<Resolved, CommandFailure> {
    let acls: Vec<String> = frame.values("acl").iter().map(|a| a.to_lowercase()).collect();
    if mutation && acls.is_empty() {
        return Err(CommandFailure::reply_with(
            "No ACL",
            kval! { "target" => [frame.target.clone()] },
        ));
    }

    let name = frame.target.clone();
    if target::is_wildcard(&name) {
        let mut extargs = Kval::new();
        extargs.insert("acl".to_string(), acls.clone());
        return Err(CommandFailure::reply_with("No valid target", extargs));
    }
    if target::is_server(&name) || target::is_remote(&name) {
        return Err(CommandFailure::reply_with(
            "ACLs can't be set on servers yet",
            kval! { "target" => [name.clone()] },
        ));
    }

    let bad_acl = |acls: &[String]| {
        let mut extargs = kval! { "target" => [frame.target.clone()] };
        extargs.insert("acl".to_string(), acls.to_vec());
        CommandFailure::reply_with("Invalid ACL", extargs)
    };
    let no_target = |shown: &str| {
        CommandFailure::reply_with("No such target", kval! { "target" => [shown] })
    };

    if target::is_group(&name) {
        let mut verbs = Vec::with_capacity(acls.len());
        for acl in &acls {
            verbs.push(acl.parse::<GroupAcl>().map_err(|_| bad_acl(&acls))?);
        }

        let group = lookup(server, &name)
            .await
            .filter(TargetRef::is_group)
            .ok_or_else(|| no_target(&name))?;

        let member = match frame.first("user").map(str::to_string) {
            Some(member_name) => {
                let member = lookup(server, &member_name)
                    .await
                    .filter(|r| !r.is_group())
                    .ok_or_else(|| no_target(&member_name))?;
                Some((member, member_name))
            },
            None if mutation => {
                let mut extargs = kval! { "target" => [name.clone()] };
                extargs.insert("acl".to_string(), acls);
                return Err(CommandFailure::reply_with("No valid user for target", extargs));
            },
            None => None,
        };

        let group_display = server
            .target_group(&group)
            .map_or_else(|| name.clone(), |g| g.name().to_string());
        let mut kwds = kval! { "target" => [group_display] };
        let member = member.map(|(member, member_name)| {
            let display = server
                .target_user(&member)
                .map_or_else(|| member_name.clone(), |u| u.name().to_string());
            kwds.insert("user".to_string(), vec![display]);
            member
        });

        Ok(Resolved { target: AclTarget::Group { group, member, verbs }, kwds })
    } else {
        let mut verbs = Vec::with_capacity(acls.len());
        for acl in &acls {
            verbs.push(acl.parse::<UserVerb>().map_err(|_| bad_acl(&acls))?);
        }

        let user = lookup(server, &name)
            .await
            .filter(|r| !r.is_group())
            .ok_or_else(|| no_target(&name))?;
        let display = server
            .target_user(&user)
            .map_or_else(|| name.clone(), |u| u.name().to_string());

        Ok(Resolved {
            target: AclTarget::User { user, verbs },
            kwds: kval! { "target" => [display] },
        })
    }
}

fn check_grant(
    server: &Server,
    setter: &str,
    resolved: &Resolved,
) -> Result<(), CommandFailure> {
    match &resolved.target {
        AclTarget::Group { group, verbs, .. } => {
            let Some(group) = server.target_group(group) else {
                return Err(CommandFailure::reply("No such target"));
            };
            if !group.members.contains(setter) {
                return Err(CommandFailure::reply("Must be in group to alter ACLs in it"));
            }

            let mut check = vec![GroupAcl::Verb(GroupVerb::Grant), GroupAcl::GrantAll];
            for verb in verbs {
                if let GroupAcl::Verb(v) = verb {
                    check.push(GroupAcl::GrantOf(*v));
                }
            }
            if !group.acl.has_any(setter, check) {
                return Err(CommandFailure::reply("No permission to alter ACL"));
            }
        },
        AclTarget::User { verbs, .. } => {
            let Some(setter) = server.online_user(setter) else {
                return Err(CommandFailure::reply("No permission to alter ACL"));
            };
            let permitted = setter.acl.has(UserVerb::UserGrant)
                && verbs.iter().all(|v| setter.acl.has(*v));
            if !permitted {
                return Err(CommandFailure::reply("No permission to alter ACL"));
            }
        },
    }
    Ok(())
}

fn kwds_with_reason(resolved: &Resolved, frame: &Frame) -> Kval {
    let mut kwds = resolved.kwds.clone();
    if let Some(reason) = frame.first("reason") {
        kwds.insert("reason".to_string(), vec![reason.to_string()]);
    }
    kwds
}

enum Mutation {
    Add,
    Delete,
}

fn mutate(
    server: &mut Server,
    resolved: &Resolved,
    setter: Option<String>,
    reason: Option<String>,
    mutation: &Mutation,
) -> Result<(), CommandFailure> {
    match &resolved.target {
        AclTarget::Group { group, member, verbs } => {
            let Some(member) = member else {
                return Err(CommandFailure::reply("No valid user for target"));
            };
            let member_key = member.key().to_string();
            let Some(group) = server.target_group_mut(group) else {
                return Err(CommandFailure::reply("No such target"));
            };
            for verb in verbs {
                match mutation {
                    Mutation::Add => group
                        .acl
                        .add(&member_key, *verb, setter.clone(), reason.clone())
                        .map_err(|e| CommandFailure::reply(format!("Error adding ACL: {e}")))?,
                    Mutation::Delete => group
                        .acl
                        .delete(&member_key, *verb)
                        .map_err(|e| CommandFailure::reply(format!("Error deleting ACL: {e}")))?,
                }
            }
        },
        AclTarget::User { user, verbs } => {
            let Some(user) = server.target_user_mut(user) else {
                return Err(CommandFailure::reply("No such target"));
            };
            for verb in verbs {
                match mutation {
                    Mutation::Add => user
                        .acl
                        .add(*verb, setter.clone(), reason.clone())
                        .map_err(|e| CommandFailure::reply(format!("Error adding ACL: {e}")))?,
                    Mutation::Delete => user
                        .acl
                        .delete(*verb)
                        .map_err(|e| CommandFailure::reply(format!("Error deleting ACL: {e}")))?,
                }
            }
        },
    }
    Ok(())
}

/// Tell the affected parties (and the setter) about the change.
fn report(
    server: &Server,
    id: SessionId,
    setter: Option<&str>,
    resolved: &Resolved,
    command: &str,
    kwds: &Kval,
) {
    let source = server.server_addr();
    match &resolved.target {
        AclTarget::Group { group, member, .. } => {
            let target = member.as_ref().map_or_else(
                || server.group(group.key()).map_or_else(|| "*".to_string(), |g| g.name().to_string()),
                |m| server.user_display(m.key()),
            );
            server.broadcast_group(group.key(), &source, &target, command, kwds, None);
        },
        AclTarget::User { user, .. } => {
            let display = server.user_display(user.key());
            server.send_to_user(user.key(), &source, &display, command, kwds);
        },
    }

    match setter {
        Some(setter) => {
            let display = server.user_display(setter);
            server.send_to_user(setter, &source, &display, command, kwds);
        },
        None => server.send_to_session(id, &source, "*", command, kwds.clone()),
    }
}

/// Grant ACL verbs on a user or group.
pub struct AclSet;

#[async_trait]
impl Command for AclSet {
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let resolved = resolve(server, frame, true).await?;
        check_grant(server, user, &resolved)?;

        let kwds = kwds_with_reason(&resolved, frame);
        let setter = server.user_display(user);
        let reason = frame.first("reason").map(str::to_string);
        mutate(server, &resolved, Some(setter), reason, &Mutation::Add)?;
        report(server, id, Some(user), &resolved, &frame.command, &kwds);
        Ok(())
    }

    async fn ipc(&self, server: &mut Server, id: SessionId, frame: &Frame) -> HandlerResult {
        let resolved = resolve(server, frame, true).await?;
        let kwds = kwds_with_reason(&resolved, frame);
        let reason = frame.first("reason").map(str::to_string);
        mutate(server, &resolved, None, reason, &Mutation::Add)?;
        report(server, id, None, &resolved, &frame.command, &kwds);
        Ok(())
    }
}

/// Revoke ACL verbs from a user or group.
pub struct AclDel;

#[async_trait]
impl Command for AclDel {
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let resolved = resolve(server, frame, true).await?;
        check_grant(server, user, &resolved)?;

        let kwds = kwds_with_reason(&resolved, frame);
        mutate(server, &resolved, None, None, &Mutation::Delete)?;
        report(server, id, Some(user), &resolved, &frame.command, &kwds);
        Ok(())
    }

    async fn ipc(&self, server: &mut Server, id: SessionId, frame: &Frame) -> HandlerResult {
        let resolved = resolve(server, frame, true).await?;
        let kwds = kwds_with_reason(&resolved, frame);
        mutate(server, &resolved, None, None, &Mutation::Delete)?;
        report(server, id, None, &resolved, &frame.command, &kwds);
        Ok(())
    }
}

fn listing(server: &Server, resolved: &Resolved) -> Kval {
    let mut kwds = resolved.kwds.clone();
    let mut acls = Vec::new();
    let mut users = Vec::new();
    let mut timestamps = Vec::new();
    let mut setters = Vec::new();

    match &resolved.target {
        AclTarget::Group { group, .. } => {
            if let Some(group) = server.target_group(group) {
                for (member, acl, entry) in group.acl.iter() {
                    users.push(member.to_string());
                    acls.push(acl.to_string());
                    timestamps.push(entry.time.to_string());
                    setters.push(entry.setter.clone().unwrap_or_else(|| "*".to_string()));
                }
            }
            kwds.insert("user".to_string(), users);
        },
        AclTarget::User { user, .. } => {
            if let Some(user) = server.target_user(user) {
                for (verb, entry) in user.acl.iter() {
                    acls.push(verb.to_string());
                    timestamps.push(entry.time.to_string());
                    setters.push(entry.setter.clone().unwrap_or_else(|| "*".to_string()));
                }
            }
        },
    }

    kwds.insert("acl".to_string(), acls);
    kwds.insert("timestamp".to_string(), timestamps);
    kwds.insert("setter".to_string(), setters);
    kwds
}

const LIST_KEYS: [&str; 4] = ["acl", "timestamp", "setter", "user"];

fn send_listing(server: &Server, id: SessionId, target: &str, command: &str, kwds: &Kval) {
    let source = server.server_addr();
    let keys: Vec<String> = LIST_KEYS
        .iter()
        .filter(|k| kwds.contains_key(**k))
        .map(|k| (*k).to_string())
        .collect();
    if let Some(session) = server.session(id) {
        if let Err(err) = session.send_multipart(&source, target, command, &keys, kwds, false) {
            tracing::warn!(%err, "could not send ACL listing");
        }
    }
}

/// List the ACL entries of a user or group.
pub struct AclList;

#[async_trait]
impl Command for AclList {
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let resolved = resolve(server, frame, false).await?;

        // Group listings are member-visible; user listings need grant
        // authority unless the caller asks about themselves.
        match &resolved.target {
            AclTarget::Group { .. } => {},
            AclTarget::User { user: listed, .. } => {
                if listed.key() != user {
                    check_grant(server, user, &resolved)?;
                }
            },
        }

        let kwds = listing(server, &resolved);
        let display = server.user_display(user);
        send_listing(server, id, &display, &frame.command, &kwds);
        Ok(())
    }

    async fn ipc(&self, server: &mut Server, id: SessionId, frame: &Frame) -> HandlerResult {
        let resolved = resolve(server, frame, false).await?;
        let kwds = listing(server, &resolved);
        send_listing(server, id, "*", &frame.command, &kwds);
        Ok(())
    }
}
