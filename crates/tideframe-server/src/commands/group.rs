//! `group-enter` and `group-exit`.

use async_trait::async_trait;
use tideframe_core::{Group, SessionId};
use tideframe_proto::{Frame, MAXTARGET, kval, target};

use crate::{
    dispatcher::{Command, CommandFailure, HandlerResult},
    server::{Server, TargetRef},
};

/// Join a group, creating it on first join.
pub struct GroupEnter;

#[async_trait]
impl Command for GroupEnter {
    async fn registered(
        &self,
        server: &mut Server,
        _id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let name = frame.target.clone();
        if target::is_wildcard(&name) {
            return Err(CommandFailure::reply("No valid target"));
        }
        if !target::is_group(&name) {
            return Err(CommandFailure::reply_with(
                "Invalid group",
                kval! { "target" => [name.clone()] },
            ));
        }
        if name.len() > MAXTARGET {
            return Err(CommandFailure::reply_with(
                "Group name too long",
                kval! { "target" => [name.clone()] },
            ));
        }

        let key = target::fold(&name);
        if server.group(&key).is_none() {
            match server.get_any_target(&key).await? {
                Some(TargetRef::GroupOffline(_)) => {
                    server.promote_group(&key);
                },
                None => {
                    tracing::info!(group = %key, "creating group");
                    let group = Group::new(&name, server.sink());
                    server.storage().group_add(&key, None).await?;
                    server.invalidate_targets();
                    server.insert_group(group);
                },
                Some(_) => {
                    return Err(CommandFailure::reply_with(
                        "Invalid group",
                        kval! { "target" => [name.clone()] },
                    ));
                },
            }
        }

        let already = server.group(&key).is_some_and(|g| g.members.contains(user));
        if already {
            return Err(CommandFailure::reply_with(
                "You are already entered",
                kval! { "target" => [name.clone()] },
            ));
        }

        let reason = frame.first("reason").map(str::to_string);
        server.group_join(&key, user, reason)?;
        Ok(())
    }
}

/// Leave a group.
pub struct GroupExit;

#[async_trait]
impl Command for GroupExit {
    async fn registered(
        &self,
        server: &mut Server,
        _id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let name = frame.target.clone();
        if target::is_wildcard(&name) {
            return Err(CommandFailure::reply("No valid target"));
        }

        let key = target::fold(&name);
        if !target::is_group(&name) || server.group(&key).is_none() {
            return Err(CommandFailure::reply_with(
                "Invalid group",
                kval! { "target" => [name.clone()] },
            ));
        }

        let member = server.group(&key).is_some_and(|g| g.members.contains(user));
        if !member {
            return Err(CommandFailure::reply_with(
                "You are not in that group",
                kval! { "target" => [name.clone()] },
            ));
        }

        let reason = frame.first("reason").map(str::to_string);
        server.group_part(&key, user, reason)?;
        Ok(())
    }
}
