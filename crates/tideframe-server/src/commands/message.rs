//! `message`: deliver a transient message to a user or group.

use async_trait::async_trait;
use tideframe_core::SessionId;
use tideframe_proto::{Frame, kval, target};

use crate::{
    dispatcher::{Command, CommandFailure, HandlerResult},
    server::{Server, TargetRef},
};

/// Fan a message out to the target's sessions or members.
pub struct Message;

#[async_trait]
impl Command for Message {
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
        if target::is_server(&name) || target::is_remote(&name) {
            // Reserved address space; routing to servers is a stub.
            return Err(CommandFailure::reply_with(
                "Cannot message servers yet, sorry",
                kval! { "target" => [name.clone()] },
            ));
        }

        let Some(resolved) = server.get_online_target(&name) else {
            return Err(CommandFailure::reply_with(
                "No such target",
                kval! { "target" => [name.clone()] },
            ));
        };

        let body = frame.values("body").to_vec();
        let mut kval = tideframe_proto::Kval::new();
        kval.insert("body".to_string(), body);

        match resolved {
            TargetRef::GroupOnline(group_key) => {
                let member = server
                    .group(&group_key)
                    .is_some_and(|g| g.members.contains(user));
                if !member {
                    return Err(CommandFailure::reply("You aren't in that group"));
                }

                let display = server.user_display(user);
                let group_name = server
                    .group(&group_key)
                    .map_or_else(|| group_key.clone(), |g| g.name().to_string());
                server.broadcast_group(&group_key, &display, &group_name, "message", &kval, Some(user));
            },
            TargetRef::UserOnline(user_key) => {
                let display = server.user_display(user);
                let target_name = server.user_display(&user_key);
                server.send_to_user(&user_key, &display, &target_name, "message", &kval);
            },
            _ => {
                return Err(CommandFailure::reply_with(
                    "No such target",
                    kval! { "target" => [frame.target.clone()] },
                ));
            },
        }
        Ok(())
    }
}
