//! `property-set`, `property-del` and `property-list`.

use async_trait::async_trait;
use tideframe_core::{
    SessionId,
    acl::{GroupAcl, GroupVerb, UserVerb},
};
use tideframe_proto::{Frame, Kval, kval};

use crate::{
    dispatcher::{Command, CommandFailure, HandlerResult},
    server::{Server, TargetRef},
};

async fn resolve(server: &mut Server, frame: &Frame) -> Result<TargetRef, CommandFailure> {
    let resolved = match server.get_any_target(&frame.target).await {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::error!(%err, "storage failure during property lookup");
            None
        },
    };
    resolved.ok_or_else(|| {
        CommandFailure::reply_with("Invalid target", kval! { "target" => [frame.target.clone()] })
    })
}

fn named_properties(frame: &Frame) -> Result<Vec<String>, CommandFailure> {
    let properties = frame.values("property").to_vec();
    if properties.is_empty() {
        return Err(CommandFailure::reply_with(
            "No property specified",
            kval! { "target" => [frame.target.clone()] },
        ));
    }
    Ok(properties)
}

/// Mutating properties on a group requires grant authority over
/// `property`; on a user it requires self or `user:grant`.
fn check_mutate(
    server: &Server,
    caller: &str,
    resolved: &TargetRef,
    frame: &Frame,
) -> Result<(), CommandFailure> {
    let denied = || {
        let mut extargs = kval! { "target" => [frame.target.clone()] };
        extargs.insert("property".to_string(), frame.values("property").to_vec());
        CommandFailure::reply_with("No permission", extargs)
    };

    match resolved {
        TargetRef::GroupOnline(_) | TargetRef::GroupOffline(_) => {
            let Some(group) = server.target_group(resolved) else { return Err(denied()) };
            let allowed = group.members.contains(caller)
                && group.acl.has_any(caller, [
                    GroupAcl::Verb(GroupVerb::Grant),
                    GroupAcl::GrantAll,
                    GroupAcl::GrantOf(GroupVerb::Property),
                ]);
            if !allowed {
                return Err(denied());
            }
        },
        TargetRef::UserOnline(_) | TargetRef::UserOffline(_) => {
            if resolved.key() != caller {
                let permitted = server
                    .online_user(caller)
                    .is_some_and(|u| u.acl.has(UserVerb::UserGrant));
                if !permitted {
                    return Err(denied());
                }
            }
        },
    }
    Ok(())
}

/// Echo the mutation to the target (group members or user sessions) and
/// the caller.
fn report(server: &Server, resolved: &TargetRef, caller: &str, frame: &Frame) {
    let display = server.user_display(caller);
    match resolved {
        TargetRef::GroupOnline(key) => {
            let group_name =
                server.group(key).map_or_else(|| key.clone(), |g| g.name().to_string());
            server.broadcast_group(key, &display, &group_name, &frame.command, &frame.kval, None);
        },
        TargetRef::UserOnline(key) => {
            let target_name = server.user_display(key);
            server.send_to_user(key, &display, &target_name, &frame.command, &frame.kval);
        },
        _ => {},
    }

    if resolved.key() != caller {
        server.send_to_user(caller, &display, &display, &frame.command, &frame.kval);
    }
}

/// Set properties on a user or group.
pub struct PropertySet;

#[async_trait]
impl Command for PropertySet {
    async fn registered(
        &self,
        server: &mut Server,
        _id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let properties = named_properties(frame)?;
        let values = frame.values("value").to_vec();
        if !values.is_empty() && values.len() != properties.len() {
            let mut extargs = kval! { "target" => [frame.target.clone()] };
            extargs.insert("property".to_string(), properties);
            return Err(CommandFailure::reply_with("Property-value length mismatch", extargs));
        }

        let resolved = resolve(server, frame).await?;
        check_mutate(server, user, &resolved, frame)?;

        let setter = server.user_display(user);
        for (i, property) in properties.iter().enumerate() {
            let value = values.get(i).map(String::as_str);
            let result = if resolved.is_group() {
                server
                    .target_group_mut(&resolved)
                    .map(|g| g.properties.add_or_set(property, value, Some(setter.clone())))
            } else {
                server
                    .target_user_mut(&resolved)
                    .map(|u| u.properties.add_or_set(property, value, Some(setter.clone())))
            };
            match result {
                Some(Ok(())) => {},
                Some(Err(err)) => {
                    let mut extargs = kval! { "target" => [frame.target.clone()] };
                    extargs.insert("property".to_string(), properties.clone());
                    return Err(CommandFailure::reply_with(
                        format!("Error setting property: {err}"),
                        extargs,
                    ));
                },
                None => return Err(CommandFailure::reply("Invalid target")),
            }
        }

        report(server, &resolved, user, frame);
        Ok(())
    }
}

/// Delete properties from a user or group.
pub struct PropertyDel;

#[async_trait]
impl Command for PropertyDel {
    async fn registered(
        &self,
        server: &mut Server,
        _id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let properties = named_properties(frame)?;
        let resolved = resolve(server, frame).await?;
        check_mutate(server, user, &resolved, frame)?;

        for property in &properties {
            let result = if resolved.is_group() {
                server.target_group_mut(&resolved).map(|g| g.properties.delete(property))
            } else {
                server.target_user_mut(&resolved).map(|u| u.properties.delete(property))
            };
            match result {
                Some(Ok(())) => {},
                Some(Err(err)) => {
                    let mut extargs = kval! { "target" => [frame.target.clone()] };
                    extargs.insert("property".to_string(), properties.clone());
                    return Err(CommandFailure::reply_with(
                        format!("Error revoking property: {err}"),
                        extargs,
                    ));
                },
                None => return Err(CommandFailure::reply("Invalid target")),
            }
        }

        report(server, &resolved, user, frame);
        Ok(())
    }
}

/// List the properties of a user or group.
pub struct PropertyList;

#[async_trait]
impl Command for PropertyList {
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let resolved = resolve(server, frame).await?;

        // Visibility: membership or group:auspex for groups; self or
        // user:auspex for users.
        let caller = server.online_user(user);
        let visible = if resolved.is_group() {
            let member = server
                .target_group(&resolved)
                .is_some_and(|g| g.members.contains(user));
            member || caller.is_some_and(|u| u.acl.has(UserVerb::GroupAuspex))
        } else {
            resolved.key() == user || caller.is_some_and(|u| u.acl.has(UserVerb::UserAuspex))
        };
        if !visible {
            return Err(CommandFailure::reply_with(
                "No permission",
                kval! { "target" => [frame.target.clone()] },
            ));
        }

        let mut names = Vec::new();
        let mut values = Vec::new();
        let mut timestamps = Vec::new();
        let mut setters = Vec::new();
        let entries: Vec<_> = if resolved.is_group() {
            server
                .target_group(&resolved)
                .map(|g| {
                    g.properties.iter().map(|(n, e)| (n.to_string(), e.clone())).collect()
                })
                .unwrap_or_default()
        } else {
            server
                .target_user(&resolved)
                .map(|u| {
                    u.properties.iter().map(|(n, e)| (n.to_string(), e.clone())).collect()
                })
                .unwrap_or_default()
        };
        for (name, entry) in entries {
            names.push(name);
            values.push(entry.value.as_wire());
            timestamps.push(entry.time.to_string());
            setters.push(entry.setter.unwrap_or_else(|| "*".to_string()));
        }

        let mut kwds: Kval = kval! { "target" => [frame.target.clone()] };
        kwds.insert("property".to_string(), names);
        kwds.insert("value".to_string(), values);
        kwds.insert("timestamp".to_string(), timestamps);
        kwds.insert("setter".to_string(), setters);

        let source = server.server_addr();
        let display = server.user_display(user);
        let keys = vec!["property".to_string(), "value".to_string()];
        if let Some(session) = server.session(id) {
            if let Err(err) =
                session.send_multipart(&source, &display, &frame.command, &keys, &kwds, false)
            {
                tracing::warn!(%err, "could not send property listing");
            }
        }
        Ok(())
    }
}
