//! `whois`: inspect a user.
//!
//! Handle and gecos are public; IP, host, ACL list and the full group
//! list are disclosed only to callers holding `user:auspex`. Private
//! groups are omitted from everyone else's view.

use async_trait::async_trait;
use tideframe_core::{SessionId, acl::UserVerb};
use tideframe_proto::{Frame, Kval, MAXFRAME, kval, target};

use crate::{
    dispatcher::{Command, CommandFailure, HandlerResult},
    server::Server,
};

/// Report what is known about a user.
pub struct Whois;

#[async_trait]
impl Command for Whois {
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let name = frame.target.clone();
        if target::is_wildcard(&name) || target::is_server(&name) || target::is_group(&name) {
            return Err(CommandFailure::reply("No valid target"));
        }

        let resolved = match server.get_any_target(&name).await {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::error!(%err, "storage failure during whois lookup");
                None
            },
        };
        let Some(resolved) = resolved.filter(|r| !r.is_group()) else {
            return Err(CommandFailure::reply_with(
                "No such target",
                kval! { "target" => [name.clone()] },
            ));
        };

        let auspex = server
            .online_user(user)
            .is_some_and(|u| u.acl.has(UserVerb::UserAuspex));

        let mut kval = Kval::new();
        let mut session_ids = Vec::new();
        let mut group_keys = Vec::new();
        {
            let Some(subject) = server.target_user(&resolved) else {
                return Err(CommandFailure::reply_with(
                    "No such target",
                    kval! { "target" => [name.clone()] },
                ));
            };

            kval.insert("handle".to_string(), vec![subject.name().to_string()]);
            kval.insert("gecos".to_string(), vec![subject.gecos().to_string()]);
            if subject.is_online() {
                kval.insert("online".to_string(), vec!["*".to_string()]);
            }
            if auspex {
                let acls: Vec<String> =
                    subject.acl.iter().map(|(verb, _)| verb.to_string()).collect();
                kval.insert("acl".to_string(), acls);
                session_ids.extend(subject.sessions.iter().copied());
            }
            group_keys.extend(subject.groups.iter().cloned());
        }

        if auspex {
            let mut ips = Vec::new();
            let mut hosts = Vec::new();
            for sid in session_ids {
                if let Some(session) = server.session(sid) {
                    if let Some(ip) = session.peer_ip() {
                        ips.push(ip.to_string());
                    }
                    hosts.push(session.host());
                }
            }
            kval.insert("ip".to_string(), ips);
            kval.insert("host".to_string(), hosts);
        }

        let mut groups = Vec::new();
        for key in group_keys {
            let Some(group) = server.group(&key) else { continue };
            if group.properties.has("private") && !auspex {
                continue;
            }
            groups.push(group.name().to_string());
        }
        if !groups.is_empty() {
            kval.insert("groups".to_string(), groups);
        }

        let source = server.server_addr();
        let display = server.user_display(user);
        if server.session(id).is_none() {
            return Ok(());
        }

        let projected = server
            .session(id)
            .map(|s| s.codec().projected_len(&source, &display, &frame.command, &kval));
        if projected.is_some_and(|len| len > MAXFRAME) {
            // The bulky keys are the listings; everything else rides the
            // first frame.
            let keys = vec!["acl".to_string(), "groups".to_string()];
            if let Some(session) = server.session(id) {
                if let Err(err) =
                    session.send_multipart(&source, &display, &frame.command, &keys, &kval, false)
                {
                    tracing::warn!(%err, "could not send whois listing");
                }
            }
        } else {
            server.send_to_session(id, &source, &display, &frame.command, kval);
        }
        Ok(())
    }
}
