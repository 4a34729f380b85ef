//! `signon`: authenticate a registered handle.

use async_trait::async_trait;
use tideframe_core::{SessionId, auth};
use tideframe_proto::{Frame, MAXTARGET, kval};

use crate::{
    commands::check_servpass,
    dispatcher::{Command, CommandFailure, HandlerResult},
    server::Server,
};

/// Attach a connection to a registered user.
pub struct Signon;

#[async_trait]
impl Command for Signon {
    async fn unregistered(
        &self,
        server: &mut Server,
        id: SessionId,
        frame: &Frame,
    ) -> HandlerResult {
        check_servpass(server, frame)?;

        let Some(name) = frame.first("handle").map(str::to_string) else {
            return Err(CommandFailure::reply("No handle"));
        };
        if name.len() > MAXTARGET {
            // Explicitly fatal: a handle this long can never be valid.
            return Err(CommandFailure::fatal_with(
                "Handle is too long",
                kval! { "handle" => [name.clone()] },
            ));
        }

        let resolved = match server.get_any_target(&name).await {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::error!(%err, "storage failure during signon lookup");
                None
            },
        };
        let Some(resolved) = resolved else {
            return Err(CommandFailure::reply_with(
                "You are not registered with the server",
                kval! { "handle" => [name.clone()] },
            ));
        };
        if resolved.is_group() {
            return Err(CommandFailure::reply_with(
                "Invalid handle",
                kval! { "handle" => [name.clone()] },
            ));
        }
        if resolved.is_online() {
            // Multi-session signon is stubbed; a state burst would go here.
            return Err(CommandFailure::reply_with(
                "No multiple users at the moment",
                kval! { "handle" => [name.clone()] },
            ));
        }

        let Some(password) = frame.first("password") else {
            return Err(CommandFailure::reply("No password given"));
        };
        let verified = server
            .target_user(&resolved)
            .and_then(|u| u.password_hash())
            .is_some_and(|hash| auth::verify_password(password, hash));
        if !verified {
            return Err(CommandFailure::reply("Invalid password"));
        }

        let options = frame.values("options").to_vec();
        let user = server
            .take_offline_user(resolved.key())
            .ok_or_else(|| CommandFailure::reply("Internal server error"))?;
        server.user_enter(id, user, options).await;
        Ok(())
    }
}
