//! `register` and `fregister`.

use async_trait::async_trait;
use tideframe_core::{SessionId, acl::UserVerb};
use tideframe_proto::{Frame, kval};

use crate::{
    commands::check_servpass,
    dispatcher::{Command, CommandFailure, HandlerResult},
    server::Server,
};

fn ack(server: &Server, id: SessionId, frame: &Frame, name: &str, gecos: &str, message: &str) {
    let source = server.server_addr();
    let kval = kval! {
        "handle" => [name],
        "gecos" => [gecos],
        "message" => [message],
    };
    server.send_to_session(id, &source, "*", &frame.command, kval);
}

/// Create a handle, then sign straight on.
pub struct Register;

#[async_trait]
impl Command for Register {
    async fn unregistered(
        &self,
        server: &mut Server,
        id: SessionId,
        frame: &Frame,
    ) -> HandlerResult {
        check_servpass(server, frame)?;
        if !server.config().allow_register {
            return Err(CommandFailure::reply(
                "Direct registrations are not permitted on this server",
            ));
        }

        let name = frame.first("handle").map(str::to_string);
        let gecos = frame.first("gecos").map(str::to_string);
        let password = frame.first("password").map(str::to_string);

        let user = server
            .register_user(name.as_deref(), gecos.as_deref(), password.as_deref())
            .await?;
        ack(
            server,
            id,
            frame,
            user.name(),
            user.gecos(),
            "Registration successful, beginning signon",
        );

        let options = frame.values("options").to_vec();
        server.user_enter(id, user, options).await;
        Ok(())
    }

    async fn ipc(&self, server: &mut Server, id: SessionId, frame: &Frame) -> HandlerResult {
        let name = frame.first("handle").map(str::to_string);
        let gecos = frame.first("gecos").map(str::to_string);
        let password = frame.first("password").map(str::to_string);

        let user = server
            .register_user(name.as_deref(), gecos.as_deref(), password.as_deref())
            .await?;
        ack(server, id, frame, user.name(), user.gecos(), "Registration successful");
        Ok(())
    }
}

/// Privileged registration on behalf of someone else; no transition.
pub struct FRegister;

#[async_trait]
impl Command for FRegister {
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let permitted = server
            .online_user(user)
            .is_some_and(|u| u.acl.has(UserVerb::UserRegister));
        if !permitted {
            return Err(CommandFailure::reply("No permission"));
        }

        let name = frame.first("handle").map(str::to_string);
        let gecos = frame.first("gecos").map(str::to_string);
        let password = frame.first("password").map(str::to_string);

        let created = server
            .register_user(name.as_deref(), gecos.as_deref(), password.as_deref())
            .await?;
        ack(server, id, frame, created.name(), created.gecos(), "Registration successful");
        Ok(())
    }

    async fn ipc(&self, server: &mut Server, id: SessionId, frame: &Frame) -> HandlerResult {
        let name = frame.first("handle").map(str::to_string);
        let gecos = frame.first("gecos").map(str::to_string);
        let password = frame.first("password").map(str::to_string);

        let created = server
            .register_user(name.as_deref(), gecos.as_deref(), password.as_deref())
            .await?;
        ack(server, id, frame, created.name(), created.gecos(), "Registration successful");
        Ok(())
    }
}
