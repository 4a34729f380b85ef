//! `pong`: the client answered our ping.

use async_trait::async_trait;
use tideframe_core::SessionId;
use tideframe_proto::Frame;

use crate::{
    dispatcher::{Command, HandlerResult},
    server::Server,
};

/// Mark the connection alive again.
pub struct Pong;

#[async_trait]
impl Command for Pong {
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        _user: &str,
        _frame: &Frame,
    ) -> HandlerResult {
        if let Some(session) = server.session_mut(id) {
            session.keepalive.pong();
        }
        Ok(())
    }
}
