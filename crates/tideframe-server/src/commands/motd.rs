//! `motd`: re-send the message of the day.

use async_trait::async_trait;
use tideframe_core::SessionId;
use tideframe_proto::Frame;

use crate::{
    dispatcher::{Command, HandlerResult},
    server::Server,
};

/// Emit the cached MOTD, multipart when oversize.
pub struct Motd;

#[async_trait]
impl Command for Motd {
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        user: &str,
        _frame: &Frame,
    ) -> HandlerResult {
        let display = server.user_display(user);
        server.motd_burst(id, &display);
        Ok(())
    }
}
