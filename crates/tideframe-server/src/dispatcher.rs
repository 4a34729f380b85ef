//! Command dispatch.
//!
//! A registry maps command names to handler objects. Each handler
//! declares three entry points; the one invoked depends on the
//! connection kind (unauthenticated, authenticated, or admin ipc), and
//! an entry point a command does not implement reports itself as a
//! command error rather than doing anything reflective.
//!
//! Handler failures are mapped to protocol `error` frames here: domain
//! errors become non-fatal errors with their display text as the reason;
//! storage failures in write paths are logged and surface as "Internal
//! server error"; only failures a handler explicitly marks fatal close
//! the connection.

use std::collections::HashMap;

use async_trait::async_trait;
use tideframe_core::{AclError, CommandError, GroupError, PropertyError, SessionId, UserError};
use tideframe_proto::{Frame, Kval};

use crate::{commands, server::Server, storage::StorageError};

/// Why a handler gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandFailure {
    /// Routing/authorization failure.
    Command(CommandError),
    /// User-domain failure.
    User(UserError),
    /// Group-domain failure.
    Group(GroupError),
    /// ACL set-layer failure.
    Acl(AclError),
    /// Property set-layer failure.
    Property(PropertyError),
    /// Storage failure on a write path.
    Storage(StorageError),
    /// A plain protocol error with optional context keys.
    Reply {
        /// Reason text sent to the client.
        reason: String,
        /// Extra keys merged into the error frame.
        extargs: Option<Kval>,
    },
    /// A protocol error that closes the connection.
    Fatal {
        /// Reason text sent before closing.
        reason: String,
        /// Extra keys merged into the error frame.
        extargs: Option<Kval>,
    },
}

impl CommandFailure {
    /// A non-fatal protocol error.
    pub fn reply(reason: impl Into<String>) -> Self {
        Self::Reply { reason: reason.into(), extargs: None }
    }

    /// A non-fatal protocol error with context keys.
    pub fn reply_with(reason: impl Into<String>, extargs: Kval) -> Self {
        Self::Reply { reason: reason.into(), extargs: Some(extargs) }
    }

    /// A fatal protocol error.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal { reason: reason.into(), extargs: None }
    }

    /// A fatal protocol error with context keys.
    pub fn fatal_with(reason: impl Into<String>, extargs: Kval) -> Self {
        Self::Fatal { reason: reason.into(), extargs: Some(extargs) }
    }
}

impl From<CommandError> for CommandFailure {
    fn from(err: CommandError) -> Self {
        Self::Command(err)
    }
}

impl From<UserError> for CommandFailure {
    fn from(err: UserError) -> Self {
        Self::User(err)
    }
}

impl From<GroupError> for CommandFailure {
    fn from(err: GroupError) -> Self {
        Self::Group(err)
    }
}

impl From<AclError> for CommandFailure {
    fn from(err: AclError) -> Self {
        Self::Acl(err)
    }
}

impl From<PropertyError> for CommandFailure {
    fn from(err: PropertyError) -> Self {
        Self::Property(err)
    }
}

impl From<StorageError> for CommandFailure {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

/// Result of one handler invocation.
pub type HandlerResult = Result<(), CommandFailure>;

/// A command handler. Entry points default to the appropriate
/// "wrong connection state" error.
#[async_trait]
pub trait Command: Send + Sync {
    /// Invoked when the connection has no user attached.
    async fn unregistered(
        &self,
        server: &mut Server,
        id: SessionId,
        frame: &Frame,
    ) -> HandlerResult {
        let _ = (server, id, frame);
        Err(CommandError::RegisteredOnly.into())
    }

    /// Invoked when the connection has an authenticated user. `user` is
    /// the case-folded handle.
    async fn registered(
        &self,
        server: &mut Server,
        id: SessionId,
        user: &str,
        frame: &Frame,
    ) -> HandlerResult {
        let _ = (server, id, user, frame);
        Err(CommandError::UnregisteredOnly.into())
    }

    /// Invoked on the trusted local admin socket.
    async fn ipc(&self, server: &mut Server, id: SessionId, frame: &Frame) -> HandlerResult {
        let _ = (server, id, frame);
        Err(CommandError::NotImplemented.into())
    }
}

/// The command registry.
pub struct Registry {
    map: HashMap<&'static str, Box<dyn Command>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// The full command surface.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        commands::install(&mut registry);
        registry
    }

    /// Register a handler under its command name.
    pub fn insert(&mut self, name: &'static str, handler: Box<dyn Command>) {
        self.map.insert(name, handler);
    }

    /// Known command names.
    pub fn commands(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.map.keys().copied()
    }

    /// Route one frame to its handler and surface any failure as a
    /// protocol error.
    pub async fn dispatch(&self, server: &mut Server, id: SessionId, frame: Frame) {
        let Some(handler) = self.map.get(frame.command.as_str()) else {
            server.error(id, &frame.command, "No such command", false, None);
            return;
        };

        let (is_ipc, user) = match server.session(id) {
            Some(session) => (session.kind().is_ipc(), session.user.clone()),
            None => return,
        };

        let result = if is_ipc {
            handler.ipc(server, id, &frame).await
        } else if let Some(user) = user {
            handler.registered(server, id, &user, &frame).await
        } else {
            handler.unregistered(server, id, &frame).await
        };

        let failure = match result {
            Ok(()) => return,
            Err(failure) => failure,
        };

        match failure {
            CommandFailure::Reply { reason, extargs } => {
                server.error(id, &frame.command, &reason, false, extargs);
            },
            CommandFailure::Fatal { reason, extargs } => {
                server.error(id, &frame.command, &reason, true, extargs);
            },
            CommandFailure::Command(err) => {
                server.error(id, &frame.command, &err.to_string(), false, None);
            },
            CommandFailure::User(err) => {
                server.error(id, &frame.command, &err.to_string(), false, None);
            },
            CommandFailure::Group(err) => {
                server.error(id, &frame.command, &err.to_string(), false, None);
            },
            CommandFailure::Acl(err) => {
                server.error(id, &frame.command, &err.to_string(), false, None);
            },
            CommandFailure::Property(err) => {
                server.error(id, &frame.command, &err.to_string(), false, None);
            },
            CommandFailure::Storage(err) => {
                tracing::error!(command = %frame.command, %err, "storage failure in handler");
                server.error(id, &frame.command, "Internal server error", false, None);
            },
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}
