//! Domain error types.
//!
//! The display strings double as protocol `error` reasons, so they are
//! written for the client, not the log.

use thiserror::Error;

/// A user-related failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct UserError(pub String);

/// A group-related failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// Could not add a user to a group.
    #[error("{0}")]
    Addition(String),

    /// Could not remove a user from a group.
    #[error("{0}")]
    Removal(String),
}

/// A failure routing or authorizing a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The selected entry point is not implemented for this command.
    #[error("Command not implemented")]
    NotImplemented,

    /// The caller lacks the named ACL.
    #[error("No permission (missing {0})")]
    Acl(String),

    /// The command requires an authenticated user.
    #[error("This command is for registered users only")]
    RegisteredOnly,

    /// The command is only usable before authentication.
    #[error("This command is only usable before registration")]
    UnregisteredOnly,
}

/// An ACL set-layer failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AclError {
    /// The entry already exists.
    #[error("ACL already exists: {0}")]
    Exists(String),

    /// The entry does not exist.
    #[error("ACL does not exist")]
    DoesNotExist,

    /// The verb is outside the closed enumeration.
    #[error("Invalid ACL: {0}")]
    Value(String),
}

/// A property set-layer failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    /// The entry does not exist.
    #[error("Property does not exist")]
    DoesNotExist,

    /// The property name is not recognized.
    #[error("Invalid property: {0}")]
    Invalid(String),

    /// The value could not be coerced to the property's type.
    #[error("Bad value for property {0}")]
    Value(String),
}
