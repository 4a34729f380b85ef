//! The command surface.
//!
//! One module per command family; `install` wires them all into the
//! dispatcher registry under their canonical lowercase names.

mod acl;
mod group;
mod message;
mod motd;
mod pong;
mod property;
mod register;
mod signon;
mod whois;

use crate::dispatcher::Registry;

/// Register every command handler.
pub(crate) fn install(registry: &mut Registry) {
    registry.insert("register", Box::new(register::Register));
    registry.insert("fregister", Box::new(register::FRegister));
    registry.insert("signon", Box::new(signon::Signon));
    registry.insert("message", Box::new(message::Message));
    registry.insert("group-enter", Box::new(group::GroupEnter));
    registry.insert("group-exit", Box::new(group::GroupExit));
    registry.insert("acl-set", Box::new(acl::AclSet));
    registry.insert("acl-del", Box::new(acl::AclDel));
    registry.insert("acl-list", Box::new(acl::AclList));
    registry.insert("property-set", Box::new(property::PropertySet));
    registry.insert("property-del", Box::new(property::PropertyDel));
    registry.insert("property-list", Box::new(property::PropertyList));
    registry.insert("whois", Box::new(whois::Whois));
    registry.insert("motd", Box::new(motd::Motd));
    registry.insert("pong", Box::new(pong::Pong));
}

use tideframe_core::auth;
use tideframe_proto::Frame;

use crate::dispatcher::CommandFailure;
use crate::server::Server;

/// Enforce the server password, when one is configured. Failure is
/// explicitly fatal.
pub(crate) fn check_servpass(server: &Server, frame: &Frame) -> Result<(), CommandFailure> {
    if let Some(expected) = &server.config().servpass {
        let given = frame.first("servpass").unwrap_or("*");
        if !auth::constant_time_eq(given, expected) {
            return Err(CommandFailure::fatal("Bad server password"));
        }
    }
    Ok(())
}
