//! Events processed by the server's single event loop.
//!
//! Transports, timers and tests all feed the same queue; the loop
//! processes events strictly in order, which is what makes lock-free
//! graph mutation safe.

use std::net::IpAddr;

use tideframe_core::SessionId;
use tokio::sync::mpsc;

use crate::session::{SessionKind, TimerName};

/// One unit of work for the server loop.
#[derive(Debug)]
pub enum ServerEvent {
    /// A transport accepted a connection.
    Accepted {
        /// Session identity assigned by the transport.
        id: SessionId,
        /// Transport kind (selects the codec and the ipc surface).
        kind: SessionKind,
        /// Peer address, when the transport has one.
        peer: Option<IpAddr>,
        /// Egress byte channel back to the socket task.
        writer: mpsc::UnboundedSender<Vec<u8>>,
    },

    /// Bytes arrived from a connection.
    Data {
        /// Originating session.
        id: SessionId,
        /// Raw bytes as read from the transport.
        bytes: Vec<u8>,
    },

    /// The peer closed the connection (or the transport failed).
    Closed {
        /// The closed session.
        id: SessionId,
    },

    /// A named per-session timer fired.
    Timer {
        /// Owning session.
        id: SessionId,
        /// Which timer.
        name: TimerName,
    },
}
