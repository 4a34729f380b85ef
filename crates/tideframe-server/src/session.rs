//! Per-connection session state.
//!
//! A session owns the ingress buffer, the egress byte channel back to its
//! socket task, named timers, keepalive state, and (once authenticated) a
//! backreference to its user by key. Sessions live in the server's
//! session table; users refer to them by id only.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use rand::Rng;
use tideframe_core::{SessionId, keepalive::Keepalive};
use tideframe_proto::{
    BinaryCodec, FrameBuffer, FrameCodec, JsonCodec, Kval, MultipartError, frame::Frame, multipart,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::events::ServerEvent;

/// Transport flavor of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Binary-codec TCP.
    Binary,
    /// JSON-codec TCP.
    Json,
    /// JSON over the local admin socket: trusted, unauthenticated.
    Ipc,
}

impl SessionKind {
    /// The codec this transport speaks.
    pub fn codec(self) -> &'static dyn FrameCodec {
        match self {
            Self::Binary => &BinaryCodec,
            Self::Json | Self::Ipc => &JsonCodec,
        }
    }

    /// Whether this is the trusted admin surface.
    pub fn is_ipc(self) -> bool {
        matches!(self, Self::Ipc)
    }
}

/// Named per-session timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    /// Pre-auth timeout: fires 60s after connect.
    Signon,
    /// Keepalive tick.
    Ping,
}

/// One live connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    kind: SessionKind,
    peer: Option<IpAddr>,
    rdns: watch::Receiver<Option<String>>,
    /// Case-folded handle of the attached user, once authenticated.
    pub user: Option<String>,
    /// Ingress bytes awaiting a terminator.
    pub buffer: FrameBuffer,
    /// Keepalive state once authenticated.
    pub keepalive: Keepalive,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    timers: HashMap<TimerName, JoinHandle<()>>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Session {
    /// A fresh session over the given transport.
    pub fn new(
        id: SessionId,
        kind: SessionKind,
        peer: Option<IpAddr>,
        rdns: watch::Receiver<Option<String>>,
        writer: mpsc::UnboundedSender<Vec<u8>>,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            kind,
            peer,
            rdns,
            user: None,
            buffer: FrameBuffer::new(),
            keepalive: Keepalive::new(),
            writer,
            timers: HashMap::new(),
            events,
        }
    }

    /// Session identity.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Transport kind.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// The codec for this transport.
    pub fn codec(&self) -> &'static dyn FrameCodec {
        self.kind.codec()
    }

    /// Peer IP, when the transport has one.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer
    }

    /// Best known host: the validated reverse-DNS name once resolution
    /// finished, the dotted quad otherwise.
    pub fn host(&self) -> String {
        if let Some(host) = self.rdns.borrow().clone() {
            return host;
        }
        self.peer.map_or_else(|| "localhost".to_string(), |ip| ip.to_string())
    }

    /// A handle on the resolution result, for callers that must wait for
    /// it (the signon burst).
    pub fn rdns_receiver(&self) -> watch::Receiver<Option<String>> {
        self.rdns.clone()
    }

    /// Serialize and write one frame. Writes to a closed transport are
    /// silently dropped.
    pub fn send(&self, source: &str, target: &str, command: &str, kval: Kval) {
        let frame = Frame::new(source, target, command, kval);
        match self.codec().serialize(&frame) {
            Ok(bytes) => {
                let _ = self.writer.send(bytes);
            },
            Err(err) => {
                tracing::warn!(session = self.id, command, %err, "dropping unserializable frame");
            },
        }
    }

    /// Transmit a payload split across multiple frames, closed by the
    /// `multipart: *` sentinel.
    pub fn send_multipart(
        &self,
        source: &str,
        target: &str,
        command: &str,
        keys: &[String],
        kval: &Kval,
        use_size: bool,
    ) -> Result<(), MultipartError> {
        let plan = multipart::plan(self.codec(), source, target, command, keys, kval, use_size)?;
        self.send(source, target, command, plan.first);
        for chunk in plan.chunks {
            self.send(source, target, command, chunk);
        }
        self.send(source, target, command, multipart::sentinel());
        Ok(())
    }

    /// Arm (or re-arm) a named timer; an existing timer with the same
    /// name is replaced.
    pub fn schedule(&mut self, name: TimerName, delay: Duration) {
        let events = self.events.clone();
        let id = self.id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ServerEvent::Timer { id, name });
        });

        if let Some(old) = self.timers.insert(name, handle) {
            old.abort();
        }
    }

    /// Arm a timer with a uniformly random delay in `[low, high]`.
    pub fn schedule_jittered(&mut self, name: TimerName, low: Duration, high: Duration) {
        let secs = rand::thread_rng().gen_range(low.as_secs_f64()..=high.as_secs_f64());
        self.schedule(name, Duration::from_secs_f64(secs));
    }

    /// Discard a named timer.
    pub fn cancel(&mut self, name: TimerName) {
        if let Some(handle) = self.timers.remove(&name) {
            handle.abort();
        }
    }

    /// Discard every timer; called on disconnect.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use tideframe_proto::kval;

    use super::*;

    fn session_pair() -> (Session, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (writer, rx) = mpsc::unbounded_channel();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            7,
            SessionKind::Json,
            None,
            crate::rdns::resolved("127.0.0.1"),
            writer,
            events,
        );
        (session, rx)
    }

    #[tokio::test]
    async fn send_serializes_with_the_session_codec() {
        let (session, mut rx) = session_pair();
        session.send("=server", "alice", "motd", kval! {});

        let bytes = rx.try_recv().expect("one frame written");
        let frame = JsonCodec.parse(&bytes).expect("valid frame");
        assert_eq!(frame.source, "=server");
        assert_eq!(frame.command, "motd");
    }

    #[tokio::test]
    async fn send_to_closed_transport_is_silently_dropped() {
        let (session, rx) = session_pair();
        drop(rx);
        session.send("=server", "alice", "motd", kval! {});
    }

    #[tokio::test]
    async fn multipart_emits_sentinel_last() {
        let (session, mut rx) = session_pair();
        let kval = kval! { "text" => ["y".repeat(4000)] };
        session
            .send_multipart("=server", "alice", "motd", &["text".to_string()], &kval, true)
            .unwrap();

        let mut frames = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            frames.push(JsonCodec.parse(&bytes).unwrap());
        }
        assert!(frames.len() >= 3);

        let first = &frames[0];
        assert_eq!(first.values("multipart"), ["text"]);
        assert_eq!(first.first("transfer-size"), Some("4000"));

        let last = frames.last().unwrap();
        assert_eq!(last.values("multipart"), ["*"]);

        let rejoined: String =
            frames[1..frames.len() - 1].iter().flat_map(|f| f.values("text")).cloned().collect();
        assert_eq!(rejoined, "y".repeat(4000));
    }

    #[tokio::test]
    async fn timers_fire_and_cancel() {
        let (writer, _rx) = mpsc::unbounded_channel();
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let mut session = Session::new(
            3,
            SessionKind::Binary,
            None,
            crate::rdns::resolved("127.0.0.1"),
            writer,
            events,
        );

        session.schedule(TimerName::Ping, Duration::from_millis(10));
        match tokio::time::timeout(Duration::from_secs(1), events_rx.recv()).await {
            Ok(Some(ServerEvent::Timer { id, name })) => {
                assert_eq!(id, 3);
                assert_eq!(name, TimerName::Ping);
            },
            other => panic!("expected timer event, got {other:?}"),
        }

        // A cancelled timer never fires.
        session.schedule(TimerName::Signon, Duration::from_millis(10));
        session.cancel(TimerName::Signon);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events_rx.try_recv().is_err());
    }
}
