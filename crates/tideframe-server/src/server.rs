//! The server controller.
//!
//! Owns the online-user and group indices, the session table, the MOTD,
//! the offline-target LRU cache, and the storage handles. Everything runs
//! on one event loop: events are processed strictly in order and no
//! handler runs concurrently with another, so graph invariants hold
//! without locks. Handlers may suspend at storage reads; write paths
//! never suspend.

use std::num::NonZeroUsize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tideframe_core::{
    Group, GroupError, SessionId, StoreSink, User,
    keepalive::{KeepaliveAction, PING_HIGH, PING_LOW, PING_TIMEOUT_REASON, SIGNON_TIMEOUT},
    unix_time,
};
use tideframe_proto::{Kval, kval, target};
use tokio::sync::mpsc;

use crate::{
    config::Config,
    dispatcher::Registry,
    events::ServerEvent,
    rdns,
    session::{Session, SessionKind, TimerName},
    storage::{AsyncStorage, StorageError},
};

/// Version strings announced in the signon burst.
const VERSION: [&str; 2] = ["Tideframe server", concat!("v", env!("CARGO_PKG_VERSION"))];

/// An entity that exists but has no live sessions; kept in the LRU cache.
#[derive(Debug)]
pub enum OfflineTarget {
    /// A registered user who is not connected.
    User(User),
    /// A persisted group nobody currently occupies.
    Group(Group),
}

/// Where a resolved target lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    /// A user in the online index.
    UserOnline(String),
    /// A user inflated into the offline cache.
    UserOffline(String),
    /// A group in the live index.
    GroupOnline(String),
    /// A group inflated into the offline cache.
    GroupOffline(String),
}

impl TargetRef {
    /// The case-folded key of the target.
    pub fn key(&self) -> &str {
        match self {
            Self::UserOnline(k) | Self::UserOffline(k) | Self::GroupOnline(k)
            | Self::GroupOffline(k) => k,
        }
    }

    /// Whether the target is a group.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::GroupOnline(_) | Self::GroupOffline(_))
    }

    /// Whether the target is currently online (users) or occupied
    /// (groups).
    pub fn is_online(&self) -> bool {
        matches!(self, Self::UserOnline(_) | Self::GroupOnline(_))
    }
}

/// The protocol engine.
pub struct Server {
    name: String,
    config: Config,
    motd: Option<String>,
    online_users: HashMap<String, User>,
    groups: HashMap<String, Group>,
    sessions: HashMap<SessionId, Session>,
    offline_cache: LruCache<String, OfflineTarget>,
    storage: AsyncStorage,
    sink: StoreSink,
    registry: Arc<Registry>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Server {
    /// Build the controller. The MOTD is loaded once, here.
    pub fn new(
        config: Config,
        storage: AsyncStorage,
        sink: StoreSink,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        let motd = config.motd_path.as_ref().and_then(|path| {
            std::fs::read_to_string(path)
                .map_err(|err| tracing::warn!(%err, "could not read MOTD"))
                .ok()
        });

        let cache_size = NonZeroUsize::new(config.max_cache.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            name: config.server_name.clone(),
            motd,
            online_users: HashMap::new(),
            groups: HashMap::new(),
            sessions: HashMap::new(),
            offline_cache: LruCache::new(cache_size),
            storage,
            sink,
            registry: Arc::new(Registry::standard()),
            events,
            config,
        }
    }

    /// The server's own name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The server's protocol address, `=name`.
    pub fn server_addr(&self) -> String {
        format!("={}", self.name)
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The storage façade (suspension point for handlers).
    pub fn storage(&self) -> &AsyncStorage {
        &self.storage
    }

    /// The write-through sink for constructing entities.
    pub fn sink(&self) -> StoreSink {
        self.sink.clone()
    }

    /// Process events until the queue closes.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    /// Process one event.
    pub async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Accepted { id, kind, peer, writer } => {
                self.accept_session(id, kind, peer, writer);
            },
            ServerEvent::Data { id, bytes } => self.ingest(id, &bytes).await,
            ServerEvent::Closed { id } => self.close_session(id, None),
            ServerEvent::Timer { id, name } => self.timer_fired(id, name),
        }
    }

    fn accept_session(
        &mut self,
        id: SessionId,
        kind: SessionKind,
        peer: Option<std::net::IpAddr>,
        writer: mpsc::UnboundedSender<Vec<u8>>,
    ) {
        tracing::info!(session = id, ?kind, ?peer, "connection accepted");

        let rdns = match peer {
            Some(ip) if self.config.resolve_hosts && !kind.is_ipc() => rdns::spawn(ip),
            Some(ip) => rdns::resolved(&ip.to_string()),
            None => rdns::resolved("localhost"),
        };

        let mut session = Session::new(id, kind, peer, rdns, writer, self.events.clone());
        if !kind.is_ipc() {
            session.schedule(TimerName::Signon, SIGNON_TIMEOUT);
        }
        self.sessions.insert(id, session);
    }

    /// Buffer ingress bytes, split frames, and dispatch each in order.
    async fn ingest(&mut self, id: SessionId, bytes: &[u8]) {
        let results = match self.sessions.get_mut(&id) {
            Some(session) => {
                session.buffer.extend(bytes);
                let codec = session.codec();
                session.buffer.drain(codec)
            },
            None => return,
        };

        for result in results {
            match result {
                Ok(frame) => {
                    let registry = self.registry.clone();
                    registry.dispatch(self, id, frame).await;
                },
                Err(err) if err.is_fatal() => {
                    self.error(id, "*", &err.to_string(), true, None);
                },
                Err(err) => {
                    let cause = kval! { "cause" => [err.to_string()] };
                    self.error(id, "*", &err.to_string(), false, Some(cause));
                },
            }

            if !self.sessions.contains_key(&id) {
                break;
            }
        }
    }

    fn timer_fired(&mut self, id: SessionId, name: TimerName) {
        match name {
            TimerName::Signon => {
                let unauthenticated =
                    self.sessions.get(&id).is_some_and(|s| s.user.is_none());
                if unauthenticated {
                    self.error(id, "*", "Connection timed out", true, None);
                }
            },
            TimerName::Ping => {
                let server_addr = self.server_addr();
                let target = self.session_user_display(id);
                let Some(session) = self.sessions.get_mut(&id) else { return };

                match session.keepalive.tick() {
                    KeepaliveAction::Ping => {
                        let time = unix_time().to_string();
                        session.send(&server_addr, &target, "ping", kval! { "time" => [time] });
                        session.schedule_jittered(TimerName::Ping, PING_LOW, PING_HIGH);
                    },
                    KeepaliveAction::Close => {
                        tracing::debug!(session = id, "ping timeout");
                        self.error(id, "ping", PING_TIMEOUT_REASON, true, None);
                    },
                }
            },
        }
    }

    // ---- session plumbing ----------------------------------------------

    /// Immutable session lookup.
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Mutable session lookup.
    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    fn session_user_display(&self, id: SessionId) -> String {
        self.sessions
            .get(&id)
            .and_then(|s| s.user.as_ref())
            .map_or_else(|| "*".to_string(), |key| self.user_display(key))
    }

    /// Emit an `error` frame; a fatal error also closes the connection.
    pub fn error(
        &mut self,
        id: SessionId,
        command: &str,
        reason: &str,
        fatal: bool,
        extargs: Option<Kval>,
    ) {
        if !self.sessions.contains_key(&id) {
            return;
        }

        let mut kval = kval! {
            "command" => [command],
            "reason" => [reason],
        };
        if let Some(ext) = extargs {
            for (key, values) in ext {
                kval.entry(key).or_insert(values);
            }
        }

        if fatal {
            tracing::debug!(session = id, command, reason, "fatal client error");
            self.close_session(id, Some(kval));
        } else {
            let source = self.server_addr();
            let target = self.session_user_display(id);
            if let Some(session) = self.sessions.get(&id) {
                session.send(&source, &target, "error", kval);
            }
        }
    }

    /// Tear a session down, optionally emitting a final `error` frame.
    pub fn close_session(&mut self, id: SessionId, error_kval: Option<Kval>) {
        let target = self.session_user_display(id);
        let Some(session) = self.sessions.remove(&id) else { return };

        if let Some(kval) = error_kval {
            session.send(&self.server_addr(), &target, "error", kval);
        }

        let user_key = session.user.clone();
        drop(session);

        if let Some(key) = user_key {
            self.user_exit(&key, id, None);
        }
        tracing::info!(session = id, "connection closed");
    }

    // ---- sending helpers -----------------------------------------------

    /// Send one frame on one session.
    pub fn send_to_session(
        &self,
        id: SessionId,
        source: &str,
        target: &str,
        command: &str,
        kval: Kval,
    ) {
        if let Some(session) = self.sessions.get(&id) {
            session.send(source, target, command, kval);
        }
    }

    /// Fan a frame out to every session of a user.
    pub fn send_to_user(
        &self,
        user_key: &str,
        source: &str,
        target: &str,
        command: &str,
        kval: &Kval,
    ) {
        let Some(user) = self.online_users.get(user_key) else { return };
        for sid in &user.sessions {
            if let Some(session) = self.sessions.get(sid) {
                session.send(source, target, command, kval.clone());
            }
        }
    }

    /// Fan a frame out to every member of a group, minus `exclude`.
    pub fn broadcast_group(
        &self,
        group_key: &str,
        source: &str,
        target: &str,
        command: &str,
        kval: &Kval,
        exclude: Option<&str>,
    ) {
        let Some(group) = self.groups.get(group_key) else { return };
        for member in &group.members {
            if exclude == Some(member.as_str()) {
                continue;
            }
            self.send_to_user(member, source, target, command, kval);
        }
    }

    // ---- target resolution ---------------------------------------------

    /// Resolve a target against the live indices only.
    pub fn get_online_target(&self, name: &str) -> Option<TargetRef> {
        if target::is_wildcard(name) {
            return None;
        }

        let key = target::fold(name);
        if target::is_group(&key) {
            if self.groups.contains_key(&key) {
                return Some(TargetRef::GroupOnline(key));
            }
        } else if self.online_users.contains_key(&key) {
            return Some(TargetRef::UserOnline(key));
        }
        None
    }

    /// Resolve a target in any state, reading through to storage for the
    /// offline tier. Freshly inflated entities land in the LRU cache with
    /// their ACL and property sets eagerly populated.
    pub async fn get_any_target(&mut self, name: &str) -> Result<Option<TargetRef>, StorageError> {
        if target::is_wildcard(name) {
            return Ok(None);
        }

        let key = target::fold(name);
        if let Some(found) = self.get_online_target(&key) {
            return Ok(Some(found));
        }

        if let Some(cached) = self.offline_cache.get(&key) {
            return Ok(Some(match cached {
                OfflineTarget::User(_) => TargetRef::UserOffline(key),
                OfflineTarget::Group(_) => TargetRef::GroupOffline(key),
            }));
        }

        if target::is_group(&key) {
            let Some(row) = self.storage.group_get(&key).await? else {
                return Ok(None);
            };
            let acl_rows = self.storage.group_acl_all(&key).await?;
            let prop_rows = self.storage.group_property_all(&key).await?;

            let group = Group::from_storage(&row, &acl_rows, &prop_rows, self.sink.clone());
            self.offline_cache.put(key.clone(), OfflineTarget::Group(group));
            Ok(Some(TargetRef::GroupOffline(key)))
        } else {
            let Some(row) = self.storage.user_get(&key).await? else {
                return Ok(None);
            };
            let acl_rows = self.storage.user_acl_all(&key).await?;
            let prop_rows = self.storage.user_property_all(&key).await?;
            let roster_users = self.storage.roster_user_all(&key).await?;
            let roster_groups = self.storage.roster_group_all(&key).await?;

            let user = User::from_storage(
                &row,
                &acl_rows,
                &prop_rows,
                &roster_users,
                &roster_groups,
                self.sink.clone(),
            );
            self.offline_cache.put(key.clone(), OfflineTarget::User(user));
            Ok(Some(TargetRef::UserOffline(key)))
        }
    }

    /// Drop the offline tier after a write that changes target existence
    /// (register, group creation, delete).
    pub fn invalidate_targets(&mut self) {
        self.offline_cache.clear();
    }

    /// The user behind a resolved reference.
    pub fn target_user(&self, target: &TargetRef) -> Option<&User> {
        match target {
            TargetRef::UserOnline(key) => self.online_users.get(key),
            TargetRef::UserOffline(key) => match self.offline_cache.peek(key) {
                Some(OfflineTarget::User(user)) => Some(user),
                _ => None,
            },
            _ => None,
        }
    }

    /// Mutable access to the user behind a resolved reference.
    pub fn target_user_mut(&mut self, target: &TargetRef) -> Option<&mut User> {
        match target {
            TargetRef::UserOnline(key) => self.online_users.get_mut(key),
            TargetRef::UserOffline(key) => match self.offline_cache.peek_mut(key) {
                Some(OfflineTarget::User(user)) => Some(user),
                _ => None,
            },
            _ => None,
        }
    }

    /// The group behind a resolved reference.
    pub fn target_group(&self, target: &TargetRef) -> Option<&Group> {
        match target {
            TargetRef::GroupOnline(key) => self.groups.get(key),
            TargetRef::GroupOffline(key) => match self.offline_cache.peek(key) {
                Some(OfflineTarget::Group(group)) => Some(group),
                _ => None,
            },
            _ => None,
        }
    }

    /// Mutable access to the group behind a resolved reference.
    pub fn target_group_mut(&mut self, target: &TargetRef) -> Option<&mut Group> {
        match target {
            TargetRef::GroupOnline(key) => self.groups.get_mut(key),
            TargetRef::GroupOffline(key) => match self.offline_cache.peek_mut(key) {
                Some(OfflineTarget::Group(group)) => Some(group),
                _ => None,
            },
            _ => None,
        }
    }

    /// Take an offline user out of the cache (signon attach).
    pub fn take_offline_user(&mut self, key: &str) -> Option<User> {
        match self.offline_cache.pop(key) {
            Some(OfflineTarget::User(user)) => Some(user),
            Some(other) => {
                self.offline_cache.put(key.to_string(), other);
                None
            },
            None => None,
        }
    }

    /// Move an offline group into the live index (first join after a
    /// restart).
    pub fn promote_group(&mut self, key: &str) -> bool {
        match self.offline_cache.pop(key) {
            Some(OfflineTarget::Group(group)) => {
                self.groups.insert(key.to_string(), group);
                true
            },
            Some(other) => {
                self.offline_cache.put(key.to_string(), other);
                false
            },
            None => false,
        }
    }

    /// Insert a newly created group into the live index.
    pub fn insert_group(&mut self, group: Group) {
        self.groups.insert(group.key().to_string(), group);
    }

    /// Live group lookup by folded key.
    pub fn group(&self, key: &str) -> Option<&Group> {
        self.groups.get(key)
    }

    /// Mutable live group lookup by folded key.
    pub fn group_mut(&mut self, key: &str) -> Option<&mut Group> {
        self.groups.get_mut(key)
    }

    /// Online user lookup by folded key.
    pub fn online_user(&self, key: &str) -> Option<&User> {
        self.online_users.get(key)
    }

    /// Mutable online user lookup by folded key.
    pub fn online_user_mut(&mut self, key: &str) -> Option<&mut User> {
        self.online_users.get_mut(key)
    }

    /// Display name for a user key, online or cached; the key itself as
    /// a last resort.
    pub fn user_display(&self, key: &str) -> String {
        if let Some(user) = self.online_users.get(key) {
            return user.name().to_string();
        }
        if let Some(OfflineTarget::User(user)) = self.offline_cache.peek(key) {
            return user.name().to_string();
        }
        key.to_string()
    }

    // ---- user lifecycle ------------------------------------------------

    /// Attach a user to a session and run the signon burst: cancel the
    /// pre-auth timer, emit `signon` (waiting out reverse DNS first),
    /// send the MOTD, and start the keepalive.
    pub async fn user_enter(&mut self, id: SessionId, mut user: User, options: Vec<String>) {
        let key = user.key().to_string();
        let display = user.name().to_string();

        user.options = options;
        user.sessions.insert(id);
        self.offline_cache.pop(&key);
        self.online_users.insert(key.clone(), user);

        let (peer, rdns) = match self.sessions.get_mut(&id) {
            Some(session) => {
                session.user = Some(key.clone());
                session.cancel(TimerName::Signon);
                (session.peer_ip(), session.rdns_receiver())
            },
            None => return,
        };

        let mut kval = kval! {
            "name" => [self.name.clone()],
            "time" => [unix_time().to_string()],
            "version" => [VERSION[0], VERSION[1]],
            "options" => [],
        };

        // Wait out host validation before disclosing anything.
        let mut rdns = rdns;
        if rdns.borrow().is_none() {
            let _ = tokio::time::timeout(Duration::from_secs(5), rdns.changed()).await;
        }
        let host = rdns.borrow().clone();
        if let (Some(host), Some(peer)) = (host, peer) {
            if host != peer.to_string() {
                kval.insert("host".to_string(), vec![host]);
            }
        }

        let source = self.server_addr();
        self.send_to_session(id, &source, &display, "signon", kval);
        self.motd_burst(id, &display);

        if let Some(session) = self.sessions.get_mut(&id) {
            session.keepalive.pong();
            session.schedule_jittered(TimerName::Ping, PING_LOW, PING_HIGH);
        }

        tracing::info!(session = id, user = %key, "signed on");
    }

    /// Detach a session from its user; the last session going away takes
    /// the user offline and parts every group with a `quit` marker.
    pub fn user_exit(&mut self, user_key: &str, id: SessionId, reason: Option<String>) {
        let gone_offline = match self.online_users.get_mut(user_key) {
            Some(user) => {
                user.sessions.remove(&id);
                !user.is_online()
            },
            None => false,
        };
        if !gone_offline {
            return;
        }

        let Some(user) = self.online_users.remove(user_key) else { return };
        let display = user.name().to_string();

        let mut kval = kval! { "quit" => ["*"] };
        if let Some(reason) = reason {
            kval.insert("reason".to_string(), vec![reason]);
        }

        for group_key in &user.groups {
            if let Some(group) = self.groups.get_mut(group_key) {
                let _ = group.remove_member(user_key);
            }
        }
        for group_key in &user.groups {
            if let Some(group) = self.groups.get(group_key) {
                let group_name = group.name().to_string();
                self.broadcast_group(group_key, &display, &group_name, "group-exit", &kval, None);
            }
        }

        tracing::info!(user = %user_key, "went offline");
    }

    /// Emit the MOTD to one session, multipart when oversize.
    pub fn motd_burst(&mut self, id: SessionId, display: &str) {
        let source = self.server_addr();
        let Some(session) = self.sessions.get(&id) else { return };

        match &self.motd {
            None => session.send(&source, display, "motd", Kval::new()),
            Some(text) => {
                let kval = kval! { "text" => [text.clone()] };
                if let Err(err) = session.send_multipart(
                    &source,
                    display,
                    "motd",
                    &["text".to_string()],
                    &kval,
                    true,
                ) {
                    tracing::warn!(%err, "could not send MOTD");
                }
            },
        }
    }

    // ---- group membership ----------------------------------------------

    /// Add a user to a group and emit the join bursts: `group-enter` to
    /// every member, then `group-info` and the multipart `group-names`
    /// to the joiner.
    pub fn group_join(
        &mut self,
        group_key: &str,
        user_key: &str,
        reason: Option<String>,
    ) -> Result<(), GroupError> {
        let group = self
            .groups
            .get_mut(group_key)
            .ok_or_else(|| GroupError::Addition(format!("No such group: {group_key}")))?;
        group.insert_member(user_key)?;

        let group_name = group.name().to_string();
        let created = group.created;
        let topic = group.topic().unwrap_or("").to_string();
        let members: Vec<String> = group.members.iter().cloned().collect();

        if let Some(user) = self.online_users.get_mut(user_key) {
            user.groups.insert(group_key.to_string());
        }

        let display = self.user_display(user_key);

        let mut enter = Kval::new();
        if let Some(reason) = reason {
            enter.insert("reason".to_string(), vec![reason]);
        }
        self.broadcast_group(group_key, &display, &group_name, "group-enter", &enter, None);

        let info = kval! {
            "time" => [created.to_string()],
            "topic" => [topic],
        };
        self.send_to_user(user_key, &group_name, &display, "group-info", &info);

        let names: Vec<String> = members.iter().map(|k| self.user_display(k)).collect();
        let mut name_kval = Kval::new();
        name_kval.insert("users".to_string(), names);
        if let Some(user) = self.online_users.get(user_key) {
            for sid in &user.sessions {
                if let Some(session) = self.sessions.get(sid) {
                    if let Err(err) = session.send_multipart(
                        &group_name,
                        &display,
                        "group-names",
                        &["users".to_string()],
                        &name_kval,
                        false,
                    ) {
                        tracing::warn!(%err, "could not send group-names");
                    }
                }
            }
        }

        Ok(())
    }

    /// Remove a user from a group and tell the remaining members.
    pub fn group_part(
        &mut self,
        group_key: &str,
        user_key: &str,
        reason: Option<String>,
    ) -> Result<(), GroupError> {
        let group = self
            .groups
            .get_mut(group_key)
            .ok_or_else(|| GroupError::Removal(format!("No such group: {group_key}")))?;
        group.remove_member(user_key)?;
        let group_name = group.name().to_string();

        if let Some(user) = self.online_users.get_mut(user_key) {
            user.groups.remove(group_key);
        }

        let mut kval = Kval::new();
        if let Some(reason) = reason {
            kval.insert("reason".to_string(), vec![reason]);
        }
        let display = self.user_display(user_key);
        self.broadcast_group(group_key, &display, &group_name, "group-exit", &kval, None);
        Ok(())
    }

    // ---- registration --------------------------------------------------

    /// Shared validation + persistence for register/fregister. Returns
    /// the freshly built user, or the protocol error to report.
    pub async fn register_user(
        &mut self,
        name: Option<&str>,
        gecos: Option<&str>,
        password: Option<&str>,
    ) -> Result<User, crate::dispatcher::CommandFailure> {
        use crate::dispatcher::CommandFailure;
        use tideframe_proto::MAXTARGET;

        let Some(name) = name else {
            return Err(CommandFailure::reply("No handle"));
        };
        let handle_args = || kval! { "handle" => [name] };

        if name.len() > MAXTARGET {
            return Err(CommandFailure::reply_with("Handle is too long", handle_args()));
        }
        if !target::valid_handle(name) {
            return Err(CommandFailure::reply_with("Invalid handle", handle_args()));
        }

        let key = target::fold(name);
        if self.storage.user_get(&key).await?.is_some() {
            return Err(CommandFailure::reply_with("Handle already registered", handle_args()));
        }

        let gecos = gecos.unwrap_or(name);
        if gecos.len() > MAXTARGET {
            return Err(CommandFailure::reply_with(
                "GECOS is too long",
                kval! { "gecos" => [gecos] },
            ));
        }

        // The password itself is never echoed back.
        let Some(password) = password.filter(|p| p.len() >= 5) else {
            return Err(CommandFailure::reply("Bad password"));
        };

        let hash = tideframe_core::auth::hash_password(password).map_err(CommandFailure::User)?;

        self.storage.user_add(&key, gecos, &hash).await?;
        self.invalidate_targets();

        Ok(User::new(name, gecos, Some(hash), self.sink()))
    }
}
