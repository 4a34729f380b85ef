//! Listener bootstrap and socket pump tasks.
//!
//! Three transports feed the same event queue: binary-codec TCP,
//! JSON-codec TCP, and JSON over a local UNIX socket for admin IPC. The
//! TCP listeners are TLS-wrapped; with no certificate configured a
//! self-signed one is generated for development. rustls negotiates
//! TLS 1.2+ only and never compresses.
//!
//! Socket tasks do no protocol work: they pump bytes between the socket
//! and the server loop and report the close.

use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use crate::{config::Config, events::ServerEvent, session::SessionKind};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Bind every configured listener and spawn their accept loops.
pub async fn spawn_listeners(
    config: &Config,
    events: mpsc::UnboundedSender<ServerEvent>,
) -> io::Result<()> {
    let tls = build_acceptor(config)?;

    let listener = TcpListener::bind(&config.listen).await?;
    tracing::info!(addr = %config.listen, "listening (binary)");
    tokio::spawn(accept_tcp(listener, SessionKind::Binary, tls.clone(), events.clone()));

    if let Some(addr) = &config.listen_json {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "listening (json)");
        tokio::spawn(accept_tcp(listener, SessionKind::Json, tls, events.clone()));
    }

    if let Some(path) = &config.unix_path {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        tracing::info!(path = %path.display(), "control socket bound");
        tokio::spawn(accept_unix(listener, events));
    }

    Ok(())
}

async fn accept_tcp(
    listener: TcpListener,
    kind: SessionKind,
    tls: TlsAcceptor,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(%err, "accept failed");
                continue;
            },
        };

        let tls = tls.clone();
        let events = events.clone();
        tokio::spawn(async move {
            match tls.accept(stream).await {
                Ok(stream) => {
                    socket_io(stream, kind, Some(peer.ip()), events).await;
                },
                Err(err) => {
                    tracing::debug!(%err, %peer, "TLS handshake failed");
                },
            }
        });
    }
}

async fn accept_unix(listener: UnixListener, events: mpsc::UnboundedSender<ServerEvent>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(%err, "unix accept failed");
                continue;
            },
        };
        tokio::spawn(socket_io(stream, SessionKind::Ipc, None, events.clone()));
    }
}

/// Pump bytes between one socket and the server loop until either side
/// goes away.
async fn socket_io<S>(
    stream: S,
    kind: SessionKind,
    peer: Option<IpAddr>,
    events: mpsc::UnboundedSender<ServerEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
    let (writer, mut outbound) = mpsc::unbounded_channel::<Vec<u8>>();
    if events.send(ServerEvent::Accepted { id, kind, peer, writer }).is_err() {
        return;
    }

    let (mut reader, mut writer_half) = tokio::io::split(stream);
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if events.send(ServerEvent::Data { id, bytes: buf[..n].to_vec() }).is_err() {
                        break;
                    }
                },
            },
            outgoing = outbound.recv() => match outgoing {
                Some(bytes) => {
                    if writer_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                },
                // The server dropped the session; close the socket.
                None => break,
            },
        }
    }

    let _ = writer_half.shutdown().await;
    let _ = events.send(ServerEvent::Closed { id });
}

fn build_acceptor(config: &Config) -> io::Result<TlsAcceptor> {
    let tls_config = match (&config.cert_path, &config.key_path) {
        (Some(cert), Some(key)) => load_tls_config(cert, key)?,
        _ => {
            tracing::warn!("no TLS certificate configured, generating a self-signed one");
            self_signed_config()?
        },
    };
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_path)?;
    let key_pem = std::fs::read(key_path)?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..]).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn self_signed_config() -> io::Result<rustls::ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let cert_der = cert.cert.der().clone();
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key.into())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listeners_bind_with_self_signed_tls() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            listen: "127.0.0.1:0".to_string(),
            listen_json: Some("127.0.0.1:0".to_string()),
            unix_path: Some(dir.path().join("control")),
            cert_path: None,
            key_path: None,
            ..Config::default()
        };

        let (events, _rx) = mpsc::unbounded_channel();
        spawn_listeners(&config, events).await.expect("listeners bind");
        assert!(config.unix_path.as_ref().map(|p| p.exists()).unwrap_or(false));
    }

    #[tokio::test]
    async fn acceptor_requires_both_cert_and_key() {
        let config = Config { cert_path: Some("missing.pem".into()), ..Config::default() };
        // Only a cert, no key: falls back to self-signed rather than
        // failing the boot.
        assert!(build_acceptor(&config).is_ok());
    }
}
