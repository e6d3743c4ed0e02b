//! HTTP server
//!
//! [`HttpServer`] binds a listener and serves each accepted connection on
//! its own thread. The protocol is chosen per connection: TLS ALPN `h2`
//! selects HTTP/2, a cleartext connection opening with the HTTP/2 preface
//! is served as HTTP/2 with prior knowledge, everything else is HTTP/1.1.

use super::connection::{ConnectionOutcome, Http1Connection};
use super::dispatch::Dispatcher;
use super::h2::H2Connection;
use super::session::from_tcp_stream;
use super::{HttpSession, Result, ServerConfig, SessionOps};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const LISTEN_BACKLOG: i32 = 1024;

/// A configured, not yet running server
pub struct HttpServer {
    config: Arc<ServerConfig>,
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Self {
        HttpServer {
            config: Arc::new(config),
        }
    }

    /// Bind the listener and start the accept loop on a background thread
    pub fn spawn(self) -> Result<ServerHandle> {
        let listener = bind(self.config.bind_addr())?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));

        info!(
            addr = %local_addr,
            name = self.config.name(),
            tls = self.config.tls().is_some(),
            "server listening"
        );

        let config = Arc::clone(&self.config);
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || accept_loop(listener, config, flag))?;

        Ok(ServerHandle {
            local_addr,
            stop,
            thread: Some(thread),
        })
    }
}

/// Running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to (with the real port when 0 was asked)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections; connections in flight finish on their own
    pub fn stop(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the blocking accept
        let _ = TcpStream::connect(wake_addr(self.local_addr));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!(addr = %self.local_addr, "server stopped");
    }

    /// Block until the accept loop ends
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Loopback address reaching a listener bound to a wildcard address
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port())
        }
        _ => addr,
    }
}

fn accept_loop(listener: TcpListener, config: Arc<ServerConfig>, stop: Arc<AtomicBool>) {
    let dispatcher = Dispatcher::new(Arc::clone(&config.router), Arc::clone(&config.filters));

    for incoming in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let tcp = match incoming {
            Ok(tcp) => tcp,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let config = Arc::clone(&config);
        let dispatcher = dispatcher.clone();
        let spawned = thread::Builder::new()
            .name("http-conn".to_string())
            .spawn(move || {
                let peer = tcp.peer_addr().ok();
                if let Err(e) = handle_connection(tcp, &config, dispatcher) {
                    debug!(peer = ?peer, error = %e, "connection ended with error");
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "cannot spawn connection thread");
        }
    }
}

fn handle_connection(tcp: TcpStream, config: &ServerConfig, dispatcher: Dispatcher) -> Result<()> {
    tcp.set_nodelay(true)?;

    let Some(tls) = config.tls() else {
        return serve_http1(from_tcp_stream(tcp), config, dispatcher, true);
    };

    // The handshake runs on the blocking socket, so bound it
    tcp.set_read_timeout(Some(config.http1().read_timeout))?;
    tcp.set_write_timeout(Some(config.http1().read_timeout))?;
    let session = tls.accept(tcp)?;
    session.get_ref().set_read_timeout(None)?;
    session.get_ref().set_write_timeout(None)?;

    if session.alpn_protocol() == Some("h2") {
        serve_h2(HttpSession::new(session), config, dispatcher, false)
    } else {
        serve_http1(HttpSession::new(session), config, dispatcher, false)
    }
}

fn serve_http1<S: SessionOps + Send + 'static>(
    session: HttpSession<S>,
    config: &ServerConfig,
    dispatcher: Dispatcher,
    detect_h2c: bool,
) -> Result<()> {
    let outcome = Http1Connection::new(session, dispatcher.clone(), *config.http1())
        .server_name(config.name())
        .detect_h2c(detect_h2c)
        .run()?;

    match outcome {
        ConnectionOutcome::Closed => Ok(()),
        ConnectionOutcome::H2Preface(session) => serve_h2(session, config, dispatcher, true),
    }
}

fn serve_h2<S: SessionOps + Send + 'static>(
    mut session: HttpSession<S>,
    config: &ServerConfig,
    dispatcher: Dispatcher,
    preface_received: bool,
) -> Result<()> {
    session.set_timeout(Some(config.http1().read_timeout));
    let served = H2Connection::new(session, dispatcher, config.h2().clone())
        .server_name(config.name())
        .preface_received(preface_received)
        .run();
    if let Err(e) = served {
        debug!(error = %e, "HTTP/2 connection ended with error");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Routes};
    use std::io::{Read, Write};

    #[test]
    fn test_wake_addr() {
        let any: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(wake_addr(any), "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        let local: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(wake_addr(local), local);
    }

    #[test]
    fn test_spawn_serve_stop() {
        let mut routes = Routes::new();
        routes.add(Method::Get, "/", |_req, resp| resp.append_body(b"root"));
        let config = ServerConfig::builder()
            .address("127.0.0.1")
            .routes(routes)
            .build()
            .unwrap();

        let mut handle = HttpServer::new(config).spawn().unwrap();
        let addr = handle.local_addr();
        assert_ne!(addr.port(), 0);

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).unwrap();
        assert!(out.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(out.ends_with("root"));

        handle.stop();
        assert!(TcpStream::connect(addr).is_err());
    }
}
