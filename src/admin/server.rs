use bytes::BytesMut;
use http::{Method, StatusCode};
use std::io::prelude::*;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{HttpRequest, HttpResponse, Router};
use crate::error::*;
use crate::thread_pool::{PoolConfig, ThreadPool};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Connections accepted but not yet handled before new ones get a 503.
    pub outstanding_requests: usize,
    pub handler_threads: usize,
    pub max_request_bytes: usize,
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8040)),
            outstanding_requests: 1024,
            handler_threads: 8,
            max_request_bytes: 1_000_000,
            read_timeout: Duration::from_secs(30),
        }
    }
}

pub struct AdminServer;

impl AdminServer {
    ///
    /// Bind and start serving on a background thread. One request per connection.
    ///
    pub fn start(config: ServerConfig, router: Router) -> Result<ServerHandle> {
        let listener = TcpListener::bind(config.addr)?;
        let local_addr = listener.local_addr()?;
        let handlers = ThreadPool::start(PoolConfig {
            name: String::from("AdminHandler"),
            workers: config.handler_threads,
            queue_capacity: config.outstanding_requests,
        })?;
        let router = Arc::new(router);
        let stopped = Arc::new(AtomicBool::new(false));
        let acceptor_stopped = Arc::clone(&stopped);

        let thread_bldr = std::thread::Builder::new().name("AdminAcceptor".into());
        let acceptor = thread_bldr.spawn(move || {
            log::info!("Admin server listening on {}", local_addr);
            for stream in listener.incoming() {
                if acceptor_stopped.load(Ordering::SeqCst) {
                    break;
                }
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        log::warn!("Accept failed: {:?}", e);
                        continue;
                    }
                };
                let router = Arc::clone(&router);
                let config = config.clone();
                let overflow = match stream.try_clone() {
                    Ok(overflow) => overflow,
                    Err(e) => {
                        log::warn!("Client error: {:?}", e);
                        continue;
                    }
                };
                let submitted = handlers.submit(move || {
                    if let Err(e) = Self::handler(stream, &router, &config) {
                        log::warn!("Client error: {:?}", e);
                    }
                });
                if let Err(e) = submitted {
                    let _ = Self::write_response(overflow, &HttpResponse::from_error(&e));
                }
            }
            handlers.shutdown();
            log::info!("Stopping admin server on {}", local_addr);
        })?;

        Ok(ServerHandle {
            local_addr,
            stopped,
            acceptor: Some(acceptor),
        })
    }

    fn handler(mut stream: TcpStream, router: &Router, config: &ServerConfig) -> Result<()> {
        stream.set_read_timeout(Some(config.read_timeout))?;
        let response = match Self::read_request(&mut stream, config.max_request_bytes) {
            Ok(Some(req)) => {
                log::debug!("{} {}", req.method(), req.path());
                router.dispatch(&req)
            }
            Ok(None) => {
                log::info!("Closed connection.");
                return Ok(());
            }
            // socket trouble, nobody to answer
            Err(e @ Error::IO(_)) => return Err(e),
            Err(e) => {
                log::debug!("Bad request: {}", e);
                HttpResponse::from_error(&e)
            }
        };
        Self::write_response(stream, &response)
    }

    fn read_request(stream: &mut TcpStream, max_bytes: usize) -> Result<Option<HttpRequest>> {
        let mut buf = BytesMut::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            if let Some(pos) = find_header_end(&buf) {
                break pos;
            }
            let bytes_read = stream.read(&mut chunk)?;
            if bytes_read == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::InvalidArgument(String::from(
                    "connection closed mid request",
                )));
            }
            buf.extend_from_slice(&chunk[..bytes_read]);
            if buf.len() > max_bytes {
                return Err(Error::InvalidArgument(format!(
                    "request exceeds {} bytes",
                    max_bytes
                )));
            }
        };

        let head = buf.split_to(header_end);
        let head = std::str::from_utf8(&head)
            .map_err(|_| Error::InvalidArgument(String::from("request head is not utf-8")))?;
        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (method, target) = match (parts.next(), parts.next()) {
            (Some(method), Some(target)) => (method, target),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "malformed request line '{}'",
                    request_line
                )))
            }
        };
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::InvalidArgument(format!("unknown method {}", method)))?;
        let mut req = HttpRequest::new(method, target);
        let mut content_length = 0usize;
        for line in lines.filter(|l| !l.trim().is_empty()) {
            if let Some((name, value)) = line.split_once(':') {
                let value = value.trim();
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.parse().map_err(|_| {
                        Error::InvalidArgument(format!("bad content-length '{}'", value))
                    })?;
                }
                req = req.with_header(name.trim(), value);
            }
        }

        if content_length > max_bytes {
            return Err(Error::InvalidArgument(format!(
                "request exceeds {} bytes",
                max_bytes
            )));
        }
        while buf.len() < content_length {
            let bytes_read = stream.read(&mut chunk)?;
            if bytes_read == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..bytes_read]);
        }
        let is_form = req
            .header("content-type")
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if is_form {
            let body = buf.split_to(content_length.min(buf.len()));
            req.add_query(&String::from_utf8_lossy(&body));
        }
        Ok(Some(req))
    }

    fn write_response(mut stream: TcpStream, response: &HttpResponse) -> Result<()> {
        let status: StatusCode = response.status;
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            response.body.len()
        );
        stream.write_all(head.as_bytes())?;
        stream.write_all(response.body.as_bytes())?;
        stream.flush()?;
        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| idx + 4)
        .or_else(|| buf.windows(2).position(|w| w == b"\n\n").map(|idx| idx + 2))
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    stopped: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the server stops.
    pub fn join(mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.stopped.store(true, Ordering::SeqCst);
        // wake the acceptor so it sees the flag
        let mut wake_addr = self.local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        if let Err(e) = TcpStream::connect(wake_addr) {
            log::warn!("Unable to wake acceptor on {}: {:?}", self.local_addr, e);
        }
        if acceptor.join().is_err() {
            log::warn!("Admin acceptor exited abnormally");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
