//! Loopback HTTP receiver for `POST /events`.
//!
//! A small HTTP/1.1 server: one request per connection, bodies
//! framed by `Content-Length`, permissive CORS so a browser extension can post.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::{store::EventStore, Reply};

/// Address the extension posts to
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 17321;

const MAX_BODY_LEN: usize = 1024 * 1024;
const MAX_HEADER_LINES: usize = 100;

struct Request {
    method: String,
    target: String,
    body: Vec<u8>,
}

struct Response {
    status: u16,
    reason: &'static str,
    content_type: Option<&'static str>,
    body: Vec<u8>,
}

impl Response {
    fn empty(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            content_type: None,
            body: Vec::new(),
        }
    }

    fn text(status: u16, reason: &'static str, body: &str) -> Self {
        Self {
            status,
            reason,
            content_type: Some("text/plain"),
            body: body.as_bytes().to_vec(),
        }
    }

    fn json(status: u16, reason: &'static str, reply: &Reply) -> Self {
        Self {
            status,
            reason,
            content_type: Some("application/json"),
            body: serde_json::to_vec(reply).unwrap_or_default(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n",
            self.status,
            self.reason,
            self.body.len()
        );
        if let Some(content_type) = self.content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

pub struct HttpReceiver {
    listener: TcpListener,
    store: Arc<Mutex<EventStore>>,
}

impl HttpReceiver {
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound
    pub async fn bind(addr: impl ToSocketAddrs, store: EventStore) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            store: Arc::new(Mutex::new(store)),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the socket has no local address
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the event store
    #[must_use]
    pub fn store(&self) -> Arc<Mutex<EventStore>> {
        Arc::clone(&self.store)
    }

    /// Accept connections until `shutdown` completes
    ///
    /// # Errors
    ///
    /// Currently never fails; accept errors are logged and the loop continues
    pub async fn serve_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let store = Arc::clone(&self.store);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &store).await {
                                log::warn!("Connection from {peer} failed: {e}");
                            }
                        });
                    }
                    Err(e) => log::error!("Accept error: {e}"),
                },
                () = &mut shutdown => {
                    log::info!("Shutting down...");
                    break;
                }
            }
        }

        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = store.save() {
            log::error!("Failed to save events: {e}");
        }
        log::info!("Server closed");
        Ok(())
    }

    /// Serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// See [`HttpReceiver::serve_until`]
    pub async fn run(self) -> io::Result<()> {
        self.serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {e}");
            }
        })
        .await
    }
}

async fn handle_connection(mut stream: TcpStream, store: &Mutex<EventStore>) -> io::Result<()> {
    let response = match read_request(&mut stream).await? {
        Some(request) => route(&request, store),
        None => Response::text(400, "Bad Request", "Bad request"),
    };
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await
}

/// Parse the request line, headers and body; `None` if malformed
async fn read_request(stream: &mut TcpStream) -> io::Result<Option<Request>> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    let (method, target) = (method.to_string(), target.to_string());

    let mut content_length = 0;
    for _ in 0..MAX_HEADER_LINES {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                match value.trim().parse::<usize>() {
                    Ok(len) if len <= MAX_BODY_LEN => content_length = len,
                    _ => return Ok(None),
                }
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    Ok(Some(Request {
        method,
        target,
        body,
    }))
}

fn route(request: &Request, store: &Mutex<EventStore>) -> Response {
    match (request.method.as_str(), request.target.as_str()) {
        ("OPTIONS", _) => Response::empty(200, "OK"),
        ("POST", "/events") => receive_event(&request.body, store),
        _ => Response::text(404, "Not Found", "Not found"),
    }
}

fn receive_event(body: &[u8], store: &Mutex<EventStore>) -> Response {
    let event = match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(event) => event,
        Err(e) => {
            log::error!("Error processing event: {e}");
            return Response::json(400, "Bad Request", &Reply::rejected(e.to_string()));
        }
    };

    log::info!("Received event: {event}");
    let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
    match store.record(event) {
        Ok(()) => Response::json(200, "OK", &Reply::received()),
        Err(e) => {
            log::error!("Error processing event: {e}");
            Response::json(400, "Bad Request", &Reply::rejected(e.to_string()))
        }
    }
}
