//! Scratch 2 helper protocol.
//!
//! The host talks plain HTTP/1.1 GETs to a local helper:
//!
//! - `/poll` returns `_problem` and `_busy` lines
//! - `/<selector>/<args>` runs a block; long-running blocks carry a job id
//!   as their first argument and answer immediately
//! - `/reset_all` runs the reset hook
//! - `/crossdomain.xml` for the Flash player, `/` or `/<id>.s2e` for the
//!   extension descriptor

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use url::Url;

use crate::blocks::{self, Call, CallError};
use crate::bridge::Bridge;
use crate::brick::Locator;
use crate::config::ExtensionConfig;

/// A parsed request target.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Poll,
    ResetAll,
    CrossDomain,
    Descriptor,
    Call { job: Option<u32>, call: Call },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("malformed request target {0:?}")]
    BadTarget(String),
    #[error("{0} needs a numeric job id")]
    MissingJob(String),
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Decoded, non-empty-tail path segments of a request target.
fn segments(target: &str) -> Result<Vec<String>, RouteError> {
    let url = Url::parse("http://localhost/")
        .and_then(|base| base.join(target))
        .map_err(|_| RouteError::BadTarget(target.to_string()))?;

    let mut segments: Vec<String> = url
        .path_segments()
        .map(|parts| {
            parts
                .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    if segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    Ok(segments)
}

/// Map a request target onto a route. `id` is the extension id used for
/// the `<id>.s2e` descriptor path.
pub fn route(target: &str, id: &str) -> Result<Route, RouteError> {
    let segments = segments(target)?;
    let Some((selector, args)) = segments.split_first() else {
        return Ok(Route::Descriptor);
    };

    if args.is_empty() {
        match selector.as_str() {
            "poll" => return Ok(Route::Poll),
            "reset_all" => return Ok(Route::ResetAll),
            "crossdomain.xml" => return Ok(Route::CrossDomain),
            s if s.strip_suffix(".s2e") == Some(id) => return Ok(Route::Descriptor),
            _ => {}
        }
    }

    let (job, args) = if blocks::is_blocking(selector) {
        let (job, rest) = args
            .split_first()
            .ok_or_else(|| RouteError::MissingJob(selector.clone()))?;
        let job = job
            .parse::<u32>()
            .map_err(|_| RouteError::MissingJob(selector.clone()))?;
        (Some(job), rest)
    } else {
        (None, args)
    };

    Ok(Route::Call {
        job,
        call: Call::parse(selector, args)?,
    })
}

/// Minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    fn bad_request(reason: impl Into<String>) -> Self {
        Self {
            status: 400,
            ..Self::text(reason)
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            405 => "Method Not Allowed",
            _ => "Error",
        }
    }

    fn to_bytes(&self, close: bool) -> Vec<u8> {
        let mut out = format!(
            concat!(
                "HTTP/1.1 {} {}\r\n",
                "Content-Type: {}\r\n",
                "Content-Length: {}\r\n",
                "Access-Control-Allow-Origin: *\r\n",
            ),
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        );
        if close {
            out.push_str("Connection: close\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

/// Longest request or header line accepted.
const MAX_LINE: u64 = 8 * 1024;

/// Request line and the one header we care about.
struct Request {
    method: String,
    target: Option<String>,
    close: bool,
}

/// Read one line of at most [`MAX_LINE`] bytes.
async fn read_line<R>(reader: &mut R, line: &mut String) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let n = (&mut *reader).take(MAX_LINE).read_line(line).await?;
    if n as u64 == MAX_LINE && !line.ends_with('\n') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "request line too long"));
    }
    Ok(n)
}

/// Read a request head. `None` when the peer closed the connection.
async fn read_request<R>(reader: &mut R) -> io::Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let mut request_line = String::new();
    if read_line(reader, &mut request_line).await? == 0 {
        return Ok(None);
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().map(str::to_string);
    let mut close = parts.next() == Some("HTTP/1.0");

    loop {
        let mut header = String::new();
        if read_line(reader, &mut header).await? == 0 {
            return Ok(None);
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("connection") {
                close = !value.trim().eq_ignore_ascii_case("keep-alive");
            }
        }
    }

    Ok(Some(Request {
        method,
        target,
        close,
    }))
}

/// The helper server state shared by every connection.
pub struct Host<L: Locator> {
    bridge: Arc<Bridge<L>>,
    busy: Arc<Mutex<BTreeSet<u32>>>,
    extension_id: String,
    extension_port: u16,
    descriptor: String,
}

impl<L: Locator> Host<L> {
    pub fn new(bridge: Arc<Bridge<L>>, extension: &ExtensionConfig) -> Self {
        Self {
            bridge,
            busy: Arc::new(Mutex::new(BTreeSet::new())),
            extension_id: extension.id.clone(),
            extension_port: extension.port,
            descriptor: blocks::descriptor(&extension.name, extension.port).to_string(),
        }
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await.context("Failed to accept connection")?;
            tracing::trace!("Connection from {}", peer);
            let host = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = host.serve_connection(stream).await {
                    tracing::debug!("Connection from {} dropped: {}", peer, e);
                }
            });
        }
    }

    /// Answer requests on one connection until the peer closes it.
    pub async fn serve_connection<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);
        loop {
            let request = match read_request(&mut stream).await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::debug!("Rejected request: {}", e);
                    let response = Response::bad_request(e.to_string());
                    let writer = stream.get_mut();
                    writer.write_all(&response.to_bytes(true)).await?;
                    writer.flush().await?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let response = match (request.method.as_str(), request.target.as_deref()) {
                ("GET", Some(target)) => self.respond(target).await,
                (_, Some(_)) => Response {
                    status: 405,
                    ..Response::text("")
                },
                _ => Response::bad_request("malformed request line"),
            };

            let writer = stream.get_mut();
            writer.write_all(&response.to_bytes(request.close)).await?;
            writer.flush().await?;
            if request.close {
                return Ok(());
            }
        }
    }

    /// Route and run one request.
    pub async fn respond(&self, target: &str) -> Response {
        let route = match route(target, &self.extension_id) {
            Ok(route) => route,
            Err(e) => {
                tracing::debug!("Rejected {}: {}", target, e);
                return Response::bad_request(e.to_string());
            }
        };

        match route {
            Route::Poll => Response::text(self.poll_body().await),
            Route::ResetAll => {
                self.bridge.reset().await;
                Response::text("")
            }
            Route::CrossDomain => Response {
                content_type: "text/xml",
                ..Response::text(format!(
                    concat!(
                        "<cross-domain-policy>\n",
                        "  <allow-access-from domain=\"*\" to-ports=\"{}\"/>\n",
                        "</cross-domain-policy>\n",
                    ),
                    self.extension_port
                ))
            },
            Route::Descriptor => Response {
                content_type: "application/json",
                ..Response::text(self.descriptor.clone())
            },
            Route::Call { job: Some(job), call } => {
                // Marked busy before the task starts so the next poll sees it
                self.busy.lock().await.insert(job);
                let bridge = Arc::clone(&self.bridge);
                let busy = Arc::clone(&self.busy);
                tokio::spawn(async move {
                    bridge.dispatch(call).await;
                    busy.lock().await.remove(&job);
                });
                Response::text("")
            }
            Route::Call { job: None, call } => {
                Response::text(self.bridge.dispatch(call).await.into_body())
            }
        }
    }

    async fn poll_body(&self) -> String {
        let mut lines = Vec::new();
        if let Some(problem) = self.bridge.problem().await {
            lines.push(format!("_problem {problem}"));
        }
        let busy = self.busy.lock().await;
        if !busy.is_empty() {
            let ids: Vec<String> = busy.iter().map(u32::to_string).collect();
            lines.push(format!("_busy {}", ids.join(" ")));
        }
        lines.join("\n")
    }
}
