//! Proxy server: accepts client connections, captures every request/response
//! pair as a raw dump, and forwards each through the interception engine.
//!
//! Headers are read just far enough to size the body, then the exact
//! bytes (chunk framing included) are threaded through untouched so the
//! captured dump matches the wire byte-for-byte.

use crate::ca::CertificateAuthority;
use crate::error::HttpCodecError;
use crate::events::Event;
use crate::http;
use crate::intercept::{Decision, InterceptPhase};
use crate::models::{HTTPTransaction, TransactionState};
use crate::store::AppState;
use crate::tls_client::permissive_client_config;
use anyhow::{bail, Context};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

const MAX_HEAD_BYTES: usize = 64 * 1024;
const KEEP_ALIVE_IDLE: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Error)]
#[error("request/response head exceeds {0} bytes without a terminator")]
struct HeadTooLarge(usize);

/// A handle callers use to stop a running proxy. Cloning is cheap; every
/// clone observes the same shutdown flag.
#[derive(Clone)]
pub struct ProxyHandle {
    running: Arc<AtomicBool>,
    local_addr: std::net::SocketAddr,
}

impl ProxyHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// The address actually bound, useful when `ProxyConfig::port` is `0`
    /// and the OS assigned an ephemeral one (tests, port-free startup).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }
}

/// Run the proxy's accept loop until `handle.stop()` is called. One task is
/// spawned per accepted connection.
pub async fn run_server(
    config: crate::config::ProxyConfig,
    ca: Arc<CertificateAuthority>,
    state: AppState,
) -> anyhow::Result<ProxyHandle> {
    let listener = TcpListener::bind(config.listen_addr()).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("proxy listening on {local_addr}");

    let running = Arc::new(AtomicBool::new(true));
    let handle = ProxyHandle { running: running.clone(), local_addr };
    let upstream_tls = permissive_client_config();

    tokio::spawn(async move {
        loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let accepted = tokio::time::timeout(std::time::Duration::from_millis(500), listener.accept()).await;
            match accepted {
                Ok(Ok((socket, peer))) => {
                    tracing::debug!("connection from {peer}");
                    let ca = ca.clone();
                    let state = state.clone();
                    let upstream_tls = upstream_tls.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(socket, ca, state, upstream_tls).await {
                            tracing::debug!("connection closed: {err}");
                        }
                    });
                }
                Ok(Err(err)) => tracing::error!("accept error: {err}"),
                Err(_) => continue,
            }
        }
        state.intercept.drop_all_pending();
        tracing::info!("proxy stopped");
    });

    Ok(handle)
}

/// Stop the proxy and drain every pending interception as a drop. Call
/// this instead of `handle.stop()` directly when a clean shutdown (not
/// just "stop accepting") is wanted.
pub fn stop_and_drain(handle: &ProxyHandle, state: &AppState) {
    handle.stop();
    state.intercept.drop_all_pending();
}

async fn handle_connection(
    mut socket: TcpStream,
    ca: Arc<CertificateAuthority>,
    state: AppState,
    upstream_tls: Arc<ClientConfig>,
) -> anyhow::Result<()> {
    let mut request_count = 0u32;
    loop {
        request_count += 1;
        let read = tokio::time::timeout(KEEP_ALIVE_IDLE, read_raw_message(&mut socket, MessageKind::Request)).await;
        let request_dump = match read {
            Ok(Ok(Some(dump))) => dump,
            Ok(Ok(None)) => break,
            Ok(Err(err)) => {
                if request_count == 1 {
                    let _ = respond_with_status(&mut socket, 400, "Bad Request", "unable to parse HTTP request").await;
                    tracing::debug!("failed to read request: {err}");
                }
                break;
            }
            Err(_) => break,
        };

        let parsed = match http::parse_raw_request(&request_dump) {
            Ok(p) => p,
            Err(err) => {
                let _ = respond_with_status(&mut socket, 400, "Bad Request", &err.to_string()).await;
                break;
            }
        };

        if parsed.method.eq_ignore_ascii_case("CONNECT") {
            handle_connect(socket, &parsed.path, ca, state, upstream_tls).await?;
            return Ok(());
        }

        let keep_alive = client_wants_keep_alive(&parsed.version, &parsed);
        let target = match resolve_target(&parsed, "http", None) {
            Some(target) => target,
            None => {
                let _ = respond_with_status(&mut socket, 400, "Bad Request", "no resolvable target").await;
                break;
            }
        };

        if let Target::Self_(self_response) = &target {
            let body = self_response.render(&ca);
            socket.write_all(&body).await?;
            if !keep_alive {
                break;
            }
            continue;
        }

        match target {
            Target::Upstream { scheme, host, port, path } => {
                let dump = rewrite_request_path(&request_dump, &path);
                if !process_one_exchange(&mut socket, &scheme, &host, port, dump, &state, &upstream_tls, false).await? {
                    break;
                }
            }
            Target::Self_(_) => unreachable!(),
        }

        if !keep_alive {
            break;
        }
    }
    Ok(())
}

async fn handle_connect(
    mut client: TcpStream,
    authority: &str,
    ca: Arc<CertificateAuthority>,
    state: AppState,
    upstream_tls: Arc<ClientConfig>,
) -> anyhow::Result<()> {
    let (host, _port) = split_host_and_port(authority, 443);
    let server_config = ca.tls_config_for(&host).context("building MITM server config")?;

    client.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;

    let acceptor = TlsAcceptor::from(server_config);
    let tls_stream = acceptor.accept(client).await?;
    let mut tls_stream = TlsStream::from(tls_stream);

    let mut request_count = 0u32;
    loop {
        request_count += 1;
        let request_dump = match read_raw_message(&mut tls_stream, MessageKind::Request).await {
            Ok(Some(dump)) => dump,
            Ok(None) => break,
            Err(err) => {
                if request_count == 1 {
                    let _ = respond_with_status(&mut tls_stream, 400, "Bad Request", &err.to_string()).await;
                }
                break;
            }
        };

        let parsed = match http::parse_raw_request(&request_dump) {
            Ok(p) => p,
            Err(err) => {
                let _ = respond_with_status(&mut tls_stream, 400, "Bad Request", &err.to_string()).await;
                break;
            }
        };

        let keep_alive = client_wants_keep_alive(&parsed.version, &parsed);
        let path = parsed.path.clone();
        let dump = rewrite_request_path(&request_dump, &path);

        if !process_one_exchange(&mut tls_stream, "https", &host, 443, dump, &state, &upstream_tls, true).await? {
            break;
        }
        if !keep_alive {
            break;
        }
    }

    Ok(())
}

/// Run one request/response exchange: gate the request through
/// interception, dial a fresh upstream connection (no keep-alive
/// upstream), forward, record the transaction, gate the response, write
/// it back to the client. Returns whether the client connection should stay
/// open for another request.
#[allow(clippy::too_many_arguments)]
async fn process_one_exchange<C>(
    client: &mut C,
    scheme: &str,
    host: &str,
    port: u16,
    request_dump: Vec<u8>,
    state: &AppState,
    upstream_tls: &Arc<ClientConfig>,
    is_tls: bool,
) -> anyhow::Result<bool>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut tx = HTTPTransaction::new(scheme, host, port, request_dump.clone());
    state.transactions.append(tx.clone()).await;

    let decision = state
        .intercept
        .enqueue(tx.id, InterceptPhase::Request, request_dump)
        .await;

    let (outgoing_dump, also_intercept_response) = match decision {
        Decision::Drop => {
            tx.state = TransactionState::Dropped;
            state.transactions.update(tx).await;
            let _ = respond_with_status(client, 502, "Bad Gateway", "request dropped by interception").await;
            return Ok(true);
        }
        Decision::Forward { dump, intercept_response } => (dump, intercept_response),
    };

    // A user-edited Host header during interception re-resolves the dial
    // target from the edited dump rather than the originally captured one.
    let (dial_host, dial_port) = redial_target(&outgoing_dump, host, port);

    tx.state = TransactionState::Forwarding;
    tx.request_dump = outgoing_dump.clone();
    state.transactions.update(tx.clone()).await;

    let upstream = match connect_upstream(&dial_host, dial_port, is_tls, upstream_tls.clone()).await {
        Ok(stream) => stream,
        Err(err) => {
            tx.state = TransactionState::Failed;
            tx.error = Some(err.to_string());
            state.transactions.update(tx).await;
            let _ = respond_with_status(client, 502, "Bad Gateway", "upstream connection failed").await;
            return Ok(true);
        }
    };

    let mut upstream = upstream;
    if let Err(err) = upstream.write_all(&outgoing_dump).await {
        tx.state = TransactionState::Failed;
        tx.error = Some(err.to_string());
        state.transactions.update(tx).await;
        let _ = respond_with_status(client, 502, "Bad Gateway", "upstream write failed").await;
        return Ok(true);
    }

    tx.state = TransactionState::QueuedForResponse;
    state.transactions.update(tx.clone()).await;

    let response_dump = match read_raw_message(&mut upstream, MessageKind::Response).await {
        Ok(Some(dump)) => dump,
        Ok(None) => {
            tx.state = TransactionState::Failed;
            tx.error = Some("upstream closed without a response".to_string());
            state.transactions.update(tx).await;
            let _ = respond_with_status(client, 502, "Bad Gateway", "no response from upstream").await;
            return Ok(true);
        }
        Err(err) => {
            tx.state = TransactionState::Failed;
            tx.error = Some(err.to_string());
            state.transactions.update(tx).await;
            let _ = respond_with_status(client, 502, "Bad Gateway", "malformed upstream response").await;
            return Ok(true);
        }
    };

    let final_response = if also_intercept_response {
        tx.waiting_for_response = true;
        tx.intercept_response = true;
        state.transactions.update(tx.clone()).await;
        match state.intercept.enqueue(tx.id, InterceptPhase::Response, response_dump).await {
            Decision::Drop => {
                tx.state = TransactionState::Dropped;
                state.transactions.update(tx).await;
                let _ = respond_with_status(client, 502, "Bad Gateway", "response dropped by interception").await;
                return Ok(true);
            }
            Decision::Forward { dump, .. } => dump,
        }
    } else {
        response_dump
    };

    let keep_alive = response_allows_keep_alive(&final_response);

    tx.state = TransactionState::Completed;
    tx.response_dump = Some(final_response.clone());
    tx.waiting_for_response = false;
    state.transactions.update(tx.clone()).await;
    state.events.publish(Event::NewTransaction(Box::new(tx)));

    client.write_all(&final_response).await?;
    Ok(keep_alive)
}

fn redial_target(dump: &[u8], fallback_host: &str, fallback_port: u16) -> (String, u16) {
    if let Ok(parsed) = http::parse_raw_request(dump) {
        if let Some(host_header) = parsed.host() {
            return split_host_and_port(host_header, fallback_port);
        }
    }
    (fallback_host.to_string(), fallback_port)
}

async fn connect_upstream(host: &str, port: u16, is_tls: bool, tls_config: Arc<ClientConfig>) -> anyhow::Result<UpstreamStream> {
    let tcp = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;
    if !is_tls {
        return Ok(UpstreamStream::Plain(tcp));
    }
    let server_name = ServerName::try_from(host.to_string()).context("invalid upstream server name")?;
    let connector = TlsConnector::from(tls_config);
    let tls = connector.connect(server_name, tcp).await.context("upstream TLS handshake failed")?;
    Ok(UpstreamStream::Tls(TlsStream::from(tls)))
}

enum UpstreamStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            UpstreamStream::Tls(s) => std::pin::Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        data: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, data),
            UpstreamStream::Tls(s) => std::pin::Pin::new(s).poll_write(cx, data),
        }
    }
    fn poll_flush(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
            UpstreamStream::Tls(s) => std::pin::Pin::new(s).poll_flush(cx),
        }
    }
    fn poll_shutdown(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            UpstreamStream::Tls(s) => std::pin::Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Whether a request line's path is absolute-form, and if so what it
/// names; used to tell a true proxy request apart from a direct hit on the
/// proxy's own install/cert page.
enum Target {
    Upstream { scheme: String, host: String, port: u16, path: String },
    Self_(SelfResponse),
}

enum SelfResponse {
    InstallPage,
    RootCert,
}

impl SelfResponse {
    fn render(&self, ca: &CertificateAuthority) -> Vec<u8> {
        match self {
            SelfResponse::InstallPage => {
                let html = "<html><body><h1>Gleip</h1><p>Install the root CA from <a href=\"/cert\">/cert</a> to intercept HTTPS traffic.</p></body></html>";
                let mut out = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                    html.len()
                )
                .into_bytes();
                out.extend_from_slice(html.as_bytes());
                out
            }
            SelfResponse::RootCert => {
                let pem = ca.root_cert_pem();
                let mut out = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/x-x509-ca-cert\r\nContent-Length: {}\r\n\r\n",
                    pem.len()
                )
                .into_bytes();
                out.extend_from_slice(pem.as_bytes());
                out
            }
        }
    }
}

/// Resolve a plain (non-CONNECT) request's target: absolute-form URI,
/// origin-form with a `Host` header (transparent proxying), or the proxy's
/// own install page / root cert endpoint.
fn resolve_target(parsed: &http::ParsedRequest, default_scheme: &str, connect_host: Option<(&str, u16)>) -> Option<Target> {
    if let Some((host, port)) = connect_host {
        return Some(Target::Upstream {
            scheme: "https".to_string(),
            host: host.to_string(),
            port,
            path: parsed.path.clone(),
        });
    }

    if let Some(rest) = parsed.path.strip_prefix("http://") {
        return parse_absolute(rest, "http", 80);
    }
    if let Some(rest) = parsed.path.strip_prefix("https://") {
        return parse_absolute(rest, "https", 443);
    }

    if parsed.path == "/" {
        return Some(Target::Self_(SelfResponse::InstallPage));
    }
    if parsed.path == "/cert" {
        return Some(Target::Self_(SelfResponse::RootCert));
    }

    let host_header = parsed.host()?;
    let default_port = if default_scheme == "https" { 443 } else { 80 };
    let (host, port) = split_host_and_port(host_header, default_port);
    Some(Target::Upstream { scheme: default_scheme.to_string(), host, port, path: parsed.path.clone() })
}

fn parse_absolute(rest: &str, scheme: &str, default_port: u16) -> Option<Target> {
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = split_host_and_port(authority, default_port);
    Some(Target::Upstream { scheme: scheme.to_string(), host, port, path: path.to_string() })
}

fn split_host_and_port(input: &str, default_port: u16) -> (String, u16) {
    if let Some(idx) = input.rfind(':') {
        if let Ok(port) = input[idx + 1..].parse::<u16>() {
            return (input[..idx].to_string(), port);
        }
    }
    (input.to_string(), default_port)
}

/// Replace a request dump's request-line path with `new_path`, leaving
/// headers and body untouched byte-for-byte.
fn rewrite_request_path(dump: &[u8], new_path: &str) -> Vec<u8> {
    let (header_block, body) = http::split_headers_body(dump);
    let mut lines = header_block.split(|&b| b == b'\n');
    let first_line = lines.next().unwrap_or(&[]);
    let first_line = strip_cr(first_line);
    let rest: Vec<u8> = header_block[first_line.len()..].to_vec();

    let text = String::from_utf8_lossy(first_line);
    let mut tokens = text.splitn(3, ' ');
    let method = tokens.next().unwrap_or("GET");
    let _old_path = tokens.next().unwrap_or("/");
    let version = tokens.next().unwrap_or("HTTP/1.1");

    let mut out = format!("{method} {new_path} {version}").into_bytes();
    out.extend_from_slice(&rest);
    out.extend_from_slice(b"\r\n\r\n");
    out.extend_from_slice(&body);
    out
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') { &line[..line.len() - 1] } else { line }
}

fn client_wants_keep_alive(version: &str, parsed: &http::ParsedRequest) -> bool {
    match parsed.header("connection") {
        Some(v) if v.eq_ignore_ascii_case("close") => false,
        Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
        _ => version.contains("1.1"),
    }
}

fn response_allows_keep_alive(dump: &[u8]) -> bool {
    match http::parse_raw_response(dump) {
        Ok(parsed) => match parsed.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            _ => parsed.version.contains("1.1"),
        },
        Err(_) => false,
    }
}

async fn respond_with_status<W: AsyncWrite + Unpin>(writer: &mut W, code: u16, reason: &str, body: &str) -> anyhow::Result<()> {
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    writer.write_all(response.as_bytes()).await?;
    Ok(())
}

#[derive(Clone, Copy)]
enum MessageKind {
    Request,
    Response,
}

/// Read one complete HTTP message (headers + body, chunk framing included
/// verbatim) from `stream`. Returns `Ok(None)` on a clean EOF before any
/// bytes were read — the ordinary end of a keep-alive connection.
async fn read_raw_message<S>(stream: &mut S, kind: MessageKind) -> anyhow::Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let (head_end, term_len) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            bail!("connection closed while reading headers");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(idx) = find(&buf, b"\r\n\r\n") {
            break (idx, 4);
        }
        if let Some(idx) = find(&buf, b"\n\n") {
            break (idx, 2);
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(HeadTooLarge(MAX_HEAD_BYTES).into());
        }
    };

    let mut head_with_terminator = buf[..head_end].to_vec();
    head_with_terminator.extend_from_slice(b"\r\n\r\n");
    let headers = match kind {
        MessageKind::Request => http::parse_raw_request(&head_with_terminator)?.headers,
        MessageKind::Response => http::parse_raw_response(&head_with_terminator)?.headers,
    };
    let status_code = match kind {
        MessageKind::Response => http::parse_raw_response(&head_with_terminator).ok().map(|r| r.status_code),
        MessageKind::Request => None,
    };

    let content_length = find_header(&headers, "content-length").and_then(|v| v.trim().parse::<usize>().ok());
    let is_chunked = find_header(&headers, "transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    let mut dump = buf[..head_end + term_len].to_vec();
    let already_read = buf[head_end + term_len..].to_vec();
    let mut reader = RawReader { prefix: already_read, pos: 0, stream };

    if is_chunked {
        let body = reader.read_chunked_raw().await?;
        dump.extend_from_slice(&body);
    } else if let Some(len) = content_length {
        let body = reader.read_exact_raw(len).await?;
        dump.extend_from_slice(&body);
    } else if matches!(kind, MessageKind::Response) && response_has_implicit_body(status_code) {
        let body = reader.read_to_eof().await?;
        dump.extend_from_slice(&body);
    }

    Ok(Some(dump))
}

fn response_has_implicit_body(status_code: Option<u16>) -> bool {
    !matches!(status_code, Some(100..=199) | Some(204) | Some(304))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}

/// Reads raw bytes for a message body, starting from whatever was already
/// pulled off the wire while looking for the header terminator.
struct RawReader<'a, S> {
    prefix: Vec<u8>,
    pos: usize,
    stream: &'a mut S,
}

impl<S: AsyncRead + Unpin> RawReader<'_, S> {
    async fn read_exact_raw(&mut self, n: usize) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        let available = self.prefix.len() - self.pos;
        let take = available.min(n);
        out.extend_from_slice(&self.prefix[self.pos..self.pos + take]);
        self.pos += take;

        let mut remaining = n - take;
        let mut chunk = [0u8; 8192];
        while remaining > 0 {
            let to_read = remaining.min(chunk.len());
            let got = self.stream.read(&mut chunk[..to_read]).await?;
            if got == 0 {
                bail!("connection closed mid-body");
            }
            out.extend_from_slice(&chunk[..got]);
            remaining -= got;
        }
        Ok(out)
    }

    async fn next_byte(&mut self) -> anyhow::Result<u8> {
        if self.pos < self.prefix.len() {
            let b = self.prefix[self.pos];
            self.pos += 1;
            return Ok(b);
        }
        let mut b = [0u8; 1];
        let got = self.stream.read(&mut b).await?;
        if got == 0 {
            bail!("connection closed mid-chunk");
        }
        Ok(b[0])
    }

    async fn read_until(&mut self, needle: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            out.push(self.next_byte().await?);
            if out.len() >= needle.len() && &out[out.len() - needle.len()..] == needle {
                return Ok(out);
            }
        }
    }

    /// Read a full chunked body, preserving chunk-size lines, chunk data,
    /// and trailer section exactly as received.
    async fn read_chunked_raw(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let size_line = self.read_until(b"\r\n").await?;
            out.extend_from_slice(&size_line);

            let size_text = String::from_utf8_lossy(&size_line);
            let size_token = size_text.trim_end().split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_token, 16)
                .map_err(|_| HttpCodecError::InvalidChunkSize(size_token.to_string()))?;

            if size == 0 {
                loop {
                    let trailer_line = self.read_until(b"\r\n").await?;
                    out.extend_from_slice(&trailer_line);
                    if trailer_line == b"\r\n" {
                        break;
                    }
                }
                break;
            }

            let data = self.read_exact_raw(size).await?;
            out.extend_from_slice(&data);
            let crlf = self.read_exact_raw(2).await?;
            out.extend_from_slice(&crlf);
        }
        Ok(out)
    }

    async fn read_to_eof(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut out = self.prefix[self.pos..].to_vec();
        self.pos = self.prefix.len();
        let mut chunk = [0u8; 8192];
        loop {
            let got = self.stream.read(&mut chunk).await?;
            if got == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..got]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_content_length_request_verbatim() {
        let (mut client, mut server) = duplex(4096);
        let request = b"POST /submit HTTP/1.1\r\nHost: example.test\r\nContent-Length: 5\r\n\r\nhello";
        client.write_all(request).await.unwrap();
        drop(client);

        let dump = read_raw_message(&mut server, MessageKind::Request).await.unwrap().unwrap();
        assert_eq!(dump, request);
    }

    #[tokio::test]
    async fn reads_chunked_response_preserving_framing() {
        let (mut client, mut server) = duplex(4096);
        let response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        client.write_all(response).await.unwrap();
        drop(client);

        let dump = read_raw_message(&mut server, MessageKind::Response).await.unwrap().unwrap();
        assert_eq!(dump, response);
    }

    #[tokio::test]
    async fn returns_none_on_clean_eof_before_any_bytes() {
        let (client, mut server) = duplex(4096);
        drop(client);
        let result = read_raw_message(&mut server, MessageKind::Request).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn rewrite_request_path_preserves_headers_and_body() {
        let dump = b"GET http://example.test/old HTTP/1.1\r\nHost: example.test\r\n\r\n";
        let rewritten = rewrite_request_path(dump, "/new");
        let parsed = http::parse_raw_request(&rewritten).unwrap();
        assert_eq!(parsed.path, "/new");
        assert_eq!(parsed.host(), Some("example.test"));
    }

    #[test]
    fn resolve_target_reads_absolute_form_uri() {
        let dump = b"GET http://example.test:8080/widgets HTTP/1.1\r\nHost: example.test\r\n\r\n";
        let parsed = http::parse_raw_request(dump).unwrap();
        let target = resolve_target(&parsed, "http", None).unwrap();
        match target {
            Target::Upstream { host, port, path, .. } => {
                assert_eq!(host, "example.test");
                assert_eq!(port, 8080);
                assert_eq!(path, "/widgets");
            }
            Target::Self_(_) => panic!("expected upstream target"),
        }
    }

    #[test]
    fn resolve_target_serves_self_install_page() {
        let dump = b"GET / HTTP/1.1\r\nHost: 127.0.0.1:9090\r\n\r\n";
        let parsed = http::parse_raw_request(dump).unwrap();
        assert!(matches!(resolve_target(&parsed, "http", None), Some(Target::Self_(SelfResponse::InstallPage))));
    }

    #[test]
    fn resolve_target_serves_self_root_cert() {
        let dump = b"GET /cert HTTP/1.1\r\nHost: 127.0.0.1:9090\r\n\r\n";
        let parsed = http::parse_raw_request(dump).unwrap();
        assert!(matches!(resolve_target(&parsed, "http", None), Some(Target::Self_(SelfResponse::RootCert))));
    }
}
