//! HTTP/1.1 wire-format codec and utilities.
//!
//! Gleip's canonical representation of a request or response is the raw wire
//! dump, not a pre-parsed struct (see spec §3/§9) — these functions derive
//! parsed views from a dump on demand rather than owning the data. Grounded
//! on the teacher's `httparse`-based line reading in `proxy/server.rs`
//! (`read_http_request`, `read_response_head`), with gzip/brotli handling
//! grounded on the sibling `cursor-proxy` example's body decompression.

use crate::error::HttpCodecError;

/// A parsed view over a raw request dump. Borrows nothing; owns copies of
/// the pieces callers actually want, so the dump itself stays the source of
/// truth.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// True when the request line names HTTP/2. Retained as a hint only —
    /// this codec always speaks HTTP/1.1 on the wire.
    pub is_http2_hint: bool,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }
}

/// A parsed view over a raw response dump.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Tolerate bare `\n` line endings by normalizing to `\r\n`, the way browsers
/// and curl both happily send either. Everything downstream assumes CRLF.
fn normalize_to_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\n' && out.last() != Some(&b'\r') {
            out.push(b'\r');
            out.push(b'\n');
        } else {
            out.push(data[i]);
        }
        i += 1;
    }
    out
}

/// Split a dump into its header block (without the trailing blank line) and
/// body, both as byte slices of a normalized copy. Returns `(headers, body)`.
pub fn split_headers_body(dump: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let normalized = normalize_to_crlf(dump);
    match find_subslice(&normalized, b"\r\n\r\n") {
        Some(idx) => (
            normalized[..idx].to_vec(),
            normalized[idx + 4..].to_vec(),
        ),
        None => (normalized, Vec::new()),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_lines(block: &[u8]) -> Vec<&[u8]> {
    block.split(|&b| b == b'\n').map(strip_trailing_cr).collect()
}

fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn parse_header_lines(lines: &[&[u8]]) -> Vec<(String, String)> {
    let mut headers = Vec::with_capacity(lines.len());
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(line);
        if let Some(colon) = text.find(':') {
            let name = text[..colon].trim().to_string();
            let value = text[colon + 1..].trim().to_string();
            if !name.is_empty() {
                headers.push((name, value));
            }
        }
    }
    headers
}

/// Parse a raw request dump into method, path, version, headers and body.
pub fn parse_raw_request(dump: &[u8]) -> Result<ParsedRequest, HttpCodecError> {
    let (header_block, body) = split_headers_body(dump);
    let lines = split_lines(&header_block);
    let request_line = lines.first().copied().unwrap_or(&[]);
    let request_line_text = String::from_utf8_lossy(request_line);

    let tokens: Vec<&str> = request_line_text.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(HttpCodecError::MalformedRequestLine);
    }

    let method = tokens[0].to_string();
    let path = tokens[1].to_string();
    let version = tokens[2].to_string();
    let is_http2_hint = version.starts_with("HTTP/2");

    let headers = parse_header_lines(&lines[1..]);

    Ok(ParsedRequest {
        method,
        path,
        version,
        headers,
        body,
        is_http2_hint,
    })
}

/// Parse a raw response dump into version, status, reason, headers and body.
pub fn parse_raw_response(dump: &[u8]) -> Result<ParsedResponse, HttpCodecError> {
    let (header_block, body) = split_headers_body(dump);
    let lines = split_lines(&header_block);
    let status_line = lines.first().copied().unwrap_or(&[]);
    let status_line_text = String::from_utf8_lossy(status_line);

    let mut parts = status_line_text.splitn(3, ' ');
    let version = parts.next().unwrap_or("").to_string();
    let code_str = parts.next().unwrap_or("");
    let reason = parts.next().unwrap_or("").to_string();

    if version.is_empty() || code_str.is_empty() {
        return Err(HttpCodecError::MalformedResponseLine);
    }
    let status_code: u16 = code_str
        .parse()
        .map_err(|_| HttpCodecError::MalformedResponseLine)?;

    let headers = parse_header_lines(&lines[1..]);

    Ok(ParsedResponse {
        version,
        status_code,
        reason,
        headers,
        body,
    })
}

/// Replace (or remove) the `Content-Length` header in a dump to match
/// `new_body_len`, leaving everything else byte-for-byte untouched.
///
/// When `new_body_len > 0` a single `Content-Length: n` header is inserted
/// or overwritten. When `new_body_len == 0` any existing `Content-Length` is
/// dropped, so the postcondition "none exists when n == 0" holds regardless
/// of whether the original dump carried one.
pub fn update_content_length(dump: &[u8], new_body_len: usize) -> Vec<u8> {
    let (header_block, body) = split_headers_body(dump);
    let lines = split_lines(&header_block);
    let request_line = lines.first().copied().unwrap_or(&[]).to_vec();

    let mut out_lines: Vec<Vec<u8>> = vec![request_line];
    let mut inserted = false;
    for line in lines.iter().skip(1) {
        if line.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(line);
        let is_content_length = text
            .split(':')
            .next()
            .map(|n| n.trim().eq_ignore_ascii_case("content-length"))
            .unwrap_or(false);
        if is_content_length {
            if new_body_len > 0 && !inserted {
                out_lines.push(format!("Content-Length: {new_body_len}").into_bytes());
                inserted = true;
            }
            continue;
        }
        out_lines.push(line.to_vec());
    }
    if new_body_len > 0 && !inserted {
        out_lines.push(format!("Content-Length: {new_body_len}").into_bytes());
    }

    let mut out = out_lines.join(&b"\r\n"[..]);
    out.extend_from_slice(b"\r\n\r\n");
    out.extend_from_slice(&body);
    out
}

/// Decode a chunked-transfer-encoded body into its plain bytes.
pub fn decode_chunked(body: &[u8]) -> Result<Vec<u8>, HttpCodecError> {
    let mut out = Vec::with_capacity(body.len());
    let mut cursor = 0usize;

    loop {
        let line_end = find_subslice(&body[cursor..], b"\r\n")
            .map(|i| cursor + i)
            .ok_or(HttpCodecError::ShortChunk)?;
        let size_line = &body[cursor..line_end];
        let size_text = String::from_utf8_lossy(size_line);
        let size_token = size_text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_token, 16)
            .map_err(|_| HttpCodecError::InvalidChunkSize(size_token.to_string()))?;

        cursor = line_end + 2;
        if size == 0 {
            break;
        }

        if cursor + size > body.len() {
            return Err(HttpCodecError::ShortChunk);
        }
        out.extend_from_slice(&body[cursor..cursor + size]);
        cursor += size;

        if cursor + 2 > body.len() || &body[cursor..cursor + 2] != b"\r\n" {
            return Err(HttpCodecError::ShortChunk);
        }
        cursor += 2;
    }

    Ok(out)
}

/// Encode plain bytes as a chunked-transfer-encoded body, in fixed-size
/// chunks. Not named directly by the spec, but required for
/// `decode_chunked(encode_chunked(body)) == body` to hold.
pub fn encode_chunked(body: &[u8]) -> Vec<u8> {
    const CHUNK_SIZE: usize = 8192;
    let mut out = Vec::with_capacity(body.len() + 64);
    for chunk in body.chunks(CHUNK_SIZE.max(1)) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// Decompress a body given its `Content-Encoding` token (`gzip`, `br`, or
/// `identity`/empty, which is a no-op). Any other token is an error.
pub fn decompress(body: &[u8], encoding: &str) -> Result<Vec<u8>, HttpCodecError> {
    use std::io::Read;

    match encoding.trim().to_ascii_lowercase().as_str() {
        "" | "identity" => Ok(body.to_vec()),
        "gzip" | "x-gzip" => {
            let mut decoder = flate2::read::GzDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| HttpCodecError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
        "deflate" => {
            let mut decoder = flate2::read::ZlibDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| HttpCodecError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
        "br" => {
            let mut out = Vec::new();
            let mut decoder = brotli::Decompressor::new(body, 4096);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| HttpCodecError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
        other => Err(HttpCodecError::UnsupportedEncoding(other.to_string())),
    }
}

/// Whether `body` starts with the gzip magic bytes, used as a fallback when
/// no `Content-Encoding` header is present but the body is gzipped anyway
/// (seen in the wild from misconfigured origins).
fn looks_like_gzip(body: &[u8]) -> bool {
    body.len() >= 2 && body[0] == 0x1f && body[1] == 0x8b
}

/// Build a human-readable rendition of a response dump: chunked framing is
/// decoded, and if `should_decompress` the body is decompressed and
/// `Content-Encoding`/chunked `Transfer-Encoding` headers are dropped. On
/// decode or decompression failure the original bytes and headers are left
/// untouched. Invalid UTF-8 in the final bytes is replaced with U+FFFD.
pub fn make_printable(dump: &[u8], should_decompress: bool) -> String {
    let (header_block, raw_body) = split_headers_body(dump);
    let lines = split_lines(&header_block);
    let request_line = lines.first().copied().unwrap_or(&[]).to_vec();
    let mut header_lines: Vec<Vec<u8>> = lines.iter().skip(1).map(|l| l.to_vec()).collect();

    let is_chunked = header_lines.iter().any(|l| {
        let text = String::from_utf8_lossy(l);
        text.split(':').next().map(|n| n.trim().eq_ignore_ascii_case("transfer-encoding")).unwrap_or(false)
            && text.to_ascii_lowercase().contains("chunked")
    });

    let mut body = raw_body.clone();
    let mut dechunked_ok = true;
    if is_chunked {
        match decode_chunked(&raw_body) {
            Ok(decoded) => {
                body = decoded;
                header_lines.retain(|l| {
                    !String::from_utf8_lossy(l)
                        .split(':')
                        .next()
                        .map(|n| n.trim().eq_ignore_ascii_case("transfer-encoding"))
                        .unwrap_or(false)
                });
            }
            Err(_) => {
                dechunked_ok = false;
            }
        }
    }

    if should_decompress && dechunked_ok {
        let content_encoding = header_lines
            .iter()
            .find_map(|l| {
                let text = String::from_utf8_lossy(l);
                let mut parts = text.splitn(2, ':');
                let name = parts.next()?.trim();
                if name.eq_ignore_ascii_case("content-encoding") {
                    Some(parts.next()?.trim().to_string())
                } else {
                    None
                }
            })
            .unwrap_or_default();

        let encoding = if content_encoding.is_empty() && looks_like_gzip(&body) {
            "gzip".to_string()
        } else {
            content_encoding.clone()
        };

        if !encoding.is_empty() {
            if let Ok(decoded) = decompress(&body, &encoding) {
                body = decoded;
                header_lines.retain(|l| {
                    !String::from_utf8_lossy(l)
                        .split(':')
                        .next()
                        .map(|n| n.trim().eq_ignore_ascii_case("content-encoding"))
                        .unwrap_or(false)
                });
            }
        }
    }

    let body_changed = body.len() != raw_body.len();

    let mut rendered = Vec::with_capacity(body.len() + 256);
    rendered.extend_from_slice(&request_line);
    rendered.extend_from_slice(b"\r\n");
    for line in &header_lines {
        let is_content_length = String::from_utf8_lossy(line)
            .split(':')
            .next()
            .map(|n| n.trim().eq_ignore_ascii_case("content-length"))
            .unwrap_or(false);
        if body_changed && is_content_length {
            continue;
        }
        rendered.extend_from_slice(line);
        rendered.extend_from_slice(b"\r\n");
    }
    if body_changed {
        rendered.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    rendered.extend_from_slice(b"\r\n");
    rendered.extend_from_slice(&body);

    String::from_utf8_lossy(&rendered).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_request() {
        let dump = b"GET /foo/bar?x=1 HTTP/1.1\r\nHost: example.test\r\nX-Thing: value\r\n\r\n";
        let parsed = parse_raw_request(dump).unwrap();
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/foo/bar?x=1");
        assert_eq!(parsed.version, "HTTP/1.1");
        assert_eq!(parsed.host(), Some("example.test"));
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn tolerates_bare_lf_line_endings() {
        let dump = b"POST /submit HTTP/1.1\nHost: example.test\nContent-Length: 4\n\nabcd";
        let parsed = parse_raw_request(dump).unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.body, b"abcd");
    }

    #[test]
    fn rejects_malformed_request_line() {
        let dump = b"GET HTTP/1.1\r\n\r\n";
        assert!(matches!(
            parse_raw_request(dump),
            Err(HttpCodecError::MalformedRequestLine)
        ));
    }

    #[test]
    fn parses_response_with_reason_phrase() {
        let dump = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let parsed = parse_raw_response(dump).unwrap();
        assert_eq!(parsed.status_code, 404);
        assert_eq!(parsed.reason, "Not Found");
    }

    #[test]
    fn update_content_length_inserts_when_missing() {
        let dump = b"GET / HTTP/1.1\r\nHost: example.test\r\n\r\n";
        let updated = update_content_length(dump, 5);
        let parsed = parse_raw_request(&updated).unwrap();
        assert_eq!(parsed.header("content-length"), Some("5"));
    }

    #[test]
    fn update_content_length_removes_on_zero() {
        let dump = b"POST / HTTP/1.1\r\nHost: example.test\r\nContent-Length: 10\r\n\r\n0123456789";
        let updated = update_content_length(dump, 0);
        let parsed = parse_raw_request(&updated).unwrap();
        assert_eq!(parsed.header("content-length"), None);
    }

    #[test]
    fn chunked_round_trip() {
        let body = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let encoded = encode_chunked(&body);
        let decoded = decode_chunked(&encoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn decode_chunked_rejects_short_chunk() {
        let malformed = b"5\r\nabc";
        assert!(matches!(
            decode_chunked(malformed),
            Err(HttpCodecError::ShortChunk)
        ));
    }

    #[test]
    fn decompress_gzip_round_trip() {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello gzip world").unwrap();
        let compressed = encoder.finish().unwrap();

        let decompressed = decompress(&compressed, "gzip").unwrap();
        assert_eq!(decompressed, b"hello gzip world");
    }

    #[test]
    fn decompress_unsupported_encoding_errors() {
        let result = decompress(b"whatever", "zstd");
        assert!(matches!(result, Err(HttpCodecError::UnsupportedEncoding(_))));
    }

    #[test]
    fn make_printable_decodes_chunked_and_drops_framing_header() {
        let body = b"chunked payload data".to_vec();
        let encoded_body = encode_chunked(&body);
        let mut dump = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        dump.extend_from_slice(&encoded_body);

        let printable = make_printable(&dump, true);
        assert!(printable.contains("chunked payload data"));
        assert!(!printable.to_ascii_lowercase().contains("transfer-encoding"));
    }

    #[test]
    fn make_printable_updates_content_length_when_body_changes() {
        let body = b"hello world".to_vec();
        let encoded_body = encode_chunked(&body);
        let mut dump = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 999\r\n\r\n".to_vec();
        dump.extend_from_slice(&encoded_body);

        let printable = make_printable(&dump, true);
        assert!(printable.contains(&format!("Content-Length: {}", body.len())));
        assert!(!printable.contains("Content-Length: 999"));
    }

    #[test]
    fn make_printable_preserves_body_on_failed_decompression() {
        let dump = b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\n\r\nnot actually gzip".to_vec();
        let printable = make_printable(&dump, true);
        assert!(printable.contains("Content-Encoding: gzip"));
        assert!(printable.contains("not actually gzip"));
    }
}
