//! Core data models for the offline proxy

use crate::error::{ProxyError, Result};
use bytes::Bytes;
use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Represents an inclusive byte range within a large object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if the range is valid
    /// * `Err(ProxyError)` if start > end
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(ProxyError::ParseError(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// Get the size of this byte range in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Resolve a client Range header against an object of `total_size` bytes
    ///
    /// Accepts `bytes=<start>-<end>` as well as `bytes <start>-<end>`.
    ///
    /// # Clamping rules
    /// - missing header, or a malformed one → the whole object
    /// - empty start → 0
    /// - empty end, or an end past the object → last byte
    /// - start after end → the whole object
    /// - start at or beyond `total_size` → `UnsatisfiableRange`
    pub fn resolve(header: Option<&str>, total_size: u64) -> Result<Self> {
        if total_size == 0 {
            return Err(ProxyError::UnsatisfiableRange(
                "object is empty".to_string(),
            ));
        }

        let last = total_size - 1;
        let whole = ByteRange { start: 0, end: last };

        let Some((start, end)) = header.and_then(split_range_header) else {
            return Ok(whole);
        };

        let start = if start.is_empty() {
            0
        } else {
            match start.parse::<u64>() {
                Ok(value) => value,
                Err(_) => return Ok(whole),
            }
        };

        let end = if end.is_empty() {
            last
        } else {
            match end.parse::<u64>() {
                Ok(value) => value.min(last),
                Err(_) => return Ok(whole),
            }
        };

        if start > last {
            return Err(ProxyError::UnsatisfiableRange(format!(
                "start {} is beyond object size {}",
                start, total_size
            )));
        }

        if start > end {
            return Ok(whole);
        }

        Ok(ByteRange { start, end })
    }

    /// Content-Range header value for a partial response
    pub fn to_content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

/// Split `bytes=a-b` / `bytes a-b` into its raw start and end parts.
/// Multi-range requests are not supported and read as malformed.
fn split_range_header(header: &str) -> Option<(&str, &str)> {
    let rest = header.trim().strip_prefix("bytes")?;
    let rest = rest
        .strip_prefix('=')
        .or_else(|| rest.strip_prefix(' '))?
        .trim();

    if rest.contains(',') {
        return None;
    }

    let (start, end) = rest.split_once('-')?;
    Some((start.trim(), end.trim()))
}

/// Glob-style URL matching
///
/// - `*` matches any sequence of characters
/// - a pattern without `*` matches exactly or as a prefix
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    if !pattern.contains('*') {
        return candidate == pattern || candidate.starts_with(pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];

    if candidate.len() < first.len() + last.len() {
        return false;
    }
    if !candidate.starts_with(first) || !candidate.ends_with(last) {
        return false;
    }

    // Middle parts must appear in order between the anchored prefix and suffix
    let mut window = &candidate[first.len()..candidate.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match window.find(part) {
            Some(pos) => window = &window[pos + part.len()..],
            None => return false,
        }
    }

    true
}

/// An intercepted client request
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: Method,
    /// Absolute URL on the origin
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptedRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        InterceptedRequest {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add a header, ignoring values that are not valid header text
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path component of the URL, or the raw URL when it cannot be parsed
    pub fn path(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.url.clone(),
        }
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        ProxyResponse {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header, ignoring values that are not valid header text
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Successful responses are anything below 400
    pub fn is_success(&self) -> bool {
        self.status.as_u16() < 400
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Identity of a request in the ephemeral response cache
///
/// Method plus normalized URL. The fragment is always dropped; the query is
/// kept unless the cache is configured to ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(method: &Method, url: &str, ignore_query: bool) -> Self {
        let normalized = match reqwest::Url::parse(url) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                if ignore_query {
                    parsed.set_query(None);
                }
                parsed.to_string()
            }
            Err(_) => {
                let without_fragment = url.split('#').next().unwrap_or(url);
                if ignore_query {
                    without_fragment
                        .split('?')
                        .next()
                        .unwrap_or(without_fragment)
                        .to_string()
                } else {
                    without_fragment.to_string()
                }
            }
        };

        RequestKey(format!("{} {}", method, normalized))
    }

    pub fn from_request(request: &InterceptedRequest, ignore_query: bool) -> Self {
        Self::new(&request.method, &request.url, ignore_query)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a matching cache rule does with a successful response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheAction {
    /// Commit a copy of the response into the ephemeral cache
    StoreResponse,
    /// Parse the response body and fetch a derived URL through the cache manager
    SecondaryFetch { url_template: String },
}

/// One entry in the ordered cache rule table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRule {
    /// HTTP method the rule applies to (case-insensitive)
    pub method: String,
    /// Glob pattern matched against the full request URL
    pub pattern: String,
    pub action: CacheAction,
}

impl CacheRule {
    pub fn store(method: &str, pattern: &str) -> Self {
        CacheRule {
            method: method.to_string(),
            pattern: pattern.to_string(),
            action: CacheAction::StoreResponse,
        }
    }

    pub fn secondary_fetch(method: &str, pattern: &str, url_template: &str) -> Self {
        CacheRule {
            method: method.to_string(),
            pattern: pattern.to_string(),
            action: CacheAction::SecondaryFetch {
                url_template: url_template.to_string(),
            },
        }
    }

    pub fn matches(&self, method: &Method, url: &str) -> bool {
        self.method.eq_ignore_ascii_case(method.as_str()) && glob_match(&self.pattern, url)
    }
}

/// Download state of a large object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadState {
    /// No record and no in-flight download
    Unknown,
    /// Exactly one download in progress
    Loading,
    /// Record and every chunk committed
    Available,
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadState::Unknown => write!(f, "unknown"),
            DownloadState::Loading => write!(f, "loading"),
            DownloadState::Available => write!(f, "available"),
        }
    }
}

/// Metadata describing a chunked large object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeObjectRecord {
    pub url: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub content_type: String,
}

impl LargeObjectRecord {
    pub fn new(url: impl Into<String>, total_size: u64, chunk_size: u64, content_type: impl Into<String>) -> Self {
        LargeObjectRecord {
            url: url.into(),
            total_size,
            chunk_size,
            chunk_count: total_size.div_ceil(chunk_size),
            content_type: content_type.into(),
        }
    }

    /// Byte range covered by the chunk at `index`
    pub fn chunk_range(&self, index: u64) -> Option<ByteRange> {
        if index >= self.chunk_count {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size) - 1;
        Some(ByteRange { start, end })
    }
}

/// A mutating request persisted for later replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedWriteRequest {
    /// Creation timestamp in milliseconds; also the sort and dedupe key
    pub id: u64,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: QueuedBody,
}

/// Body of a queued write
///
/// A JSON body keeps its parsed value next to the exact text that was sent.
/// Replay always sends the exact text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedBody {
    Json { value: serde_json::Value, raw: String },
    Text(String),
    #[default]
    Empty,
}

impl QueuedBody {
    pub fn from_bytes(body: &Bytes) -> Self {
        if body.is_empty() {
            return QueuedBody::Empty;
        }
        let text = match std::str::from_utf8(body) {
            Ok(text) => text.to_string(),
            Err(_) => {
                tracing::warn!("Queued request body is not UTF-8, storing lossy text");
                return QueuedBody::Text(String::from_utf8_lossy(body).into_owned());
            }
        };
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => QueuedBody::Json { value, raw: text },
            Err(_) => QueuedBody::Text(text),
        }
    }

    /// Parsed value of a JSON body
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            QueuedBody::Json { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Bytes to send on replay
    pub fn to_bytes(&self) -> Bytes {
        match self {
            QueuedBody::Json { raw, .. } => Bytes::from(raw.clone()),
            QueuedBody::Text(text) => Bytes::from(text.clone()),
            QueuedBody::Empty => Bytes::new(),
        }
    }
}

/// Headers that are recomputed on replay and never persisted
const UNPERSISTED_HEADERS: &[&str] = &["host", "content-length", "connection", "transfer-encoding"];

impl QueuedWriteRequest {
    pub fn from_request(id: u64, request: &InterceptedRequest) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in request.headers.iter() {
            if UNPERSISTED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else { continue };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        QueuedWriteRequest {
            id,
            url: request.url.clone(),
            method: request.method.as_str().to_string(),
            headers,
            body: QueuedBody::from_bytes(&request.body),
        }
    }

    /// Key under which this entry lives in the queue store
    pub fn storage_key(&self) -> String {
        queue_key(self.id)
    }

    /// Rebuild a request that can be re-issued against the origin
    pub fn to_request(&self) -> Result<InterceptedRequest> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| ProxyError::ParseError(format!("Invalid method {}: {}", self.method, e)))?;

        let mut request = InterceptedRequest::new(method, self.url.clone());
        for (name, value) in &self.headers {
            let name = http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::ParseError(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProxyError::ParseError(format!("Invalid header value: {}", e)))?;
            request.headers.insert(name, value);
        }

        request.body = self.body.to_bytes();

        Ok(request)
    }
}

/// Queue store key for an id; zero padded so lexical order is id order
pub fn queue_key(id: u64) -> String {
    format!("{:020}", id)
}
