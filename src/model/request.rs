//! Request entity, capture policy and factory.

use crate::model::random::random_string;
use crate::model::unix_now;
use bytes::{Bytes, BytesMut};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Length of a generated request id.
pub const REQUEST_ID_LENGTH: usize = 12;

/// Header whose first entry replaces the peer address.
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

/// Ordered string multimap used for headers and form fields.
pub type MultiMap = BTreeMap<String, Vec<String>>;

/// One captured inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Random id, unique within the owning bin
    pub id: String,
    /// Capture time (unix seconds)
    pub created: i64,
    pub method: String,
    pub proto: String,
    pub headers: MultiMap,
    /// Declared content length, -1 when unknown
    pub content_length: i64,
    pub remote_addr: String,
    pub host: String,
    pub request_uri: String,
    /// Body as stored, possibly truncated (see [`BodyLimit`])
    pub body: Bytes,
    pub form_value: MultiMap,
    /// Names of uploaded file fields; contents are never kept
    pub form_file: Vec<String>,
}

/// A request as decoded by the transport layer, before capture policy.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: String,
    pub proto: String,
    pub headers: MultiMap,
    pub content_length: i64,
    pub remote_addr: String,
    pub host: String,
    pub request_uri: String,
    pub body: Bytes,
    pub form_value: MultiMap,
    pub form_file: Vec<String>,
}

/// How much of a request body is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLimit {
    /// Keep every byte
    Unlimited,
    /// Keep at most this many bytes; zero keeps nothing
    Bytes(usize),
}

impl Default for BodyLimit {
    fn default() -> Self {
        BodyLimit::Bytes(10 * 1024)
    }
}

impl BodyLimit {
    /// Applies the limit to `body`.
    ///
    /// A body longer than the limit keeps its first `limit` bytes followed by
    /// a marker line recording the original length.
    pub fn apply(&self, body: Bytes) -> Bytes {
        match *self {
            BodyLimit::Unlimited => body,
            BodyLimit::Bytes(0) => Bytes::new(),
            BodyLimit::Bytes(limit) if body.len() > limit => {
                let marker = format!("\n<<<TRUNCATED , {} of {}", limit, body.len());
                let mut out = BytesMut::with_capacity(limit + marker.len());
                out.extend_from_slice(&body[..limit]);
                out.extend_from_slice(marker.as_bytes());
                out.freeze()
            }
            BodyLimit::Bytes(_) => body,
        }
    }
}

/// Turns [`RawRequest`]s into [`Request`]s using an injected generator.
#[derive(Debug)]
pub struct RequestFactory<R> {
    rng: R,
    body_limit: BodyLimit,
}

impl RequestFactory<SmallRng> {
    /// Creates a factory seeded from OS entropy.
    pub fn from_entropy(body_limit: BodyLimit) -> Self {
        Self::new(SmallRng::from_entropy(), body_limit)
    }
}

impl<R: Rng> RequestFactory<R> {
    pub fn new(rng: R, body_limit: BodyLimit) -> Self {
        Self { rng, body_limit }
    }

    pub fn body_limit(&self) -> BodyLimit {
        self.body_limit
    }

    /// Captures `raw` under a fresh id, applying the body limit and the
    /// forwarding-header address override.
    pub fn capture(&mut self, raw: RawRequest) -> Request {
        let remote_addr = forwarded_for(&raw.headers).unwrap_or(raw.remote_addr);

        Request {
            id: random_string(&mut self.rng, REQUEST_ID_LENGTH),
            created: unix_now(),
            method: raw.method,
            proto: raw.proto,
            headers: raw.headers,
            content_length: raw.content_length,
            remote_addr,
            host: raw.host,
            request_uri: raw.request_uri,
            body: self.body_limit.apply(raw.body),
            form_value: raw.form_value,
            form_file: raw.form_file,
        }
    }
}

/// First address listed in the forwarding header, if any.
fn forwarded_for(headers: &MultiMap) -> Option<String> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(FORWARDED_FOR_HEADER))
        .and_then(|(_, values)| values.first())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
}
