//! Request construction (`spec.md` §3, §6).

use bytes::Bytes;
use url::Url;

use crate::header::HeaderStore;
use crate::http1::body::BodySource;

/// An HTTP request method. `spec.md` §6 enumerates the accepted set;
/// anything else is a builder error at the facade layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    /// The uppercase ASCII wire form (`spec.md` §6: "method ... uppercased").
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// True for methods whose response, per HTTP semantics, never carries
    /// a body regardless of framing headers.
    pub fn is_bodyless_response(self) -> bool {
        matches!(self, Method::Head)
    }
}

/// A fully assembled request: origin + path/query, headers, and a body source.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderStore,
    pub(crate) body: BodySource,
}

impl Request {
    /// Starts building a request for `method url`.
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            method,
            url,
            headers: HeaderStore::new(),
            body: BodySource::None,
        }
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The target URL, mutably — used by the redirect driver to rewrite
    /// `Location`.
    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    /// Mutable access to the headers, for merging caller-supplied ones.
    pub fn headers_mut(&mut self) -> &mut HeaderStore {
        &mut self.headers
    }

    /// The headers.
    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    /// Sets the request body.
    pub fn set_body(&mut self, body: BodySource) {
        self.body = body;
    }

    /// The current body source.
    pub fn body(&self) -> &BodySource {
        &self.body
    }

    /// Rewrites this request to a bodyless GET, as 303 redirects always do
    /// and 301/302 do for non-GET/HEAD methods (`spec.md` §4.5).
    pub(crate) fn rewrite_to_get(&mut self) {
        self.method = Method::Get;
        self.body = BodySource::None;
        self.headers.remove(&http::header::CONTENT_LENGTH);
        self.headers.remove(&http::header::CONTENT_TYPE);
        self.headers.remove(&http::header::TRANSFER_ENCODING);
    }
}

/// Builds a `application/x-www-form-urlencoded` body from an ordered list
/// of key/value pairs (`spec.md` §6 "mapping → ... form urlencoded").
pub fn form_urlencoded_body(pairs: &[(String, String)]) -> crate::error::Result<Bytes> {
    serde_urlencoded::to_string(pairs)
        .map(Bytes::from)
        .map_err(crate::error::Error::body)
}

/// Builds a JSON body from any `Serialize` value (`spec.md` §6 "json: any
/// JSON-serializable value"). Falsey values still serialize and transmit.
pub fn json_body<T: serde::Serialize>(value: &T) -> crate::error::Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(crate::error::Error::body)
}

/// Percent-encodes `params` onto `url`'s query string, preserving
/// insertion order and repeating duplicate keys (`spec.md` §6).
pub fn append_query_params(url: &mut Url, params: &[(String, String)]) {
    let mut pairs = url.query_pairs_mut();
    for (k, v) in params {
        pairs.append_pair(k, v);
    }
}
