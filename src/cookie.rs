//! The cookie jar capability (`spec.md` §4.8, §9 "Global default client").
//!
//! Persistence and cross-origin policy are explicitly left to the embedder
//! (`spec.md` §1 Non-goals, §9 Open Questions: "the spec leaves this to the
//! cookie jar collaborator; do not guess") — this module only defines the
//! interface the [`crate::client::Client`] facade calls into.

use http::HeaderValue;
use url::Url;

/// A pluggable cookie store a [`crate::client::Client`] may consult before
/// each request and update after each response, when `handle_cookies` is
/// enabled (`spec.md` §4.8).
///
/// No in-memory or persisted implementation ships with this crate; embed a
/// jar appropriate to the application (in-memory, file-backed, or shared
/// across a process).
pub trait CookieStore: Send + Sync {
    /// Returns the `Cookie` header value to attach to a request for `url`,
    /// if the jar holds anything applicable.
    fn cookies_for_url(&self, url: &Url) -> Option<HeaderValue>;

    /// Records every `Set-Cookie` value observed on a response from `url`.
    fn store_response_cookies(&self, url: &Url, set_cookie_values: &[HeaderValue]);
}
