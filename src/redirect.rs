//! 3xx redirect handling (`spec.md` §4.5).

use http::StatusCode;
use url::Url;

use crate::error::{Error, Result};
use crate::pool::Origin;
use crate::request::{Method, Request};

/// The hard cap on redirect-chain length (`spec.md` §4.5).
pub const MAX_REDIRECTS: usize = 30;

/// True if `status` is one of the redirect codes this driver follows.
pub fn is_redirect_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Tracks the chain of URLs visited across a single logical request's
/// redirects, enforcing the 30-hop limit.
#[derive(Debug, Default)]
pub struct RedirectChain {
    visited: Vec<Url>,
    max_redirects: usize,
}

impl RedirectChain {
    /// Starts a chain seeded with the request's initial URL.
    pub fn new(initial: Url) -> Self {
        RedirectChain {
            visited: vec![initial],
            max_redirects: MAX_REDIRECTS,
        }
    }

    /// Records a hop to `next`. Fails once the chain has already reached
    /// [`MAX_REDIRECTS`] entries, without appending the over-limit hop, so
    /// the chain carried by the resulting error has exactly `max_redirects`
    /// entries (`spec.md` §4.5, §8 scenario 4).
    pub fn record(&mut self, next: Url) -> Result<()> {
        if self.visited.len() >= self.max_redirects {
            return Err(Error::too_many_redirects(self.visited.clone()));
        }
        self.visited.push(next);
        Ok(())
    }

    /// The chain of URLs visited so far, in order.
    pub fn visited(&self) -> &[Url] {
        &self.visited
    }
}

/// Rewrites `request` in place to follow a redirect to `location`,
/// applying the method-rewrite and cross-origin `Authorization`-stripping
/// rules from `spec.md` §4.5.
///
/// `retain_authorization_cross_origin` corresponds to facade configuration
/// that explicitly opts back into sending `Authorization` across origins;
/// the default (`false`) strips it.
pub fn apply_redirect(
    request: &mut Request,
    status: StatusCode,
    location: &str,
    retain_authorization_cross_origin: bool,
) -> Result<Url> {
    let new_url = request
        .url()
        .join(location)
        .map_err(|e| Error::http_parse(e).with_url(request.url().clone()))?;

    let cross_origin = Origin::from_url(&new_url) != Origin::from_url(request.url());

    match status.as_u16() {
        303 => request.rewrite_to_get(),
        301 | 302 if !matches!(request.method(), Method::Get | Method::Head) => {
            request.rewrite_to_get();
        }
        307 | 308 | 301 | 302 => {}
        _ => unreachable!("apply_redirect called for a non-redirect status"),
    }

    if cross_origin && !retain_authorization_cross_origin {
        request.headers_mut().remove(&http::header::AUTHORIZATION);
    }

    *request.url_mut() = new_url.clone();
    Ok(new_url)
}
