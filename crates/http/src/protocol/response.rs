//! Response header wrapper over the `http` crate types.

use http::response::Parts;
use http::{HeaderMap, Response, StatusCode, Version};

/// An HTTP response's head: status, version and headers, no body.
#[derive(Debug)]
pub struct ResponseHead {
    inner: Response<()>,
}

impl AsRef<Response<()>> for ResponseHead {
    fn as_ref(&self) -> &Response<()> {
        &self.inner
    }
}

impl ResponseHead {
    pub fn from_parts(parts: Parts) -> Self {
        Self { inner: Response::from_parts(parts, ()) }
    }

    pub fn into_inner(self) -> Response<()> {
        self.inner
    }

    pub fn body<T>(self, body: T) -> Response<T> {
        self.inner.map(|()| body)
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    /// Whether this status forbids a message body (1xx, 204, 304).
    pub fn bodyless_status(&self) -> bool {
        let status = self.status();
        status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
    }
}

impl From<Response<()>> for ResponseHead {
    #[inline]
    fn from(inner: Response<()>) -> Self {
        Self { inner }
    }
}
