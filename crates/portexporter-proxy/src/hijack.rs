//! One-shot takeover of the client connection for CONNECT
//!
//! A request starts out answerable with an ordinary HTTP response. Taking
//! its [`Hijack`] handle and awaiting [`Hijack::into_stream`] moves the
//! connection into raw byte mode once the response has been written; no
//! further HTTP semantics apply after that.

use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::Request;
use hyper_util::rt::TokioIo;

/// Ownership of a client connection that will leave HTTP after the response
#[derive(Debug)]
pub struct Hijack(OnUpgrade);

impl Hijack {
    /// Take the handle out of the request
    ///
    /// `None` when the connection cannot be hijacked, or was already taken.
    pub fn take<B>(req: &mut Request<B>) -> Option<Self> {
        req.extensions_mut().remove::<OnUpgrade>().map(Self)
    }

    /// Wait for the response to be flushed and return the raw connection
    pub async fn into_stream(self) -> Result<TokioIo<Upgraded>, hyper::Error> {
        self.0.await.map(TokioIo::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_request_cannot_be_hijacked() {
        let mut req = Request::builder()
            .method("CONNECT")
            .uri("example.com:443")
            .body(())
            .unwrap();
        assert!(Hijack::take(&mut req).is_none());
    }
}
