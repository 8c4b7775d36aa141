//! One request/response envelope shape shared by every RPC surface.
//!
//! Grounded in the teacher's `Request { id, op, params }` /
//! `Response { id, ok, result|error }` JSON envelope, generalized from JSON
//! text to a binary `rmp-serde` payload and from a string `id` to a
//! monotonically increasing `u64 request_id` that responses echo back.

use serde::{Deserialize, Serialize};

/// A request carrying a surface-specific payload `P`, identified by a
/// `request_id` the matching response echoes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request<P> {
    /// Monotonically increasing id assigned by the caller; used by async
    /// client modes to correlate a later response with this request.
    pub request_id: u64,
    /// The operation-specific payload.
    pub payload: P,
}

impl<P> Request<P> {
    /// Construct a request for `request_id`.
    pub fn new(request_id: u64, payload: P) -> Self {
        Request { request_id, payload }
    }
}

/// An error surfaced in a [`Response`], carrying a stable code plus a
/// human-readable message. Never a catch-all `Box<dyn Error>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// Stable, machine-matchable error code (e.g. `"Wounded"`, `"NotLeader"`).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl ApiError {
    /// Construct an error with the given code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A response echoing its request's `request_id`, carrying either `Ok(R)`
/// or an [`ApiError`] — never both, matching the teacher's `ok` discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response<R> {
    /// Echoes the originating request's `request_id`.
    pub request_id: u64,
    /// The operation's outcome.
    pub outcome: Result<R, ApiError>,
}

impl<R> Response<R> {
    /// Build a success response.
    pub fn ok(request_id: u64, result: R) -> Self {
        Response {
            request_id,
            outcome: Ok(result),
        }
    }

    /// Build an error response.
    pub fn err(request_id: u64, error: ApiError) -> Self {
        Response {
            request_id,
            outcome: Err(error),
        }
    }
}

/// Encode a value to the on-wire binary representation.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec(value)
}

/// Decode a value from the on-wire binary representation.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_through_bytes() {
        let req = Request::new(7, "hello".to_string());
        let bytes = encode(&req).unwrap();
        let decoded: Request<String> = decode(&bytes).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn success_response_roundtrips() {
        let resp: Response<u32> = Response::ok(3, 42);
        let bytes = encode(&resp).unwrap();
        let decoded: Response<u32> = decode(&bytes).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn error_response_roundtrips_and_preserves_request_id() {
        let resp: Response<u32> = Response::err(9, ApiError::new("Wounded", "ticket 3 wounded"));
        let bytes = encode(&resp).unwrap();
        let decoded: Response<u32> = decode(&bytes).unwrap();
        assert_eq!(decoded.request_id, 9);
        assert!(decoded.outcome.is_err());
    }
}
