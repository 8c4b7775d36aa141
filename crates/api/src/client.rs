//! TCP RPC client correlating responses to requests by `request_id`.
//!
//! A background reader thread drains the socket and dispatches each
//! decoded response to whichever callback is waiting on its `request_id`.
//! [`RpcClient::call`] builds a blocking wait over that same callback
//! mechanism (a promise); [`RpcClient::call_async`] is the raw
//! callback-registration primitive. On timeout the pending record is
//! erased and the caller observes "no value", matching the source's
//! timeout semantics: expiry releases the caller without cancelling any
//! server-side work.

use crate::framing::{read_frame, write_frame};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use settlement_wire::{decode, encode, ApiError, Request, Response};
use std::collections::HashMap;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

type Callback<R> = Box<dyn FnOnce(Result<R, ApiError>) + Send>;

struct Pending<R> {
    callbacks: Mutex<HashMap<u64, Callback<R>>>,
}

/// A connected RPC client for responses of type `R`. One client handles
/// every request variant a surface sends, since `Request<P>`/`Response<R>`
/// are generic per call site; construct one `RpcClient` per response type
/// in use (typically one per remote peer).
pub struct RpcClient<R> {
    next_id: AtomicU64,
    stream: Mutex<TcpStream>,
    pending: Arc<Pending<R>>,
    reader: Option<JoinHandle<()>>,
}

impl<R: DeserializeOwned + Send + 'static> RpcClient<R> {
    /// Connect to `addr` and start the background reader thread.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let reader_stream = stream.try_clone()?;
        let pending = Arc::new(Pending {
            callbacks: Mutex::new(HashMap::new()),
        });
        let reader_pending = Arc::clone(&pending);
        let reader = std::thread::Builder::new()
            .name("settlement-rpc-client-reader".into())
            .spawn(move || reader_loop(reader_stream, reader_pending))
            .expect("failed to spawn rpc client reader thread");

        Ok(RpcClient {
            next_id: AtomicU64::new(1),
            stream: Mutex::new(stream),
            pending,
            reader: Some(reader),
        })
    }

    /// Send `payload`, invoke `callback` once its response arrives or the
    /// connection is dropped before one does. Returns the assigned
    /// `request_id` immediately; this is the async client mode.
    pub fn call_async<P: Serialize>(
        &self,
        payload: &P,
        callback: impl FnOnce(Result<R, ApiError>) + Send + 'static,
    ) -> io::Result<u64> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .callbacks
            .lock()
            .insert(request_id, Box::new(callback));

        if let Err(e) = self.send(request_id, payload) {
            if let Some(cb) = self.pending.callbacks.lock().remove(&request_id) {
                cb(Err(ApiError::new("Io", e.to_string())));
            }
            return Err(e);
        }
        Ok(request_id)
    }

    /// Send `payload` and block until its response arrives or `timeout`
    /// elapses. This is the blocking client mode, built as a promise over
    /// [`Self::call_async`].
    pub fn call<P: Serialize>(&self, payload: &P, timeout: Duration) -> Result<R, ApiError> {
        let (tx, rx) = mpsc::channel();
        let request_id = match self.call_async(payload, move |result| {
            let _ = tx.send(result);
        }) {
            Ok(id) => id,
            Err(e) => return Err(ApiError::new("Io", e.to_string())),
        };

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => {
                self.pending.callbacks.lock().remove(&request_id);
                Err(ApiError::new(
                    "Timeout",
                    format!("no response to request {request_id} within {timeout:?}"),
                ))
            }
        }
    }

    fn send<P: Serialize>(&self, request_id: u64, payload: &P) -> io::Result<()> {
        let request = Request::new(request_id, payload);
        let bytes = encode(&request)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let mut stream = self.stream.lock();
        write_frame(&mut *stream, &bytes)
    }
}

impl<R> Drop for RpcClient<R> {
    fn drop(&mut self) {
        let _ = self.stream.lock().shutdown(std::net::Shutdown::Both);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

fn reader_loop<R: DeserializeOwned>(mut stream: TcpStream, pending: Arc<Pending<R>>) {
    loop {
        let bytes = match read_frame(&mut stream) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "rpc client reader stopped");
                break;
            }
        };
        match decode::<Response<R>>(&bytes) {
            Ok(response) => {
                if let Some(callback) = pending.callbacks.lock().remove(&response.request_id) {
                    callback(response.outcome);
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to decode rpc response"),
        }
    }

    // The connection is gone; every still-pending call observes failure
    // rather than hanging forever.
    let stragglers: Vec<_> = pending.callbacks.lock().drain().collect();
    for (_, callback) in stragglers {
        callback(Err(ApiError::new("ConnectionClosed", "rpc connection closed")));
    }
}
