//! TCP RPC server: accepts connections, frames requests/responses, and
//! dispatches each request to a caller-supplied [`Handler`].
//!
//! Spawns one thread per accepted connection, matching "parallel threads
//! throughout... work is scheduled on executor thread pools and network
//! handler threads" rather than a single-event-loop reactor. The accept
//! loop polls a nonblocking listener against a stop flag so `shutdown` can
//! return promptly without a platform-specific self-connect trick.

use crate::framing::{read_frame, write_frame};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use settlement_wire::{decode, encode, ApiError, Request, Response};
use std::io;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Replies to one in-flight request. Consumed exactly once.
pub type Reply<R> = Box<dyn FnOnce(Result<R, ApiError>) + Send>;

/// Handles one decoded request. Returning `Some` replies synchronously —
/// the blocking handler shape. Returning `None` means the handler has
/// taken ownership of `reply` and will invoke it later, possibly from
/// another thread or after a replicated-log round trip — the asynchronous
/// handler shape.
pub trait Handler<P, R>: Send + Sync {
    /// Handle one request, replying inline or accepting `reply` for later.
    fn handle(&self, payload: P, reply: Reply<R>) -> Option<Result<R, ApiError>>;
}

/// Wraps a plain function as a [`Handler`] that always replies inline.
pub struct BlockingFn<F>(pub F);

impl<P, R, F> Handler<P, R> for BlockingFn<F>
where
    F: Fn(P) -> Result<R, ApiError> + Send + Sync,
{
    fn handle(&self, payload: P, _reply: Reply<R>) -> Option<Result<R, ApiError>> {
        Some((self.0)(payload))
    }
}

/// A running TCP RPC server.
pub struct TcpServer {
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: std::net::SocketAddr,
}

impl TcpServer {
    /// Bind `addr` and start accepting connections, dispatching every
    /// request through `handler`.
    pub fn bind<P, R, H>(addr: impl ToSocketAddrs, handler: Arc<H>) -> io::Result<Self>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        H: Handler<P, R> + 'static,
    {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let accept_stop = Arc::clone(&stop);

        let accept_thread = std::thread::Builder::new()
            .name("settlement-rpc-accept".into())
            .spawn(move || accept_loop(listener, handler, accept_stop))
            .expect("failed to spawn rpc accept thread");

        Ok(TcpServer {
            stop,
            accept_thread: Some(accept_thread),
            local_addr,
        })
    }

    /// The bound local address, useful when `addr` used port `0`.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections and join the accept thread. Already
    /// established connections are not torn down; each exits once its peer
    /// closes the socket or sends its next request after shutdown begins.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop<P, R, H>(listener: TcpListener, handler: Arc<H>, stop: Arc<AtomicBool>)
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    H: Handler<P, R> + 'static,
{
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let handler = Arc::clone(&handler);
                let stop = Arc::clone(&stop);
                std::thread::Builder::new()
                    .name(format!("settlement-rpc-conn-{peer}"))
                    .spawn(move || connection_loop(stream, handler, stop))
                    .expect("failed to spawn rpc connection thread");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                tracing::warn!(error = %e, "rpc accept loop stopped");
                return;
            }
        }
    }
}

fn connection_loop<P, R, H>(stream: TcpStream, handler: Arc<H>, stop: Arc<AtomicBool>)
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    H: Handler<P, R> + 'static,
{
    let writer = Arc::new(Mutex::new(
        stream.try_clone().expect("clone rpc connection stream"),
    ));
    let mut reader = stream;
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let bytes = match read_frame(&mut reader) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "rpc connection closed");
                return;
            }
        };
        let request: Request<P> = match decode(&bytes) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode rpc request, dropping connection");
                return;
            }
        };
        let request_id = request.request_id;
        let reply_writer = Arc::clone(&writer);
        let reply: Reply<R> =
            Box::new(move |outcome| send_response(&reply_writer, request_id, outcome));
        if let Some(outcome) = handler.handle(request.payload, reply) {
            send_response(&writer, request_id, outcome);
        }
    }
}

fn send_response<R: Serialize>(
    writer: &Mutex<TcpStream>,
    request_id: u64,
    outcome: Result<R, ApiError>,
) {
    let response = Response { request_id, outcome };
    match encode(&response) {
        Ok(bytes) => {
            let mut stream = writer.lock();
            if let Err(e) = write_frame(&mut *stream, &bytes) {
                tracing::debug!(error = %e, "failed to write rpc response");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to encode rpc response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use std::time::Duration;

    #[test]
    fn blocking_handler_replies_inline() {
        let handler = Arc::new(BlockingFn(|payload: i32| Ok::<i32, ApiError>(payload * 2)));
        let server = TcpServer::bind("127.0.0.1:0", handler).unwrap();
        let client: RpcClient<i32> = RpcClient::connect(server.local_addr()).unwrap();
        let result = client.call(&21, Duration::from_secs(2)).unwrap();
        assert_eq!(result, 42);
        server.shutdown();
    }

    struct EchoLater;
    impl Handler<i32, i32> for EchoLater {
        fn handle(&self, payload: i32, reply: Reply<i32>) -> Option<Result<i32, ApiError>> {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                reply(Ok(payload));
            });
            None
        }
    }

    #[test]
    fn async_handler_replies_from_another_thread() {
        let server = TcpServer::bind("127.0.0.1:0", Arc::new(EchoLater)).unwrap();
        let client: RpcClient<i32> = RpcClient::connect(server.local_addr()).unwrap();
        let result = client.call(&7, Duration::from_secs(2)).unwrap();
        assert_eq!(result, 7);
        server.shutdown();
    }
}
