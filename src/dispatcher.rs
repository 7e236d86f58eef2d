use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, debug_span, error, warn};

use crate::protocol::{
    decode_request, encode_response, idle_len, ProtocolError, Request, RequestKind, Response,
};
use crate::server::Shutdown;
use crate::stats::Stats;
use crate::{KvsEngine, KvsError, Result};

// bytes read from a socket at a time
const READ_CHUNK: usize = 4096;

/// An accepted connection waiting for a worker.
#[derive(Debug)]
pub struct Task {
    stream: TcpStream,
    arrived: Instant,
}

impl Task {
    /// wraps a freshly accepted connection, stamping its arrival time
    pub fn new(stream: TcpStream) -> Self {
        Task {
            stream,
            arrived: Instant::now(),
        }
    }

    /// when the connection was accepted
    pub fn arrived(&self) -> Instant {
        self.arrived
    }
}

/// Serves connections: reads requests, runs them against the engine and writes the responses.
///
/// A dispatcher is cloned into every job handed to the thread pool; all clones share the same
/// engine, [`Stats`] and [`Shutdown`] handle.
#[derive(Clone)]
pub struct Dispatcher<E: KvsEngine> {
    engine: E,
    stats: Arc<Stats>,
    shutdown: Shutdown,
}

impl<E: KvsEngine> Dispatcher<E> {
    /// creates a dispatcher over `engine` that records into `stats`
    pub fn new(engine: E, stats: Arc<Stats>, shutdown: Shutdown) -> Self {
        Dispatcher {
            engine,
            stats,
            shutdown,
        }
    }

    /// Serves every request on the task's connection until the peer closes it or an error occurs,
    /// then closes the connection and records how long it lived.
    ///
    /// Errors end only this connection, except a fatal storage error, which also shuts the
    /// server down.
    pub fn serve(&self, task: Task) {
        let Task { stream, arrived } = task;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let span = debug_span!("connection", %peer);
        let _entered = span.enter();

        match self.serve_connection(&stream) {
            Ok(()) => debug!("connection closed by peer"),
            Err(KvsError::Malformed(e)) => warn!("Invalid request, closing connection: {}", e),
            Err(e) if e.is_fatal() => {
                error!("Storage can no longer be trusted, shutting down: {}", e);
                self.shutdown.trigger_fatal();
            }
            Err(e) => error!("Error on serving client: {}", e),
        }
        drop(stream);
        self.stats.record_connection(arrived.elapsed());
    }

    /// Runs the read, decode, dispatch, respond loop over any byte stream.
    ///
    /// Returns `Ok(())` once the peer has closed the stream between requests.
    pub fn serve_connection<S>(&self, mut stream: S) -> Result<()>
    where
        S: Read + Write,
    {
        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            while let Some((request, used)) = decode_request(&buf)? {
                buf.drain(..used);
                debug!("Receive request: {:?} /{}", request.kind, request.key);

                let response = match self.handle(request) {
                    Ok(response) => response,
                    Err(e) => {
                        // the client still gets its answer before the connection goes away
                        let last = encode_response(&Response::NotFound);
                        if let Err(write_err) = stream.write_all(&last) {
                            debug!("could not send the final response: {}", write_err);
                        }
                        return Err(e);
                    }
                };
                stream.write_all(&encode_response(&response))?;
                stream.flush()?;
                debug!("Response sent: {}", status_of(&response));
            }
            let idle = idle_len(&buf);
            buf.drain(..idle);

            let n = match stream.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return if buf.is_empty() {
                    Ok(())
                } else {
                    Err(ProtocolError::Truncated(buf.len()).into())
                };
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Runs one request against the engine.
    ///
    /// Missing keys and non fatal failures become [`Response::NotFound`]; only fatal storage
    /// errors are returned.
    pub fn handle(&self, request: Request) -> Result<Response> {
        self.stats.record_request(request.kind);
        let outcome = match request.kind {
            RequestKind::Get => self.engine.lookup(&request.key).map(Some),
            RequestKind::Post => self.engine.insert(request.key, request.body).map(|_| None),
            RequestKind::Delete => self.engine.remove(&request.key).map(|_| None),
        };
        match outcome {
            Ok(body) => Ok(Response::Ok(body)),
            Err(e) if e.is_fatal() => Err(e),
            Err(KvsError::NotFound(key)) => {
                debug!("key not found: {}", key);
                Ok(Response::NotFound)
            }
            Err(e) => {
                warn!("request failed: {}", e);
                Ok(Response::NotFound)
            }
        }
    }
}

fn status_of(response: &Response) -> &'static str {
    match response {
        Response::Ok(_) => "200 OK",
        Response::NotFound => "404 Not found",
    }
}
