use std::io::{BufWriter, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::protocol::{decode_response, encode_request, ProtocolError, Request, Response};
use crate::Result;

/// `KvsClient` speaks the wire protocol to a [`KvsServer`] over one connection.
///
/// [`KvsServer`]: ./struct.KvsServer.html
pub struct KvsClient {
    reader: TcpStream,
    writer: BufWriter<TcpStream>,
    // bytes read past the end of the last response
    buf: Vec<u8>,
}

impl KvsClient {
    /// creates a client and establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let reader = TcpStream::connect(addr)?;
        let writer = reader.try_clone()?;

        Ok(KvsClient {
            reader,
            writer: BufWriter::new(writer),
            buf: Vec::new(),
        })
    }

    /// gets the value of the specified `key` from the server
    /// ## Returns
    /// `Ok(Some(value))` if the key was found, `Ok(None)` if the server answered 404
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.send(&Request::get(key))? {
            Response::Ok(value) => Ok(Some(value.unwrap_or_default())),
            Response::NotFound => Ok(None),
        }
    }

    /// stores `value` under `key`
    /// ## Returns
    /// `Ok(true)` if the server accepted the value
    pub fn set(&mut self, key: &str, value: impl Into<Vec<u8>>) -> Result<bool> {
        let response = self.send(&Request::post(key, value))?;
        Ok(response != Response::NotFound)
    }

    /// removes `key` and its value from the store
    /// ## Returns
    /// `Ok(true)` if the server reported success. Removing an absent key succeeds.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let response = self.send(&Request::delete(key))?;
        Ok(response != Response::NotFound)
    }

    fn send(&mut self, request: &Request) -> Result<Response> {
        self.writer.write_all(&encode_request(request))?;
        self.writer.flush()?;
        self.read_response()
    }

    fn read_response(&mut self) -> Result<Response> {
        let mut chunk = [0_u8; 4096];
        loop {
            if let Some((response, used)) = decode_response(&self.buf)? {
                self.buf.drain(..used);
                return Ok(response);
            }
            let n = match self.reader.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(ProtocolError::Truncated(self.buf.len()).into());
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
