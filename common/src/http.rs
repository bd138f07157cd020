use std::{
    io::{Read, Write},
    net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream},
    time::Duration,
};

use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::{
    config::{LISTEN_BACKLOG, REQUEST_BUFFER_SIZE},
    error::TransportError,
};

pub const RESPONSE_HEAD: &str = "HTTP/1.0 200 OK\r\nContent-type: text/plain\r\n\r\n";

/// Binds `0.0.0.0:<port>` with a backlog of one pending client.
pub fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

#[derive(Debug, Clone)]
pub struct HttpResponder {
    request_buffer: usize,
    io_timeout: Option<Duration>,
}

impl Default for HttpResponder {
    fn default() -> Self {
        Self::new(REQUEST_BUFFER_SIZE, None)
    }
}

impl HttpResponder {
    pub fn new(request_buffer: usize, io_timeout: Option<Duration>) -> Self {
        Self {
            request_buffer: request_buffer.max(1),
            io_timeout,
        }
    }

    /// Blocks until a client connects.
    pub fn accept_one(&self, listener: &TcpListener) -> Result<ClientConnection, TransportError> {
        let (stream, peer) = listener.accept().map_err(TransportError::Accept)?;

        if let Some(timeout) = self.io_timeout {
            if let Err(err) = stream
                .set_read_timeout(Some(timeout))
                .and_then(|()| stream.set_write_timeout(Some(timeout)))
            {
                warn!("failed to set client timeout for {peer}: {err}");
            }
        }

        Ok(ClientConnection {
            stream,
            peer,
            request_buffer: self.request_buffer,
        })
    }
}

/// An accepted client. Dropping it, or calling [`ClientConnection::send`], closes the socket.
#[derive(Debug)]
pub struct ClientConnection {
    stream: TcpStream,
    peer: SocketAddr,
    request_buffer: usize,
}

impl ClientConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads whatever the client sent, up to the buffer size. The request is not routed.
    pub fn read_request(&mut self) -> Result<usize, TransportError> {
        let mut buffer = vec![0_u8; self.request_buffer];
        let read = self.stream.read(&mut buffer).map_err(TransportError::Read)?;
        debug!(
            "request from {}: {:?}",
            self.peer,
            String::from_utf8_lossy(&buffer[..read])
        );
        Ok(read)
    }

    pub fn send(mut self, body: &str) -> Result<(), TransportError> {
        let result = self
            .stream
            .write_all(RESPONSE_HEAD.as_bytes())
            .and_then(|()| self.stream.write_all(body.as_bytes()))
            .and_then(|()| self.stream.flush())
            .map_err(TransportError::Write);

        let _ = self.stream.shutdown(Shutdown::Both);
        result
    }
}
