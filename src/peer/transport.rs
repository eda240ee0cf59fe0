use super::error::PeerError;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use crate::constants::{
    HANDSHAKE_LEN, HANDSHAKE_TIMEOUT, MAX_FRAME_SIZE, READ_BUFFER_CAPACITY, WRITE_TIMEOUT,
};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

/// A freshly connected socket that has not yet completed its handshake.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl PeerTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }

    pub async fn send_handshake(&mut self, local: PeerId) -> Result<(), PeerError> {
        let data = Handshake::new(local).encode();
        timeout(HANDSHAKE_TIMEOUT, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        while self.read_buf.len() < HANDSHAKE_LEN {
            let n = timeout(HANDSHAKE_TIMEOUT, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;

            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    /// Listener side: verify the remote handshake first, then answer.
    pub async fn accept_handshake(&mut self, local: PeerId) -> Result<PeerId, PeerError> {
        let theirs = self.receive_handshake().await?;
        self.send_handshake(local).await?;
        Ok(theirs.peer_id)
    }

    /// Connector side: send our handshake first, then verify the answer.
    pub async fn initiate_handshake(&mut self, local: PeerId) -> Result<PeerId, PeerError> {
        self.send_handshake(local).await?;
        let theirs = self.receive_handshake().await?;
        Ok(theirs.peer_id)
    }

    /// Splits into a frame reader for the session worker and a shared,
    /// write-serialized connection. Bytes already buffered past the
    /// handshake are carried over to the reader.
    pub fn into_split(self) -> std::io::Result<(FrameReader<OwnedReadHalf>, Connection)> {
        let addr = self.stream.peer_addr()?;
        let (read_half, write_half) = self.stream.into_split();
        let reader = FrameReader {
            inner: read_half,
            read_buf: self.read_buf,
        };
        Ok((reader, Connection::new(write_half, addr)))
    }
}

/// Decodes length-prefixed frames from the read half of a socket.
pub struct FrameReader<R> {
    inner: R,
    read_buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }

    /// Reads the next complete frame. Blocks until one arrives; partial
    /// frames stay buffered if the future is dropped.
    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        self.fill_to(4).await?;

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "message too large: {}",
                length
            )));
        }

        let total_len = 4 + length;
        self.fill_to(total_len).await?;

        let data = self.read_buf.split_to(total_len);
        Message::decode(data.freeze())
    }

    async fn fill_to(&mut self, len: usize) -> Result<(), PeerError> {
        while self.read_buf.len() < len {
            let n = self.inner.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }
}

/// The write side of one neighbor socket.
///
/// Frames are written under a single lock so they never interleave.
/// [`close`](Self::close) drops the write half and wakes the session's read
/// loop, which is how a blocked read is cancelled.
pub struct Connection {
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: Notify,
    is_closed: AtomicBool,
    addr: SocketAddr,
}

impl Connection {
    pub fn new(writer: OwnedWriteHalf, addr: SocketAddr) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            closed: Notify::new(),
            is_closed: AtomicBool::new(false),
            addr,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub async fn send_message(&self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode()?;
        let mut writer = self.writer.lock().await;

        if self.is_closed() {
            writer.take();
            return Err(PeerError::ConnectionClosed);
        }

        let Some(stream) = writer.as_mut() else {
            return Err(PeerError::ConnectionClosed);
        };

        let result = match timeout(WRITE_TIMEOUT, stream.write_all(&data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PeerError::Io(e)),
            Err(_) => Err(PeerError::Timeout),
        };

        if result.is_err() {
            writer.take();
            drop(writer);
            self.close();
        }
        result
    }

    /// Closes the connection. Safe to call more than once.
    pub fn close(&self) {
        if self.is_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        self.closed.notify_one();
    }

    /// Closes the connection and waits for any in-progress write so the
    /// write half is released before returning.
    pub async fn shutdown(&self) {
        self.close();
        self.writer.lock().await.take();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.closed.notified().await;
    }
}
