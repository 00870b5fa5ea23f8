//! First-byte protocol sniffing for the hybrid listener.
//!
//! An HTTP request line always starts with an upper-case method name, while
//! a raw JSON-RPC peer starts with `{`, `[` or whitespace. The first chunk is
//! read once, inspected, and replayed in full to whichever handler takes the
//! connection.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

const PEEK_CAPACITY: usize = 4096;

/// Protocol spoken on an accepted hybrid connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Raw,
}

/// Bytes 65..=90 (`A`-`Z`) mean HTTP; anything else is raw JSON-RPC.
pub fn classify_first_byte(byte: u8) -> Protocol {
    if byte.is_ascii_uppercase() {
        Protocol::Http
    } else {
        Protocol::Raw
    }
}

/// Stream that yields `prefix` before reading from `inner`. Writes go
/// straight to `inner`.
#[pin_project]
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Option<Bytes>,
    #[pin]
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(inner: S, prefix: Bytes) -> Self {
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
            inner,
        }
    }
}

impl<S: AsyncRead> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if let Some(mut prefix) = this.prefix.take() {
            let n = prefix.len().min(buf.remaining());
            buf.put_slice(&prefix[..n]);
            prefix.advance(n);
            if !prefix.is_empty() {
                *this.prefix = Some(prefix);
            }
            return Poll::Ready(Ok(()));
        }
        this.inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// Read the first chunk of `stream` and decide its protocol. Returns `None`
/// when the peer closes before sending anything.
pub async fn sniff<S>(mut stream: S) -> io::Result<Option<(Protocol, Rewind<S>)>>
where
    S: AsyncRead + Unpin,
{
    let mut peeked = BytesMut::with_capacity(PEEK_CAPACITY);
    if stream.read_buf(&mut peeked).await? == 0 {
        return Ok(None);
    }

    let protocol = classify_first_byte(peeked[0]);
    Ok(Some((protocol, Rewind::new(stream, peeked.freeze()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_first_byte_classification() {
        assert_eq!(classify_first_byte(b'G'), Protocol::Http);
        assert_eq!(classify_first_byte(b'P'), Protocol::Http);
        assert_eq!(classify_first_byte(65), Protocol::Http);
        assert_eq!(classify_first_byte(90), Protocol::Http);
        assert_eq!(classify_first_byte(b'{'), Protocol::Raw);
        assert_eq!(classify_first_byte(b'g'), Protocol::Raw);
        assert_eq!(classify_first_byte(64), Protocol::Raw);
        assert_eq!(classify_first_byte(91), Protocol::Raw);
    }

    #[tokio::test]
    async fn test_sniff_http_replays_bytes() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        drop(client);

        let (protocol, mut stream) = sniff(server).await.unwrap().unwrap();
        assert_eq!(protocol, Protocol::Http);

        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, b"GET / HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn test_sniff_raw_replays_bytes_then_reads_more() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"{\"id\":").await.unwrap();

        let (protocol, mut stream) = sniff(server).await.unwrap().unwrap();
        assert_eq!(protocol, Protocol::Raw);

        client.write_all(b"1}").await.unwrap();
        drop(client);

        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, b"{\"id\":1}");
    }

    #[tokio::test]
    async fn test_sniff_empty_connection() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        assert!(sniff(server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewind_small_reads() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut stream = Rewind::new(server, Bytes::from_static(b"abcdef"));

        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }
}
