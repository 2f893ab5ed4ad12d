//! Bounded copy from a decode process into the publisher

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How copying one item ended
#[derive(Debug)]
pub enum CopyOutcome {
    /// Source reached end of stream; the item is done
    EndOfItem,
    /// Writing to the publisher failed (it died or closed its input)
    BrokenDestination(io::Error),
    /// Reading from the decode process failed
    SourceError(io::Error),
}

/// Copy `source` into `dest` in chunks of at most `chunk_size` bytes
///
/// `copied` is advanced after every successful write, so the count stays
/// accurate even if the future is dropped mid-copy.
pub async fn copy_item<R, W>(
    source: &mut R,
    dest: &mut W,
    chunk_size: usize,
    copied: &mut u64,
) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::zeroed(chunk_size.max(1));

    loop {
        let n = match source.read(&mut buf[..]).await {
            Ok(0) => return CopyOutcome::EndOfItem,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return CopyOutcome::SourceError(e),
        };

        if let Err(e) = dest.write_all(&buf[..n]).await {
            return CopyOutcome::BrokenDestination(e);
        }
        *copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    /// Writer that accepts `limit` bytes and then reports a broken pipe
    struct BrokenAfter {
        written: Vec<u8>,
        limit: usize,
    }

    impl AsyncWrite for BrokenAfter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let room = self.limit - self.written.len();
            if room == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            let n = room.min(buf.len());
            self.written.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Reader that yields some bytes and then fails
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "connection reset")));
            }
            self.sent = true;
            buf.put_slice(b"partial");
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_copy_to_end_of_item() {
        let data = vec![7u8; 10_000];
        let mut source: &[u8] = &data;
        let mut dest = Vec::new();
        let mut copied = 0;

        let outcome = copy_item(&mut source, &mut dest, 4096, &mut copied).await;

        assert!(matches!(outcome, CopyOutcome::EndOfItem));
        assert_eq!(copied, 10_000);
        assert_eq!(dest, data);
    }

    #[tokio::test]
    async fn test_empty_source_is_end_of_item() {
        let mut source: &[u8] = &[];
        let mut dest = Vec::new();
        let mut copied = 0;

        let outcome = copy_item(&mut source, &mut dest, 4096, &mut copied).await;

        assert!(matches!(outcome, CopyOutcome::EndOfItem));
        assert_eq!(copied, 0);
        assert!(dest.is_empty());
    }

    #[tokio::test]
    async fn test_broken_destination() {
        let data = vec![1u8; 8192];
        let mut source: &[u8] = &data;
        let mut dest = BrokenAfter {
            written: Vec::new(),
            limit: 5000,
        };
        let mut copied = 0;

        let outcome = copy_item(&mut source, &mut dest, 4096, &mut copied).await;

        match outcome {
            CopyOutcome::BrokenDestination(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected outcome: {:?}", other),
        }
        // Only the fully written first chunk counts
        assert_eq!(copied, 4096);
        assert_eq!(dest.written.len(), 5000);
    }

    #[tokio::test]
    async fn test_source_error() {
        let mut source = FailingReader { sent: false };
        let mut dest = Vec::new();
        let mut copied = 0;

        let outcome = copy_item(&mut source, &mut dest, 4096, &mut copied).await;

        assert!(matches!(outcome, CopyOutcome::SourceError(_)));
        assert_eq!(copied, 7);
        assert_eq!(dest, b"partial");
    }

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        let data = vec![3u8; 1000];
        let expected = data.clone();

        let copy = tokio::spawn(async move {
            let mut source: &[u8] = &data;
            let mut copied = 0;
            let outcome = copy_item(&mut source, &mut writer, 16, &mut copied).await;
            (outcome, copied)
        });

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        let (outcome, copied) = copy.await.unwrap();

        assert!(matches!(outcome, CopyOutcome::EndOfItem));
        assert_eq!(copied, 1000);
        assert_eq!(received, expected);
    }
}
