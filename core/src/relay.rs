use crate::error::ProviderError;
use crate::llm::FragmentStream;
use crate::wire::encode_record;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const CONTENT_TYPE: &str = "text/event-stream";

/// Headers sent with every streaming response.
pub const STREAM_HEADERS: [(&str, &str); 3] = [
    ("content-type", CONTENT_TYPE),
    ("cache-control", "no-cache"),
    ("connection", "keep-alive"),
];

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Upstream(#[from] ProviderError),
    #[error("failed to write record: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub records: u64,
    pub bytes: u64,
}

/// Write every fragment to `writer`, one flushed record at a time.
pub async fn relay_to_writer<W>(
    mut fragments: FragmentStream,
    writer: &mut W,
) -> Result<RelayStats, RelayError>
where
    W: AsyncWrite + Unpin,
{
    let mut stats = RelayStats::default();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        if fragment.is_empty() {
            continue;
        }
        let record = encode_record(&fragment);
        writer.write_all(&record).await?;
        writer.flush().await?;
        stats.records += 1;
        stats.bytes += record.len() as u64;
    }
    tracing::debug!(records = stats.records, bytes = stats.bytes, "relay finished");
    Ok(stats)
}

/// The same encoding as a body stream; the first error is also the last item.
pub fn relay_body(fragments: FragmentStream) -> impl Stream<Item = Result<Bytes, RelayError>> + Send {
    stream::unfold(Some(fragments), |state| async move {
        let mut fragments = state?;
        loop {
            match fragments.next().await? {
                Ok(fragment) if fragment.is_empty() => continue,
                Ok(fragment) => return Some((Ok(encode_record(&fragment)), Some(fragments))),
                Err(err) => {
                    tracing::warn!(%err, "upstream failed mid-relay");
                    return Some((Err(RelayError::Upstream(err)), None));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderKind;
    use crate::wire::RecordDecoder;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn fragments(items: Vec<Result<&'static str, ProviderError>>) -> FragmentStream {
        stream::iter(items.into_iter().map(|item| item.map(str::to_string))).boxed()
    }

    /// Fails if a write begins while the previous record is still unflushed.
    #[derive(Default)]
    struct StrictWriter {
        written: Vec<u8>,
        dirty: bool,
    }

    impl AsyncWrite for StrictWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let record_start = self.written.last().map_or(true, |byte| *byte == b'\n');
            if record_start && self.dirty {
                return Poll::Ready(Err(std::io::Error::other("record written before flush")));
            }
            self.written.extend_from_slice(buf);
            self.dirty = true;
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            self.dirty = false;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn writes_flushed_records_in_order() {
        let mut writer = StrictWriter::default();
        let stats = relay_to_writer(fragments(vec![Ok("Hel"), Ok(""), Ok("lo")]), &mut writer)
            .await
            .expect("relay");
        assert_eq!(stats.records, 2);
        assert_eq!(writer.written, b"{\"content\":\"Hel\"}\n{\"content\":\"lo\"}\n");
    }

    #[tokio::test]
    async fn upstream_error_stops_without_partial_record() {
        let mut writer = StrictWriter::default();
        let result = relay_to_writer(
            fragments(vec![
                Ok("a"),
                Err(ProviderError::interrupted(ProviderKind::Mock, "gone")),
                Ok("never"),
            ]),
            &mut writer,
        )
        .await;
        assert!(matches!(result, Err(RelayError::Upstream(_))));

        let mut decoder = RecordDecoder::default();
        let records = decoder.feed(&writer.written);
        assert_eq!(records.len(), 1);
        assert!(decoder.finish().is_ok());
    }

    #[tokio::test]
    async fn body_ends_after_error() {
        let items: Vec<_> = relay_body(fragments(vec![
            Ok("x"),
            Err(ProviderError::interrupted(ProviderKind::Mock, "gone")),
            Ok("y"),
        ]))
        .collect()
        .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
