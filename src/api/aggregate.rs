use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::BridgeError;

/// Drain a chunk stream and concatenate every item, in order, into one body.
///
/// The first error item aborts aggregation; nothing partial is returned.
///
/// # Errors
///
/// Propagates the stream's error, or [`BridgeError::StreamDecode`] when the
/// concatenated bytes are not UTF-8.
pub async fn aggregate_body<S>(chunks: S) -> Result<String, BridgeError>
where
    S: Stream<Item = Result<Bytes, BridgeError>>,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut body = Vec::new();
    while let Some(chunk) = chunks.next().await {
        body.extend_from_slice(&chunk?);
    }
    String::from_utf8(body).map_err(|err| {
        BridgeError::StreamDecode(format!("aggregated body is not valid UTF-8: {err}"))
    })
}
