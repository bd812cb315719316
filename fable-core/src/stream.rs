//! Consumption of a streamed narrator response.

use futures::StreamExt;

use crate::narrator::{FragmentStream, NarratorError};

/// Whether fragments are shown to the player as they arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Forward every fragment to the sink.
    Live,
    /// Only accumulate; the sink is never called.
    Buffered,
}

/// Drain a fragment stream into a single buffer.
///
/// Fragments are appended strictly in arrival order. The first error ends
/// the loop and is returned; whatever was buffered so far is dropped.
pub async fn ingest<F>(
    mut fragments: FragmentStream,
    delivery: Delivery,
    mut sink: F,
) -> Result<String, NarratorError>
where
    F: FnMut(&str),
{
    let mut buffer = String::new();
    let mut count = 0usize;

    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        count += 1;
        buffer.push_str(&fragment);
        if delivery == Delivery::Live {
            sink(&fragment);
        }
    }

    tracing::debug!(fragments = count, bytes = buffer.len(), "stream completed");
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(items: Vec<Result<&'static str, NarratorError>>) -> FragmentStream {
        Box::pin(futures::stream::iter(
            items.into_iter().map(|item| item.map(String::from)),
        ))
    }

    #[tokio::test]
    async fn test_live_delivery_forwards_in_order() {
        let mut seen = Vec::new();
        let text = ingest(
            fragments(vec![Ok("The "), Ok("door "), Ok("opens.")]),
            Delivery::Live,
            |f| seen.push(f.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(text, "The door opens.");
        assert_eq!(seen, vec!["The ", "door ", "opens."]);
    }

    #[tokio::test]
    async fn test_buffered_delivery_is_silent() {
        let mut calls = 0;
        let text = ingest(
            fragments(vec![Ok("<gamedata>"), Ok("</gamedata>")]),
            Delivery::Buffered,
            |_| calls += 1,
        )
        .await
        .unwrap();

        assert_eq!(text, "<gamedata></gamedata>");
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_error_ends_the_loop() {
        let mut seen = 0;
        let result = ingest(
            fragments(vec![
                Ok("one"),
                Ok("two"),
                Err(NarratorError::Stream("connection reset".to_string())),
                Ok("three"),
            ]),
            Delivery::Live,
            |_| seen += 1,
        )
        .await;

        assert!(matches!(result, Err(NarratorError::Stream(_))));
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_empty_stream_yields_empty_text() {
        let text = ingest(fragments(Vec::new()), Delivery::Live, |_| {})
            .await
            .unwrap();
        assert!(text.is_empty());
    }
}
