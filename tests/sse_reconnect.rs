//! `spec.md` §8 scenario 6: "an SSE stream that ends after one event is
//! transparently reconnected, carrying `Last-Event-ID`, and the consumer
//! observes the two distinct events with no duplicate."

mod support;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use corvid_http::{Client, SseOptions};
use url::Url;

#[tokio::test]
async fn reconnects_with_last_event_id_and_skips_duplicates() {
    let connection_count = Arc::new(AtomicU64::new(0));
    let server = support::spawn(move |mut stream| {
        let connection_count = connection_count.clone();
        async move {
            let head = support::read_request_head(&mut stream).await.expect("sse request");
            let n = connection_count.fetch_add(1, Ordering::SeqCst);
            let body: &[u8] = if n == 0 {
                assert!(head.header("last-event-id").is_none());
                b"id: 1\nretry: 10\ndata: event 1\n\n"
            } else {
                assert_eq!(head.header("last-event-id"), Some("1"));
                b"id: 2\ndata: event 2\n\n"
            };
            support::write_response(
                &mut stream,
                200,
                "OK",
                &[("Content-Type".into(), "text/event-stream".to_string())],
                body,
            )
            .await;
        }
    })
    .await;

    let client = Client::builder().build().unwrap();
    let url = Url::parse(&server.url("/events")).unwrap();
    let mut session = client.connect_sse(url, SseOptions::default()).await.unwrap();

    let first = session.next_event().await.unwrap().expect("first event");
    assert_eq!(first.id.as_deref(), Some("1"));
    assert_eq!(first.data, "event 1");

    let second = session.next_event().await.unwrap().expect("second event after reconnect");
    assert_eq!(second.id.as_deref(), Some("2"));
    assert_eq!(second.data, "event 2");
}
