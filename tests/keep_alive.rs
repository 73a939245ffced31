//! `spec.md` §8 scenario 1: "Keep-alive counter".

mod support;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use corvid_http::pool::{Origin, PoolConfig};
use corvid_http::Client;
use url::Url;

#[tokio::test]
async fn three_sequential_gets_reuse_one_connection() {
    let counter = Arc::new(AtomicU64::new(0));
    let server = support::spawn(move |mut stream| {
        let counter = counter.clone();
        async move {
            loop {
                let Some(head) = support::read_request_head(&mut stream).await else {
                    return;
                };
                let _ = head.target;
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let body = n.to_string();
                support::write_response(
                    &mut stream,
                    200,
                    "OK",
                    &[("Connection".into(), "keep-alive".to_string())],
                    body.as_bytes(),
                )
                .await;
            }
        }
    })
    .await;

    let client = Client::builder()
        .default_pool_config(PoolConfig::new().size(1))
        .build()
        .unwrap();

    let url = Url::parse(&server.url("/")).unwrap();
    for expected in ["1", "2", "3"] {
        let mut response = client.get(url.clone()).await.unwrap();
        assert_eq!(response.text(None).await.unwrap(), expected);
    }

    let origin = Origin::from_url(&url).unwrap();
    let stats = client.connector().pool_stats(origin).expect("pool dialed at least once");
    assert_eq!(stats.connections_created, 1);
    assert_eq!(stats.requests_served, 3);
}
