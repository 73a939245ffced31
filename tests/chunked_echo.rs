//! `spec.md` §8 scenario 2: "a chunked request body round-trips through the
//! engine's own chunked writer and is echoed back by the loopback server."

mod support;

use corvid_http::{Client, RequestBody, RequestOptions};
use futures_util::stream;
use url::Url;

#[tokio::test]
async fn chunked_request_body_is_received_intact() {
    let server = support::spawn(|mut stream| async move {
        let Some(head) = support::read_request_head(&mut stream).await else {
            return;
        };
        assert_eq!(head.method, "POST");
        assert_eq!(head.header("transfer-encoding"), Some("chunked"));
        let body = support::read_chunked_body(&mut stream, head.leftover).await;
        support::write_response(&mut stream, 200, "OK", &[], &body).await;
    })
    .await;

    let client = Client::builder().build().unwrap();
    let url = Url::parse(&server.url("/upload")).unwrap();

    let parts: Vec<std::result::Result<bytes::Bytes, corvid_http::error::BoxError>> = vec![
        Ok(bytes::Bytes::from_static(b"hello, ")),
        Ok(bytes::Bytes::from_static(b"chunked world")),
    ];
    let body_stream: corvid_http::http1::body::ByteStream = Box::pin(stream::iter(parts));

    let mut options = RequestOptions::default();
    options.data = Some(RequestBody::Stream(body_stream));

    let mut response = client.post(url, options).await.unwrap();
    let echoed = response.text(None).await.unwrap();
    assert_eq!(echoed, "hello, chunked world");
}
