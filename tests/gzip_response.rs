//! `spec.md` §8 scenario 3: "a gzip-encoded response body is transparently
//! decompressed before `Response::text` returns it."

mod support;

use corvid_http::Client;
use url::Url;

fn gzip_bytes(plain: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(plain).expect("write to gzip encoder");
    encoder.finish().expect("finish gzip stream")
}

#[tokio::test]
async fn gzip_body_is_decoded_transparently() {
    let plain = b"the quick brown fox jumps over the lazy dog, repeated for compressibility, \
the quick brown fox jumps over the lazy dog";
    let compressed = gzip_bytes(plain);

    let server = support::spawn(move |mut stream| {
        let compressed = compressed.clone();
        async move {
            let Some(_head) = support::read_request_head(&mut stream).await else {
                return;
            };
            support::write_response(
                &mut stream,
                200,
                "OK",
                &[("Content-Encoding".into(), "gzip".to_string())],
                &compressed,
            )
            .await;
        }
    })
    .await;

    let client = Client::builder().build().unwrap();
    let url = Url::parse(&server.url("/")).unwrap();
    let mut response = client.get(url).await.unwrap();
    let text = response.text(None).await.unwrap();
    assert_eq!(text.as_bytes(), plain);
}
