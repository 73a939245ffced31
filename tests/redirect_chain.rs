//! `spec.md` §8 scenario 4: "a redirect loop is cut off at the 30-hop
//! ceiling and the error carries the attempted chain."

mod support;

use corvid_http::redirect::MAX_REDIRECTS;
use corvid_http::Client;
use url::Url;

#[tokio::test]
async fn redirect_loop_fails_past_the_hop_ceiling() {
    let server = support::spawn(|mut stream| async move {
        loop {
            let Some(_head) = support::read_request_head(&mut stream).await else {
                return;
            };
            support::write_response(
                &mut stream,
                302,
                "Found",
                &[
                    ("Location".into(), "/".to_string()),
                    ("Connection".into(), "keep-alive".to_string()),
                ],
                b"",
            )
            .await;
        }
    })
    .await;

    let client = Client::builder().build().unwrap();
    let url = Url::parse(&server.url("/")).unwrap();
    let err = client.get(url).await.unwrap_err();

    assert!(err.is_redirect());
    assert_eq!(err.redirect_chain().unwrap().len(), MAX_REDIRECTS);
}
