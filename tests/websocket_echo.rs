//! `spec.md` §8 scenario 5: "a WebSocket echo server answers each text
//! frame the client sends with the same text, uppercased."

mod support;

use corvid_http::ws::handshake;
use corvid_http::{Client, WsOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

/// Reads one client->server frame off `stream`, unmasking it. Minimal:
/// assumes a single, unfragmented, non-extended-length data frame, which is
/// all this test's client ever sends.
async fn read_masked_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.expect("read frame head");
    let opcode = head[0] & 0x0F;
    let masked = head[1] & 0x80 != 0;
    assert!(masked, "client frames must be masked");
    let len7 = head[1] & 0x7F;
    let len = match len7 {
        126 => {
            let mut buf = [0u8; 2];
            stream.read_exact(&mut buf).await.expect("read extended length");
            u16::from_be_bytes(buf) as usize
        }
        127 => panic!("test only sends small payloads"),
        n => n as usize,
    };
    let mut key = [0u8; 4];
    stream.read_exact(&mut key).await.expect("read mask key");
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.expect("read payload");
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= key[i % 4];
    }
    (opcode, payload)
}

/// Writes one unmasked server->client frame (servers never mask, RFC 6455 §5.1).
async fn write_unmasked_frame(stream: &mut TcpStream, opcode: u8, payload: &[u8]) {
    let mut out = vec![0x80 | opcode];
    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
    out.extend_from_slice(payload);
    stream.write_all(&out).await.expect("write frame");
    stream.flush().await.expect("flush frame");
}

#[tokio::test]
async fn echoes_text_frames_uppercased() {
    let server = support::spawn(|mut stream| async move {
        let head = support::read_request_head(&mut stream).await.expect("upgrade request");
        let key = head.header("sec-websocket-key").expect("Sec-WebSocket-Key present").to_owned();
        let accept = handshake::compute_accept(&key);

        support::write_response(
            &mut stream,
            101,
            "Switching Protocols",
            &[
                ("Upgrade".into(), "websocket".to_string()),
                ("Connection".into(), "Upgrade".to_string()),
                ("Sec-WebSocket-Accept".into(), accept),
            ],
            &[],
        )
        .await;

        loop {
            let (opcode, payload) = read_masked_frame(&mut stream).await;
            match opcode {
                0x1 => {
                    let upper = String::from_utf8_lossy(&payload).to_uppercase();
                    write_unmasked_frame(&mut stream, 0x1, upper.as_bytes()).await;
                }
                0x8 => {
                    write_unmasked_frame(&mut stream, 0x8, &payload).await;
                    return;
                }
                _ => return,
            }
        }
    })
    .await;

    let client = Client::builder().build().unwrap();
    let url = Url::parse(&server.url("/ws")).unwrap();
    let session = client.connect_ws(url, WsOptions::default()).await.unwrap();

    session.send_text("hello").await.unwrap();
    let reply = session.receive_text(None).await.unwrap();
    assert_eq!(reply, "HELLO");

    session.send_text("world").await.unwrap();
    let reply = session.receive_text(None).await.unwrap();
    assert_eq!(reply, "WORLD");

    session.close(Some(1000), "bye").await.unwrap();
}
