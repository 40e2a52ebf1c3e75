//! A minimal in-process XML-RPC converter used to exercise the balancer
//! end-to-end without a real document-conversion backend.
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct FakeConverter {
    pub port: u16,
}

/// Spawns a TCP listener that answers every connection with the next string
/// `responses[call_count % responses.len()]` yields, then closes the
/// connection (our client always sends `Connection: close`).
pub async fn spawn_fake_converter(responses: Vec<String>) -> FakeConverter {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut call = 0usize;
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let body = responses[call % responses.len()].clone();
            call += 1;
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                // drain the request; we don't need to parse it for these fixtures
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(body.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    FakeConverter { port }
}

pub fn http_ok(xml: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{}",
        xml.len(),
        xml
    )
}

pub fn base64_success(text: &str) -> String {
    http_ok(&format!(
        r#"<?xml version="1.0"?><methodResponse><params><param><value><base64>{}</base64></value></param></params></methodResponse>"#,
        text
    ))
}

pub fn string_success(text: &str) -> String {
    http_ok(&format!(
        r#"<?xml version="1.0"?><methodResponse><params><param><value><string>{}</string></value></param></params></methodResponse>"#,
        text
    ))
}

pub fn fault(code: i32, message: &str) -> String {
    http_ok(&format!(
        concat!(
            r#"<?xml version="1.0"?><methodResponse><fault><value><struct>"#,
            r#"<member><name>faultCode</name><value><int>{}</int></value></member>"#,
            r#"<member><name>faultString</name><value><string>{}</string></value></member>"#,
            r#"</struct></value></fault></methodResponse>"#
        ),
        code, message
    ))
}
