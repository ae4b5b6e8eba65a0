//! Fires a burst of pipelined requests at a local server.
//!
//! Run `hello_server` first, then this example. With pipelining enabled
//! all requests go out back to back on one connection; the responses come
//! back in request order.

use bytes::Bytes;
use http::Request;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use strand_http::client::{ClientConfig, HttpClient, TcpConnector};

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = ClientConfig { keep_alive: true, pipelining: true };
    let client = HttpClient::new(TcpConnector::new("127.0.0.1:8080"), config);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let request = Request::builder().uri("/").header(http::header::HOST, "localhost").body(Bytes::new()).unwrap();
            client.send(request).await.map(|response| (i, response))
        }));
    }

    for task in tasks {
        match task.await.expect("task panicked") {
            Ok((i, response)) => {
                info!(request = i, status = %response.status(), body_len = response.body().len(), "response");
            }
            Err(e) => info!(cause = %e, "request failed"),
        }
    }
}
