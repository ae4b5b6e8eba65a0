//! WebSocket echo server: HTTP handshake via strand-http, frames via the
//! strand-proto adapter chain on the upgraded stream.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use tokio::net::TcpListener;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use strand_http::server::{Served, make_handler, serve};
use strand_http::ws;
use strand_proto::connection::{AdapterChain, ConnectionCtl, ConnectionDriver, ConnectionHandler, SendPriority};
use strand_proto::ws::{WsAdapter, WsConfig};

async fn upgrade(request: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
    Ok(ws::upgrade_response(&request)?)
}

struct EchoHandler;

impl ConnectionHandler for EchoHandler {
    fn on_data(&mut self, data: Bytes, conn: &mut ConnectionCtl) {
        conn.send(data, SendPriority::Normal);
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 8080, "websocket echo listening");
    let listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let handler = Arc::new(make_handler(upgrade));
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            match serve(stream, handler).await {
                Ok(Served::Upgraded { io, leftover }) => {
                    info!(%remote_addr, "upgraded to websocket");
                    let config = WsConfig::server().keepalive(Duration::from_secs(30));
                    let chain = AdapterChain::new().with(WsAdapter::new(config));
                    match ConnectionDriver::new(io, chain, EchoHandler).with_leftover(leftover).run().await {
                        Ok(reason) => info!(%remote_addr, %reason, "websocket closed"),
                        Err(e) => error!(%remote_addr, cause = %e, "websocket failed"),
                    }
                }
                Ok(Served::Closed) => info!(%remote_addr, "plain http connection closed"),
                Err(e) => error!(%remote_addr, cause = %e, "connection ended with error"),
            }
        });
    }
}
