use std::error::Error;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{Request, Response, StatusCode, header};
use tokio::net::TcpListener;
use tokio_util::codec::Encoder;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use strand_http::server::{make_handler, serve};
use strand_http::sse::{Event, SseEncoder, media_type};

async fn route(request: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
    match request.uri().path() {
        "/" => Ok(Response::builder().status(StatusCode::OK).body(Bytes::from_static(b"Hello World!\r\n"))?),
        "/events" => sse_snapshot(),
        _ => Ok(Response::builder().status(StatusCode::NOT_FOUND).body(Bytes::from_static(b"404 not found\r\n"))?),
    }
}

/// A short event-stream response, pre-encoded as chunked transfer coding.
fn sse_snapshot() -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
    let mut encoder = SseEncoder::new();
    let mut body = BytesMut::new();
    for i in 0..5 {
        encoder.encode(Event::named("tick", format!("{i}")), &mut body)?;
    }
    encoder.finish(&mut body)?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, media_type().as_ref())
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(body.freeze())?;
    Ok(response)
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 8080, "start listening");
    let listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let handler = Arc::new(make_handler(route));
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
            info!(%remote_addr, "connection opened");
            if let Err(e) = serve(stream, handler).await {
                error!(cause = %e, "connection ended with error");
            }
        });
    }
}
