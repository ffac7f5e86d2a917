use std::net::SocketAddr;

use futures_channel::mpsc::unbounded;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{future, pin_mut, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, instrument, warn};

use crate::connection::ConnectionId;
use crate::router::{EventRouter, Session};

/// Accepts websocket clients until the listener fails, one task per client.
pub async fn serve(listener: TcpListener, router: EventRouter) -> anyhow::Result<()> {
    info!("Listening on: {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        tokio::spawn(handle_connection(stream, addr, router.clone()));
    }
}

#[instrument(skip(raw_stream, router))]
async fn handle_connection(raw_stream: TcpStream, addr: SocketAddr, router: EventRouter) {
    let (outgoing, incoming) = match set_up_stream(raw_stream, &addr).await {
        Ok(halves) => halves,
        Err(e) => {
            warn!(error = %e, "websocket handshake failed");
            return;
        }
    };

    let (tx, rx) = unbounded::<Message>();
    let mut session = Session::new(ConnectionId::next(), tx);
    info!(conn = %session.id(), "session opened");

    {
        let receive = receive_loop(incoming, &router, &mut session);
        let send = rx.map(Ok).forward(outgoing);
        pin_mut!(receive, send);
        future::select(receive, send).await;
    }

    info!("{} disconnected", addr);
    session.close().await;
}

async fn receive_loop(
    mut incoming: SplitStream<WebSocketStream<TcpStream>>,
    router: &EventRouter,
    session: &mut Session,
) {
    while let Some(msg) = incoming.next().await {
        match msg {
            Ok(Message::Text(text)) => router.handle_text(session, &text).await,
            Ok(Message::Binary(bytes)) => router.handle_binary(session, &bytes).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "read failed");
                break;
            }
        }
    }
}

#[instrument(skip(raw_stream))]
async fn set_up_stream(
    raw_stream: TcpStream,
    addr: &SocketAddr,
) -> anyhow::Result<(
    SplitSink<WebSocketStream<TcpStream>, Message>,
    SplitStream<WebSocketStream<TcpStream>>,
)> {
    info!("Incoming TCP connection from: {}", addr);

    let ws_stream = tokio_tungstenite::accept_async(raw_stream).await?;
    info!("WebSocket connection established: {}", addr);

    // Get sender and receiver for websocket connection
    Ok(ws_stream.split())
}
