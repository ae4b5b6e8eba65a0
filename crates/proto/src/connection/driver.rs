//! Single-task driver binding an adapter chain to an async byte stream.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::connection::{AdapterChain, ChainOutput, ConnectionHandler, ConnectionState, DisconnectKind, DisconnectReason, SendPriority};
use crate::error::ProtoError;

const READ_BUF_CAPACITY: usize = 8 * 1024;

/// Idle period used when no adapter asked for an idle timer; effectively
/// never fires.
const IDLE_DISABLED: Duration = Duration::from_secs(60 * 60 * 24);

/// Command surface handed to [`ConnectionHandler`] callbacks.
///
/// `send` and `disconnect` never block and never re-enter the chain: the
/// commands are buffered here and applied by the driver in a second pass
/// after the callback returns.
#[derive(Debug)]
pub struct ConnectionCtl {
    state: ConnectionState,
    commands: Vec<Command>,
}

#[derive(Debug)]
enum Command {
    Send(Bytes, SendPriority),
    SendParts(Vec<Bytes>, SendPriority),
    Disconnect(DisconnectReason),
}

impl ConnectionCtl {
    fn new(state: ConnectionState) -> Self {
        Self { state, commands: Vec::new() }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Queue bytes for delivery to the peer, in call order.
    pub fn send(&mut self, data: Bytes, priority: SendPriority) {
        self.commands.push(Command::Send(data, priority));
    }

    /// Queue one logical message made of several parts. Framing adapters
    /// keep the parts within a single message.
    pub fn send_parts(&mut self, parts: Vec<Bytes>, priority: SendPriority) {
        self.commands.push(Command::SendParts(parts, priority));
    }

    /// Request a disconnect. Asynchronous with respect to the final buffer
    /// flush: previously queued bytes still reach the transport.
    pub fn disconnect<S: ToString>(&mut self, reason: S, kind: DisconnectKind) {
        self.commands.push(Command::Disconnect(DisconnectReason::new(kind, reason)));
    }
}

/// Ordered outbound queue. High-priority items are inserted ahead of
/// normal items that have not yet been handed to the transport, but behind
/// earlier high-priority items.
#[derive(Debug, Default)]
struct OutboundQueue {
    items: VecDeque<Bytes>,
    high_len: usize,
}

impl OutboundQueue {
    fn push(&mut self, data: Bytes, priority: SendPriority) {
        match priority {
            SendPriority::Normal => self.items.push_back(data),
            SendPriority::High => {
                self.items.insert(self.high_len, data);
                self.high_len += 1;
            }
        }
    }

    fn pop(&mut self) -> Option<Bytes> {
        let item = self.items.pop_front();
        if item.is_some() {
            self.high_len = self.high_len.saturating_sub(1);
        }
        item
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Drives one duplex connection: owns the socket, the adapter chain, the
/// inbound accumulator and the outbound queue, and dispatches the four
/// lifecycle events to the handler. Everything runs on the task calling
/// [`run`](Self::run); no connection state is shared across tasks.
pub struct ConnectionDriver<S, H> {
    io: S,
    chain: AdapterChain,
    handler: H,
    outbound: OutboundQueue,
    read_buf: BytesMut,
    /// An adapter (or received traffic) asked for the idle timer to be
    /// re-armed; consumed by the run loop.
    restart_idle: bool,
}

impl<S, H> std::fmt::Debug for ConnectionDriver<S, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDriver").field("chain", &self.chain).finish()
    }
}

impl<S, H> ConnectionDriver<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: ConnectionHandler,
{
    pub fn new(io: S, chain: AdapterChain, handler: H) -> Self {
        Self {
            io,
            chain,
            handler,
            outbound: OutboundQueue::default(),
            read_buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
            restart_idle: false,
        }
    }

    /// Seed the inbound accumulator with bytes that arrived before this
    /// driver took over the stream (leftovers from a protocol upgrade).
    pub fn with_leftover(mut self, leftover: Bytes) -> Self {
        self.read_buf.extend_from_slice(&leftover);
        self
    }

    /// Run the connection to completion. Returns once the connection has
    /// disconnected, with the reason it did.
    pub async fn run(mut self) -> Result<DisconnectReason, ProtoError> {
        let out = self.chain.handle_connect()?;
        let mut pending_close = self.apply_output(out);

        let mut ctl = ConnectionCtl::new(self.chain.state());
        self.handler.on_connected(&mut ctl);
        if let Some(reason) = self.apply_commands(ctl) {
            pending_close.get_or_insert(reason);
        }

        // bytes buffered before the driver took over count as received data
        if !self.read_buf.is_empty() && pending_close.is_none() {
            let data = self.read_buf.split().freeze();
            pending_close = self.feed(data)?;
        }

        let idle_period = self.chain.idle_interval();
        let idle_enabled = idle_period.is_some();
        let period = idle_period.unwrap_or(IDLE_DISABLED);
        tokio::pin! {
            let idle_sleep = sleep(period);
        }

        loop {
            if let Some(reason) = pending_close.take() {
                return self.shutdown(reason).await;
            }

            if let Some(reason) = self.flush_outbound().await? {
                return self.shutdown(reason).await;
            }
            if !self.outbound.is_empty() {
                // the flushed callback queued more data
                continue;
            }

            if idle_enabled && std::mem::take(&mut self.restart_idle) {
                idle_sleep.as_mut().reset(Instant::now() + period);
            }

            tokio::select! {
                biased;

                result = self.io.read_buf(&mut self.read_buf) => {
                    let n = result.map_err(ProtoError::io)?;
                    if n == 0 {
                        debug!("peer closed the stream");
                        return self.shutdown(DisconnectReason::remote("peer closed connection")).await;
                    }
                    trace!(len = n, "read from transport");
                    let data = self.read_buf.split().freeze();
                    pending_close = self.feed(data)?;
                    // any received traffic re-arms the idle timer
                    self.restart_idle = true;
                }

                () = &mut idle_sleep, if idle_enabled => {
                    let out = self.chain.idle()?;
                    pending_close = self.apply_output(out);
                    idle_sleep.as_mut().reset(Instant::now() + period);
                }
            }
        }
    }

    /// Run inbound bytes through the chain and the handler.
    fn feed(&mut self, data: Bytes) -> Result<Option<DisconnectReason>, ProtoError> {
        let out = match self.chain.read(data) {
            Ok(out) => out,
            Err(e) if e.is_protocol() => {
                // protocol violations terminate with a descriptive reason,
                // never resynchronize
                return Ok(Some(DisconnectReason::error(e.to_string())));
            }
            Err(e) => return Err(e),
        };
        Ok(self.apply_output(out))
    }

    /// Queue transport bytes and dispatch deliveries from one chain pass.
    fn apply_output(&mut self, out: ChainOutput) -> Option<DisconnectReason> {
        for (data, priority) in out.transport {
            self.outbound.push(data, priority);
        }
        if out.restart_idle {
            self.restart_idle = true;
        }
        let mut close = out.close;
        for data in out.delivered {
            let mut ctl = ConnectionCtl::new(self.chain.state());
            self.handler.on_data(data, &mut ctl);
            if let Some(reason) = self.apply_commands(ctl) {
                close.get_or_insert(reason);
            }
        }
        close
    }

    /// Apply commands a handler callback buffered on its [`ConnectionCtl`].
    fn apply_commands(&mut self, ctl: ConnectionCtl) -> Option<DisconnectReason> {
        let mut close = None;
        for command in ctl.commands {
            match command {
                Command::Send(data, priority) => match self.chain.write(data, priority) {
                    Ok(out) => {
                        if let Some(reason) = self.apply_output(out) {
                            close.get_or_insert(reason);
                        }
                    }
                    Err(e) => {
                        close.get_or_insert(DisconnectReason::error(e.to_string()));
                    }
                },
                Command::SendParts(parts, priority) => match self.chain.write_batch(parts, priority) {
                    Ok(out) => {
                        if let Some(reason) = self.apply_output(out) {
                            close.get_or_insert(reason);
                        }
                    }
                    Err(e) => {
                        close.get_or_insert(DisconnectReason::error(e.to_string()));
                    }
                },
                Command::Disconnect(reason) => {
                    close.get_or_insert(reason);
                }
            }
        }
        close
    }

    async fn flush_outbound(&mut self) -> Result<Option<DisconnectReason>, ProtoError> {
        if self.outbound.is_empty() {
            return Ok(None);
        }
        while let Some(data) = self.outbound.pop() {
            self.io.write_all(&data).await.map_err(ProtoError::io)?;
        }
        self.io.flush().await.map_err(ProtoError::io)?;
        let mut ctl = ConnectionCtl::new(self.chain.state());
        self.handler.on_flushed(&mut ctl);
        Ok(self.apply_commands(ctl))
    }

    /// Tear down: terminal writes, final flush, socket shutdown, disconnect
    /// event.
    async fn shutdown(mut self, reason: DisconnectReason) -> Result<DisconnectReason, ProtoError> {
        debug!(%reason, "disconnecting");
        let out = self.chain.disconnect(&reason);
        for (data, priority) in out.transport {
            self.outbound.push(data, priority);
        }
        while let Some(data) = self.outbound.pop() {
            if self.io.write_all(&data).await.is_err() {
                break;
            }
        }
        let _ = self.io.flush().await;
        let _ = self.io.shutdown().await;
        self.handler.on_disconnected(&reason);
        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Adapter, Link};
    use tokio::io::{AsyncReadExt, duplex};

    struct Echo;

    impl ConnectionHandler for Echo {
        fn on_data(&mut self, data: Bytes, conn: &mut ConnectionCtl) {
            conn.send(data, SendPriority::Normal);
        }
    }

    /// Closes the connection after one second without inbound traffic.
    struct DeadlineAdapter;

    impl Adapter for DeadlineAdapter {
        fn idle_interval(&self) -> Option<Duration> {
            Some(Duration::from_secs(1))
        }
        fn on_idle(&mut self, link: &mut Link<'_>) -> Result<(), ProtoError> {
            link.close(DisconnectReason::timeout("no traffic"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn echoes_and_reports_remote_close() {
        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(ConnectionDriver::new(server, AdapterChain::new(), Echo).run());

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(client);
        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason.kind, DisconnectKind::Remote);
    }

    #[tokio::test]
    async fn leftover_bytes_count_as_received() {
        let (mut client, server) = duplex(1024);
        let driver = ConnectionDriver::new(server, AdapterChain::new(), Echo).with_leftover(Bytes::from_static(b"early"));
        let task = tokio::spawn(driver.run());

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handler_disconnect_closes_the_stream() {
        struct OneShot;
        impl ConnectionHandler for OneShot {
            fn on_data(&mut self, data: Bytes, conn: &mut ConnectionCtl) {
                conn.send(data, SendPriority::Normal);
                conn.disconnect("served one message", DisconnectKind::Local);
            }
        }

        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(ConnectionDriver::new(server, AdapterChain::new(), OneShot).run());

        client.write_all(b"ping").await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        // the reply is flushed before the stream closes
        assert_eq!(&out, b"ping");

        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason.kind, DisconnectKind::Local);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_reaches_adapters() {
        let (client, server) = duplex(1024);
        let chain = AdapterChain::new().with(DeadlineAdapter);
        let reason = ConnectionDriver::new(server, chain, Echo).run().await.unwrap();
        assert_eq!(reason.kind, DisconnectKind::Timeout);
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn received_traffic_defers_the_idle_deadline() {
        let (mut client, server) = duplex(1024);
        let chain = AdapterChain::new().with(DeadlineAdapter);
        let start = Instant::now();
        let task = tokio::spawn(ConnectionDriver::new(server, chain, Echo).run());

        sleep(Duration::from_millis(600)).await;
        client.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();

        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason.kind, DisconnectKind::Timeout);
        // the write at 600ms restarted the full idle period
        assert!(start.elapsed() >= Duration::from_millis(1600));
    }
}
