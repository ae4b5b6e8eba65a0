//! Linear adapter chains over a duplex connection.
//!
//! Each adapter wraps the layer below it, transforming bytes on the way
//! down (`write`) and on the way up (`read`) and forwarding lifecycle
//! events by default. Effects an adapter produces — writes toward the
//! transport, deliveries toward the application, a close request — are
//! buffered in a [`Link`] and drained iteratively by the chain, so a
//! completed message never re-enters the stack through deep callback
//! recursion.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;

use crate::connection::{ConnectionState, DisconnectReason, SendPriority};
use crate::error::ProtoError;

/// Effect buffer handed to each adapter call.
///
/// `write` pushes bytes toward the transport (through the adapters below),
/// `deliver` pushes bytes toward the application (through the adapters
/// above). `close` requests a disconnect once the current pass finishes.
pub struct Link<'a> {
    effects: &'a mut Effects,
    state: ConnectionState,
}

#[derive(Default)]
struct Effects {
    down: VecDeque<(Bytes, SendPriority)>,
    up: VecDeque<Bytes>,
    close: Option<DisconnectReason>,
    restart_idle: bool,
}

impl Link<'_> {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Queue bytes toward the transport.
    pub fn write(&mut self, data: Bytes, priority: SendPriority) {
        self.effects.down.push_back((data, priority));
    }

    /// Queue bytes toward the application.
    pub fn deliver(&mut self, data: Bytes) {
        self.effects.up.push_back(data);
    }

    /// Request a disconnect. Safe to call from any adapter hook; the chain
    /// finishes the current pass, flushes pending writes and then tears the
    /// connection down exactly once.
    pub fn close(&mut self, reason: DisconnectReason) {
        self.effects.close.get_or_insert(reason);
    }

    /// Re-arm the connection's idle timer.
    pub fn restart_idle_timer(&mut self) {
        self.effects.restart_idle = true;
    }
}

/// A protocol layer in a connection's adapter chain.
///
/// The default implementations forward bytes and lifecycle events
/// unchanged, so an adapter only overrides the direction(s) it transforms.
pub trait Adapter: Send {
    /// The connection below this adapter became established.
    fn on_connected(&mut self, _link: &mut Link<'_>) -> Result<(), ProtoError> {
        Ok(())
    }

    /// Transform application-originated bytes on their way to the transport.
    fn write(&mut self, data: Bytes, priority: SendPriority, link: &mut Link<'_>) -> Result<(), ProtoError> {
        link.write(data, priority);
        Ok(())
    }

    /// Write the parts of one logical message. The default treats each part
    /// as an independent write; framing adapters override this to keep the
    /// parts within a single message (websocket continuation frames).
    fn write_batch(&mut self, parts: Vec<Bytes>, priority: SendPriority, link: &mut Link<'_>) -> Result<(), ProtoError> {
        for part in parts {
            self.write(part, priority, link)?;
        }
        Ok(())
    }

    /// Transform transport-originated bytes on their way to the application.
    ///
    /// Partial input is not an error: an adapter keeps whatever prefix it
    /// could not yet parse and delivers nothing until more bytes arrive.
    fn read(&mut self, data: Bytes, link: &mut Link<'_>) -> Result<(), ProtoError> {
        link.deliver(data);
        Ok(())
    }

    /// Period of the idle timer this adapter wants, if any.
    fn idle_interval(&self) -> Option<Duration> {
        None
    }

    /// The idle timer elapsed without inbound traffic.
    fn on_idle(&mut self, _link: &mut Link<'_>) -> Result<(), ProtoError> {
        Ok(())
    }

    /// The connection is about to disconnect while still writable; emit any
    /// deterministic terminal bytes (e.g. the final chunk of a chunked
    /// stream) here.
    fn before_disconnect(&mut self, _link: &mut Link<'_>) {}

    /// The connection is gone. Writes from this hook are discarded.
    fn on_disconnected(&mut self, _reason: &DisconnectReason, _link: &mut Link<'_>) {}
}

/// What one pass through the chain produced.
#[derive(Default)]
pub struct ChainOutput {
    /// Bytes to hand to the transport, in queue order.
    pub transport: Vec<(Bytes, SendPriority)>,
    /// Bytes to deliver to the application, in arrival order.
    pub delivered: Vec<Bytes>,
    /// A disconnect requested during the pass.
    pub close: Option<DisconnectReason>,
    /// Whether the idle timer should be re-armed.
    pub restart_idle: bool,
}

impl std::fmt::Debug for ChainOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainOutput")
            .field("transport", &self.transport.len())
            .field("delivered", &self.delivered.len())
            .field("close", &self.close)
            .finish()
    }
}

/// An ordered stack of adapters between the application and the transport.
///
/// Index 0 is nearest the application; the last adapter is nearest the
/// transport and exclusively owns the socket-facing byte format.
pub struct AdapterChain {
    adapters: Vec<Box<dyn Adapter>>,
    state: ConnectionState,
}

impl std::fmt::Debug for AdapterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterChain").field("adapters", &self.adapters.len()).field("state", &self.state).finish()
    }
}

impl Default for AdapterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterChain {
    pub fn new() -> Self {
        Self { adapters: Vec::new(), state: ConnectionState::Disconnected }
    }

    /// Append an adapter on the transport side of the chain.
    pub fn push(&mut self, adapter: impl Adapter + 'static) {
        self.adapters.push(Box::new(adapter));
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, adapter: impl Adapter + 'static) -> Self {
        self.push(adapter);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// The shortest idle period requested by any adapter.
    pub fn idle_interval(&self) -> Option<Duration> {
        self.adapters.iter().filter_map(|a| a.idle_interval()).min()
    }

    /// Mark the connection established and notify adapters, transport side
    /// first so each layer sees a live connection below it.
    pub fn handle_connect(&mut self) -> Result<ChainOutput, ProtoError> {
        self.state = ConnectionState::Connected;
        let mut out = ChainOutput::default();
        for i in (0..self.adapters.len()).rev() {
            let mut effects = Effects::default();
            {
                let mut link = Link { effects: &mut effects, state: self.state };
                self.adapters[i].on_connected(&mut link)?;
            }
            self.drain_effects(i, effects, &mut out)?;
        }
        Ok(out)
    }

    /// Push an application write down through the chain.
    pub fn write(&mut self, data: Bytes, priority: SendPriority) -> Result<ChainOutput, ProtoError> {
        self.ensure_connected()?;
        let mut out = ChainOutput::default();
        self.run_write(0, vec![(data, priority)], &mut out)?;
        Ok(out)
    }

    /// Push the parts of one logical message down through the chain.
    pub fn write_batch(&mut self, parts: Vec<Bytes>, priority: SendPriority) -> Result<ChainOutput, ProtoError> {
        self.ensure_connected()?;
        let mut out = ChainOutput::default();
        if self.adapters.is_empty() {
            out.transport.extend(parts.into_iter().map(|p| (p, priority)));
            return Ok(out);
        }
        let mut effects = Effects::default();
        {
            let mut link = Link { effects: &mut effects, state: self.state };
            self.adapters[0].write_batch(parts, priority, &mut link)?;
        }
        let downs: Vec<_> = effects.down.drain(..).collect();
        out.delivered.extend(effects.up.drain(..));
        if let Some(reason) = effects.close.take() {
            out.close.get_or_insert(reason);
        }
        self.run_write(1, downs, &mut out)?;
        Ok(out)
    }

    /// Push transport bytes up through the chain. Data received after
    /// disconnection is discarded.
    pub fn read(&mut self, data: Bytes) -> Result<ChainOutput, ProtoError> {
        let mut out = ChainOutput::default();
        if self.state == ConnectionState::Disconnected {
            return Ok(out);
        }
        let n = self.adapters.len();
        let mut current = vec![data];
        for i in (0..n).rev() {
            if current.is_empty() {
                break;
            }
            let mut effects = Effects::default();
            for data in current.drain(..) {
                let mut link = Link { effects: &mut effects, state: self.state };
                self.adapters[i].read(data, &mut link)?;
            }
            let ups: Vec<_> = effects.up.drain(..).collect();
            self.drain_effects(i, effects, &mut out)?;
            current = ups;
        }
        out.delivered.extend(current);
        Ok(out)
    }

    /// The idle timer fired.
    pub fn idle(&mut self) -> Result<ChainOutput, ProtoError> {
        let mut out = ChainOutput::default();
        if self.state != ConnectionState::Connected {
            return Ok(out);
        }
        for i in 0..self.adapters.len() {
            let mut effects = Effects::default();
            {
                let mut link = Link { effects: &mut effects, state: self.state };
                self.adapters[i].on_idle(&mut link)?;
            }
            self.drain_effects(i, effects, &mut out)?;
        }
        Ok(out)
    }

    /// Tear the chain down. Idempotent: a second call is a no-op.
    ///
    /// Each adapter gets a chance to emit terminal writes while the
    /// connection is still marked writable; only then does the state flip
    /// and the disconnect event propagate toward the application.
    pub fn disconnect(&mut self, reason: &DisconnectReason) -> ChainOutput {
        let mut out = ChainOutput::default();
        if self.state == ConnectionState::Disconnected {
            return out;
        }
        for i in 0..self.adapters.len() {
            let mut effects = Effects::default();
            {
                let mut link = Link { effects: &mut effects, state: self.state };
                self.adapters[i].before_disconnect(&mut link);
            }
            let downs: Vec<_> = effects.down.drain(..).collect();
            // best effort: terminal writes must not abort the teardown
            let _ = self.run_write(i + 1, downs, &mut out);
        }
        self.state = ConnectionState::Disconnected;
        for i in (0..self.adapters.len()).rev() {
            let mut effects = Effects::default();
            let mut link = Link { effects: &mut effects, state: self.state };
            self.adapters[i].on_disconnected(reason, &mut link);
        }
        out
    }

    fn ensure_connected(&self) -> Result<(), ProtoError> {
        if self.state == ConnectionState::Connected { Ok(()) } else { Err(ProtoError::not_connected(self.state)) }
    }

    /// Run write items through the adapters from `start` toward the
    /// transport. Whatever falls out of the last adapter is transport-bound.
    fn run_write(&mut self, start: usize, items: Vec<(Bytes, SendPriority)>, out: &mut ChainOutput) -> Result<(), ProtoError> {
        let mut current = items;
        for i in start..self.adapters.len() {
            if current.is_empty() {
                break;
            }
            let mut effects = Effects::default();
            for (data, priority) in current.drain(..) {
                let mut link = Link { effects: &mut effects, state: self.state };
                self.adapters[i].write(data, priority, &mut link)?;
            }
            out.delivered.extend(effects.up.drain(..));
            if let Some(reason) = effects.close.take() {
                out.close.get_or_insert(reason);
            }
            if effects.restart_idle {
                out.restart_idle = true;
            }
            current = effects.down.into_iter().collect();
        }
        out.transport.extend(current);
        Ok(())
    }

    /// Route the leftover effects of stage `i`: downward bytes pass through
    /// the stages below it, everything else is recorded on the output.
    fn drain_effects(&mut self, i: usize, mut effects: Effects, out: &mut ChainOutput) -> Result<(), ProtoError> {
        let downs: Vec<_> = effects.down.drain(..).collect();
        if !downs.is_empty() {
            self.run_write(i + 1, downs, out)?;
        }
        out.delivered.extend(effects.up.drain(..));
        if let Some(reason) = effects.close.take() {
            out.close.get_or_insert(reason);
        }
        if effects.restart_idle {
            out.restart_idle = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DisconnectKind;

    /// Appends a suffix on write, strips it on read.
    struct Tagger(&'static [u8]);

    impl Adapter for Tagger {
        fn write(&mut self, data: Bytes, priority: SendPriority, link: &mut Link<'_>) -> Result<(), ProtoError> {
            let mut buf = Vec::with_capacity(data.len() + self.0.len());
            buf.extend_from_slice(&data);
            buf.extend_from_slice(self.0);
            link.write(Bytes::from(buf), priority);
            Ok(())
        }

        fn read(&mut self, data: Bytes, link: &mut Link<'_>) -> Result<(), ProtoError> {
            let stripped = data.slice(..data.len().saturating_sub(self.0.len()));
            link.deliver(stripped);
            Ok(())
        }
    }

    fn connected_chain(adapters: Vec<Box<dyn Adapter>>) -> AdapterChain {
        let mut chain = AdapterChain::new();
        for a in adapters {
            chain.adapters.push(a);
        }
        chain.handle_connect().unwrap();
        chain
    }

    #[test]
    fn write_traverses_app_to_transport() {
        let mut chain = connected_chain(vec![Box::new(Tagger(b"-a")), Box::new(Tagger(b"-b"))]);
        let out = chain.write(Bytes::from_static(b"x"), SendPriority::Normal).unwrap();
        assert_eq!(out.transport.len(), 1);
        assert_eq!(&out.transport[0].0[..], b"x-a-b");
    }

    #[test]
    fn read_traverses_transport_to_app() {
        let mut chain = connected_chain(vec![Box::new(Tagger(b"-a")), Box::new(Tagger(b"-b"))]);
        let out = chain.read(Bytes::from_static(b"x-a-b")).unwrap();
        assert_eq!(out.delivered.len(), 1);
        assert_eq!(&out.delivered[0][..], b"x");
    }

    #[test]
    fn send_rejected_when_not_connected() {
        let mut chain = AdapterChain::new();
        let err = chain.write(Bytes::from_static(b"x"), SendPriority::Normal).unwrap_err();
        assert!(matches!(err, ProtoError::NotConnected { .. }));
    }

    #[test]
    fn data_after_disconnect_is_discarded() {
        let mut chain = connected_chain(vec![Box::new(Tagger(b"-a"))]);
        chain.disconnect(&DisconnectReason::local("done"));
        let out = chain.read(Bytes::from_static(b"late-a")).unwrap();
        assert!(out.delivered.is_empty());
    }

    #[test]
    fn disconnect_is_idempotent() {
        struct Terminal(u32);
        impl Adapter for Terminal {
            fn before_disconnect(&mut self, link: &mut Link<'_>) {
                self.0 += 1;
                link.write(Bytes::from_static(b"bye"), SendPriority::Normal);
            }
        }

        let mut chain = connected_chain(vec![Box::new(Terminal(0))]);
        let out = chain.disconnect(&DisconnectReason::new(DisconnectKind::Local, "done"));
        assert_eq!(out.transport.len(), 1);
        let out = chain.disconnect(&DisconnectReason::new(DisconnectKind::Local, "again"));
        assert!(out.transport.is_empty());
    }

    #[test]
    fn replies_emitted_during_read_traverse_lower_stages() {
        /// Echoes every read back down, marked high priority.
        struct Echo;
        impl Adapter for Echo {
            fn read(&mut self, data: Bytes, link: &mut Link<'_>) -> Result<(), ProtoError> {
                link.write(data.clone(), SendPriority::High);
                link.deliver(data);
                Ok(())
            }
        }

        let mut chain = connected_chain(vec![Box::new(Echo), Box::new(Tagger(b"!"))]);
        let out = chain.read(Bytes::from_static(b"hi!")).unwrap();
        assert_eq!(&out.delivered[0][..], b"hi");
        // the echo passed back through the tagger below
        assert_eq!(&out.transport[0].0[..], b"hi!");
        assert_eq!(out.transport[0].1, SendPriority::High);
    }
}
