//! In-memory byte transport over tokio channels.
//!
//! Unlike [`pump`](crate::pump), which moves `Envelope` values directly,
//! this transport serializes every envelope to wire bytes and back, so
//! end-to-end tests also cover the codec. Each endpoint is one half of a
//! bidirectional link.

use tokio::sync::mpsc;

use accord_proto::{Envelope, ProtocolError};

/// One end of an in-memory duplex link.
pub struct DuplexEndpoint {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Create a connected pair of endpoints.
pub fn duplex_pair() -> (DuplexEndpoint, DuplexEndpoint) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (DuplexEndpoint { tx: a_tx, rx: a_rx }, DuplexEndpoint { tx: b_tx, rx: b_rx })
}

impl DuplexEndpoint {
    /// Encode and transmit one envelope.
    ///
    /// # Errors
    ///
    /// Codec errors; a closed peer is reported as a send on a dropped
    /// channel, which tests treat as fatal.
    pub fn send(&self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let bytes = envelope.encode()?;
        // A dropped receiver means the test tore down the other side early.
        self.tx.send(bytes).expect("peer endpoint dropped");
        Ok(())
    }

    /// Receive and decode the next envelope; `None` when the peer is gone.
    pub async fn recv(&mut self) -> Option<Result<Envelope, ProtocolError>> {
        let bytes = self.rx.recv().await?;
        Some(Envelope::decode(&bytes))
    }

    /// Non-blocking receive for pump-style tests.
    pub fn try_recv(&mut self) -> Option<Result<Envelope, ProtocolError>> {
        let bytes = self.rx.try_recv().ok()?;
        Some(Envelope::decode(&bytes))
    }
}
