use super::{Channel, ChannelError, Emitter, InboundMessage, OutboundMessage};
use tokio::sync::mpsc;

struct MemoryEmitter {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl Emitter for MemoryEmitter {
    fn emit(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        self.outbound
            .send(message)
            .map_err(|e| ChannelError::SendError(e.to_string()))
    }
}

/// The service side of an in-process channel.
pub struct RemoteEnd {
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    inbound: mpsc::Sender<InboundMessage>,
}

impl RemoteEnd {
    pub async fn next(&mut self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    pub fn try_next(&mut self) -> Option<OutboundMessage> {
        self.outbound.try_recv().ok()
    }

    /// Drains everything emitted so far.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_next() {
            messages.push(message);
        }
        messages
    }

    pub async fn reply(&self, message: InboundMessage) {
        if self.inbound.send(message).await.is_err() {
            panic!("client end dropped");
        }
    }
}

pub fn pair() -> (Channel, RemoteEnd) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(32);
    let channel = Channel::new(
        Box::new(MemoryEmitter {
            outbound: outbound_tx,
        }),
        inbound_rx,
    );
    let remote = RemoteEnd {
        outbound: outbound_rx,
        inbound: inbound_tx,
    };
    (channel, remote)
}
