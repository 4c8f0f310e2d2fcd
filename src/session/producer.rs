use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use crate::broker::queue::{Outgoing, PublishDescriptor};
use crate::broker::session_state::{CloseReason, Redelivery, SessionLease, SessionState};
use crate::codec::{Ack, Disconnect, Packet, QoS, encode, encoded_len};
use crate::session::Link;
use crate::utils::error::SessionError;

/// How long the final DISCONNECT and flush may take once the session is
/// closing.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Writer task of an Active session and the only writer to its transport.
///
/// Unacknowledged messages from an earlier connection go out first, then
/// the outgoing queue in order. Writes are buffered and flushed once
/// `max_unflushed` bytes are pending or the queue runs dry.
pub(crate) async fn run<W: AsyncWrite + Unpin>(
    state: Arc<SessionState>,
    io: W,
    link: Link,
    max_unflushed: usize,
    lease: SessionLease,
    mut shutdown: watch::Receiver<Option<CloseReason>>,
) -> Result<(), SessionError> {
    let mut producer = Producer {
        out: BufWriter::with_capacity(max_unflushed.max(1024), io),
        scratch: BytesMut::new(),
        unflushed: 0,
        max_unflushed,
        state,
        link,
    };

    // A peer that stops reading parks writes indefinitely, so the pump as a
    // whole races shutdown. `biased` gives the pump's own select points
    // priority so a publish it holds is requeued.
    let mut stop = shutdown.clone();
    let pumped = tokio::select! {
        biased;
        result = producer.pump(&mut shutdown) => result,
        _ = stop.wait_for(Option::is_some) => Ok(()),
    };
    if let Err(error) = pumped {
        lease.close(CloseReason::ConnectionLost);
        return Err(error);
    }

    let reason = *shutdown.borrow();
    if timeout(CLOSE_GRACE, producer.close(reason)).await.is_err() {
        debug!(client_id = %producer.link.client_id, "peer not reading, close abandoned");
    }
    Ok(())
}

struct Producer<W> {
    out: BufWriter<W>,
    scratch: BytesMut,
    unflushed: usize,
    max_unflushed: usize,
    state: Arc<SessionState>,
    link: Link,
}

impl<W: AsyncWrite + Unpin> Producer<W> {
    async fn pump(
        &mut self,
        shutdown: &mut watch::Receiver<Option<CloseReason>>,
    ) -> Result<(), SessionError> {
        for redelivery in self.state.redelivery() {
            match redelivery {
                Redelivery::Publish(packet_id, publish) => {
                    self.write_publish(&publish, Some(packet_id)).await?
                }
                Redelivery::Release(packet_id) => {
                    self.write_packet(&Packet::PubRel(Ack::new(packet_id)))
                        .await?
                }
            }
        }
        self.flush().await?;

        loop {
            let item = tokio::select! {
                _ = shutdown.wait_for(Option::is_some) => return Ok(()),
                item = self.state.outgoing().next() => item,
            };

            match item {
                Outgoing::Control(bytes) => {
                    self.out.write_all(&bytes).await?;
                    self.unflushed += bytes.len();
                }
                Outgoing::Publish(publish) => {
                    if self.exceeds_client_limit(&publish) {
                        debug!(client_id = %self.link.client_id, "PUBLISH larger than the client accepts, dropped");
                    } else {
                        let packet_id = if publish.qos == QoS::AtMostOnce {
                            None
                        } else {
                            let limit = self.link.in_flight_limit;
                            let reserve = self.state.reserve_in_flight(limit, publish.clone());
                            tokio::select! {
                                _ = shutdown.wait_for(Option::is_some) => {
                                    self.state.outgoing().push_front(Outgoing::Publish(publish));
                                    return Ok(());
                                }
                                packet_id = reserve => Some(packet_id),
                            }
                        };
                        self.write_publish(&publish, packet_id).await?;
                    }
                }
            }

            if self.unflushed >= self.max_unflushed || self.state.outgoing().is_empty() {
                self.flush().await?;
            }
        }
    }

    fn exceeds_client_limit(&self, publish: &PublishDescriptor) -> bool {
        let Some(max) = self.link.max_outbound_packet else {
            return false;
        };
        let packet_id = (publish.qos != QoS::AtMostOnce).then_some(1);
        encoded_len(&Packet::Publish(publish.to_publish(packet_id)), self.link.level) > max
    }

    async fn write_publish(
        &mut self,
        publish: &PublishDescriptor,
        packet_id: Option<u16>,
    ) -> Result<(), SessionError> {
        self.write_packet(&Packet::Publish(publish.to_publish(packet_id)))
            .await
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<(), SessionError> {
        self.scratch.clear();
        let written = encode(packet, self.link.level, &mut self.scratch)?;
        self.out.write_all(&self.scratch).await?;
        self.unflushed += written;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SessionError> {
        self.out.flush().await?;
        self.unflushed = 0;
        Ok(())
    }

    /// Sends the MQTT 5.0 DISCONNECT for server-side reasons and closes the
    /// write side. Failures only mean the peer is already gone.
    async fn close(&mut self, reason: Option<CloseReason>) {
        if self.link.level.is_v5() {
            if let Some(code) = reason.and_then(CloseReason::disconnect_code) {
                let disconnect = Packet::Disconnect(Disconnect::with_reason(code));
                if let Err(error) = self.write_packet(&disconnect).await {
                    debug!(client_id = %self.link.client_id, %error, "DISCONNECT not delivered");
                }
            }
        }
        if let Err(error) = self.flush().await {
            debug!(client_id = %self.link.client_id, %error, "final flush failed");
        }
        let _ = self.out.shutdown().await;
    }
}
