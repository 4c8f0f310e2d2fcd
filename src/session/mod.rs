//! The `session` module drives one client connection through
//! Connecting, Active, Disconnecting and Closed.
//!
//! While Active, a spawned writer task (`producer`) drains the session's
//! outgoing queue into the transport and the connection's own task
//! (`consumer`) decodes inbound packets and handles them. Either side ending
//! records a [`CloseReason`] that stops the other.

mod consumer;
mod inbound;
mod producer;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::broker::Hub;
use crate::broker::hub::AcceptedConnect;
use crate::broker::message::Message;
use crate::broker::session_state::{CloseReason, SessionLease, SessionState};
use crate::codec::{Connect, Packet, ProtocolLevel, encode_to_bytes};
use crate::config::BrokerSettings;
use crate::utils::error::SessionError;

use consumer::Consumer;
use inbound::PacketReader;

/// Per-connection parameters fixed by CONNECT.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub level: ProtocolLevel,
    pub client_id: String,
    /// 1.5 times the negotiated keep-alive; `None` disables the check.
    pub keep_alive: Option<Duration>,
    pub in_flight_limit: usize,
    pub max_receive: usize,
    /// Largest packet the client accepts (MQTT 5.0).
    pub max_outbound_packet: Option<usize>,
    /// Session expiry requested at CONNECT (MQTT 5.0).
    pub session_expiry: u32,
    /// Keep the state after the connection closes.
    pub persistent: bool,
}

impl Link {
    fn negotiate(accepted: &AcceptedConnect, connect: &Connect, settings: &BrokerSettings) -> Self {
        let level = accepted.level;
        let keep_alive = (connect.keep_alive > 0)
            .then(|| Duration::from_millis(u64::from(connect.keep_alive) * 1500));

        let mut in_flight_limit = usize::from(settings.max_in_flight.max(1));
        let mut max_outbound_packet = None;
        let mut session_expiry = 0;
        if level.is_v5() {
            if let Some(receive_max) = connect.properties.receive_maximum() {
                in_flight_limit = in_flight_limit.min(usize::from(receive_max.max(1)));
            }
            max_outbound_packet = connect
                .properties
                .maximum_packet_size()
                .map(|max| max as usize);
            session_expiry = connect.properties.session_expiry_interval().unwrap_or(0);
        }

        Self {
            level,
            client_id: accepted.client_id.clone(),
            keep_alive,
            in_flight_limit,
            max_receive: usize::from(settings.max_receive.max(1)),
            max_outbound_packet,
            session_expiry,
            persistent: if level.is_v5() {
                session_expiry > 0
            } else {
                !connect.clean_session
            },
        }
    }
}

/// Runs one connection to completion.
///
/// Returns `Ok` when the session ended normally: client DISCONNECT, end of
/// stream, takeover or broker shutdown.
pub async fn run<T>(hub: Arc<Hub>, transport: T) -> Result<(), SessionError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let settings = hub.settings().clone();
    let (read_half, mut write_half) = tokio::io::split(transport);
    let mut reader = PacketReader::new(read_half, settings.max_packet_size);

    let first = timeout(settings.connect_timeout(), reader.next_packet())
        .await
        .map_err(|_| SessionError::ConnectTimeout)??;
    let mut connect = match first {
        Some(Packet::Connect(connect)) => connect,
        Some(other) => {
            debug!(packet = ?other.packet_type(), "first packet was not CONNECT");
            return Err(SessionError::MissingConnectPacket);
        }
        None => return Ok(()),
    };

    let accepted = match hub.validate_connect(&connect).await {
        Ok(accepted) => accepted,
        Err(rejection) => {
            warn!(
                client_id = %String::from_utf8_lossy(&connect.client_id),
                kind = ?rejection.kind,
                "connect rejected"
            );
            write_half.write_all(&rejection.connack).await?;
            write_half.flush().await?;
            let _ = write_half.shutdown().await;
            return Err(rejection.kind.into());
        }
    };
    reader.set_level(accepted.level);

    hub.take_over(&accepted.client_id).await;
    let (state, session_present) =
        hub.create_or_resume_state(&accepted.client_id, connect.clean_session);

    let (shutdown_tx, shutdown_rx) = watch::channel(None);
    let (stopped_tx, stopped_rx) = watch::channel(false);
    let lease = SessionLease::new(Arc::new(shutdown_tx), stopped_rx);
    if let Some(previous) = state.attach(lease.clone()) {
        previous.close(CloseReason::TakenOver);
    }

    let link = Link::negotiate(&accepted, &connect, &settings);
    state.set_will(connect.will.take().map(Message::from));
    let connack = Packet::ConnAck(hub.connack(&accepted, session_present));

    let session = Session {
        hub,
        state,
        link,
        lease,
        shutdown: shutdown_rx,
        stopped: stopped_tx,
    };
    session.serve(reader, write_half, connack, settings.max_unflushed_bytes).await
}

/// A connection bound to its [`SessionState`].
struct Session {
    hub: Arc<Hub>,
    state: Arc<SessionState>,
    link: Link,
    lease: SessionLease,
    shutdown: watch::Receiver<Option<CloseReason>>,
    stopped: watch::Sender<bool>,
}

impl Session {
    async fn serve<T>(
        mut self,
        mut reader: PacketReader<tokio::io::ReadHalf<T>>,
        writer: WriteHalf<T>,
        connack: Packet,
        max_unflushed: usize,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let result = self.drive(&mut reader, writer, connack, max_unflushed).await;
        if let Err(error) = &result {
            self.lease.close(CloseReason::from(error));
        }
        let reason = (*self.shutdown.borrow()).unwrap_or(CloseReason::ConnectionLost);
        self.finish(reason);

        match (result, reason) {
            (Err(error), _) => Err(error),
            (Ok(()), CloseReason::KeepAliveTimeout) => Err(SessionError::KeepAliveTimeout),
            (Ok(()), CloseReason::QueueOverflow) => Err(SessionError::QueueOverflow),
            (Ok(()), _) => Ok(()),
        }
    }

    async fn drive<T>(
        &mut self,
        reader: &mut PacketReader<tokio::io::ReadHalf<T>>,
        mut writer: WriteHalf<T>,
        connack: Packet,
        max_unflushed: usize,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connack = encode_to_bytes(&connack, self.link.level)?;
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            written = async {
                writer.write_all(&connack).await?;
                writer.flush().await?;
                Ok::<_, SessionError>(())
            } => written?,
            _ = shutdown.wait_for(Option::is_some) => return Ok(()),
        }
        self.state.set_active(true);
        info!(
            client_id = %self.link.client_id,
            level = ?self.link.level,
            persistent = self.link.persistent,
            "session active"
        );

        let producer = tokio::spawn(producer::run(
            Arc::clone(&self.state),
            writer,
            self.link.clone(),
            max_unflushed,
            self.lease.clone(),
            self.shutdown.clone(),
        ));

        let consumed = Consumer::new(&self.hub, &self.state, &mut self.link, &self.lease)
            .run(reader, self.shutdown.clone())
            .await;
        if let Err(error) = &consumed {
            self.lease.close(CloseReason::from(error));
        }

        match producer.await {
            Ok(Err(error)) => debug!(client_id = %self.link.client_id, %error, "writer stopped"),
            Err(error) => warn!(client_id = %self.link.client_id, %error, "writer task failed"),
            Ok(Ok(())) => {}
        }
        consumed
    }

    /// Publishes the will if one is still registered, then keeps or discards
    /// the state and releases it.
    fn finish(&self, reason: CloseReason) {
        self.state.set_active(false);
        if let Some(will) = self.state.take_will() {
            let delivered = self.hub.dispatch(&will);
            debug!(client_id = %self.link.client_id, delivered, "will published");
        }

        self.state.detach(self.lease.id());
        if self.link.persistent {
            self.state.outgoing().discard_transient();
        } else {
            self.hub.discard_state(&self.state);
        }
        info!(client_id = %self.link.client_id, ?reason, "session closed");
        self.stopped.send_replace(true);
    }
}
