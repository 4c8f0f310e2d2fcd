use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::auth::Authenticator;
use crate::broker::events::{SessionObserver, TracingObserver};
use crate::broker::message::Message;
use crate::broker::protocol::EmptyClientId;
use crate::broker::queue::{Outgoing, PublishDescriptor};
use crate::broker::repository::SessionRepository;
use crate::broker::session_state::{CloseReason, SessionState};
use crate::codec::{
    ConnAck, Connect, Packet, ProtocolLevel, Properties, Property, QoS, encode_to_bytes, reason_code,
};
use crate::config::BrokerSettings;
use crate::utils::error::{ConnectErrorKind, ConnectRejection};

/// A CONNECT that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedConnect {
    pub level: ProtocolLevel,
    pub client_id: String,
    /// The client sent an empty id and the broker chose `client_id`.
    pub assigned_client_id: bool,
}

/// Protocol hub: CONNECT validation, the session state repository and
/// broker-wide dispatch.
pub struct Hub {
    settings: BrokerSettings,
    sessions: SessionRepository,
    authenticator: Option<Arc<dyn Authenticator>>,
    observer: Arc<dyn SessionObserver>,
}

impl Hub {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            sessions: SessionRepository::new(),
            authenticator: None,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.sessions
    }

    pub fn observer(&self) -> &dyn SessionObserver {
        self.observer.as_ref()
    }

    /// Checks protocol level, client id and credentials, in that order.
    ///
    /// A rejection carries the encoded CONNACK to send before closing. No
    /// session state is touched here.
    pub async fn validate_connect(&self, connect: &Connect) -> Result<AcceptedConnect, ConnectRejection> {
        let level = self.negotiate_level(connect)?;
        let (client_id, assigned_client_id) = Self::client_id(level, connect)?;

        if let Some(authenticator) = &self.authenticator {
            let username = connect.username.as_deref().unwrap_or_default();
            let password = connect.password.as_deref().unwrap_or_default();
            if !authenticator.authenticate(username, password).await {
                return Err(Self::reject(level, ConnectErrorKind::InvalidCredentials));
            }
        }

        Ok(AcceptedConnect {
            level,
            client_id,
            assigned_client_id,
        })
    }

    fn negotiate_level(&self, connect: &Connect) -> Result<ProtocolLevel, ConnectRejection> {
        let enabled = &self.settings.protocols;
        match connect.level() {
            Some(level) if enabled.is_enabled(level) && level.accepts_name(&connect.protocol_name) => {
                Ok(level)
            }
            // A 5.0 client understands the 5.0 reason code.
            Some(ProtocolLevel::V5) if enabled.v5 => Err(Self::reject(
                ProtocolLevel::V5,
                ConnectErrorKind::UnsupportedProtocolVersion,
            )),
            _ => Err(Self::reject(
                ProtocolLevel::V3_1_1,
                ConnectErrorKind::UnsupportedProtocolVersion,
            )),
        }
    }

    fn client_id(level: ProtocolLevel, connect: &Connect) -> Result<(String, bool), ConnectRejection> {
        let invalid = || Self::reject(level, ConnectErrorKind::InvalidClientId);
        let id = std::str::from_utf8(&connect.client_id).map_err(|_| invalid())?;

        if id.is_empty() {
            return match level.empty_client_id() {
                EmptyClientId::Assigned => Ok((Self::generate_client_id(), true)),
                EmptyClientId::AssignedIfClean if connect.clean_session => {
                    Ok((Self::generate_client_id(), true))
                }
                _ => Err(invalid()),
            };
        }
        if level.max_client_id_len().is_some_and(|max| id.len() > max) {
            return Err(invalid());
        }
        Ok((id.to_string(), false))
    }

    fn generate_client_id() -> String {
        format!("auto-{}", Uuid::new_v4().simple())
    }

    fn reject(level: ProtocolLevel, kind: ConnectErrorKind) -> ConnectRejection {
        let connack = Packet::ConnAck(ConnAck {
            session_present: false,
            code: level.rejection_code(kind),
            properties: Properties::default(),
        });
        ConnectRejection {
            kind,
            connack: encode_to_bytes(&connack, level).unwrap_or_default(),
        }
    }

    /// The positive CONNACK for an accepted CONNECT.
    pub fn connack(&self, accepted: &AcceptedConnect, session_present: bool) -> ConnAck {
        let mut properties = Properties::new();
        if accepted.level.is_v5() {
            if accepted.assigned_client_id {
                properties.push(Property::AssignedClientIdentifier(accepted.client_id.clone()));
            }
            properties.push(Property::ReceiveMaximum(self.settings.max_receive.max(1)));
            properties.push(Property::MaximumPacketSize(
                u32::try_from(self.settings.max_packet_size).unwrap_or(u32::MAX),
            ));
            properties.push(Property::SubscriptionIdentifierAvailable(0));
            properties.push(Property::SharedSubscriptionAvailable(0));
        }
        ConnAck {
            session_present,
            code: reason_code::SUCCESS,
            properties,
        }
    }

    /// Closes whatever connection currently owns `client_id`'s state and
    /// waits until it has let go.
    pub async fn take_over(&self, client_id: &str) {
        let Some(owner) = self.sessions.get(client_id).and_then(|state| state.owner()) else {
            return;
        };
        info!(client_id, "session taken over by a new connection");
        owner.close(CloseReason::TakenOver);
        owner.stopped().await;
    }

    /// Returns the state to bind a new connection to and whether it was
    /// resumed.
    ///
    /// Existing state is reused only when `clean` is false. Otherwise a fresh
    /// state replaces any previous entry.
    pub fn create_or_resume_state(&self, client_id: &str, clean: bool) -> (Arc<SessionState>, bool) {
        if !clean {
            if let Some(existing) = self.sessions.get(client_id) {
                debug!(client_id, created_at = %existing.created_at(), "resuming session state");
                return (existing, true);
            }
        }
        let state = Arc::new(SessionState::new(
            client_id,
            self.settings.outgoing_queue_capacity,
        ));
        self.sessions.insert(Arc::clone(&state));
        (state, false)
    }

    /// Drops `state` from the repository unless a newer state replaced it.
    pub fn discard_state(&self, state: &Arc<SessionState>) {
        if self.sessions.remove_if_same(state) {
            debug!(client_id = state.client_id(), "session state discarded");
        }
    }

    /// Enqueues a copy of `message` on every session with a matching
    /// subscription and returns how many sessions received one.
    ///
    /// Delivered QoS is the lower of the message QoS and the granted QoS, and
    /// the retain flag is cleared. QoS 0 copies skip inactive sessions.
    pub fn dispatch(&self, message: &Message) -> usize {
        let mut delivered = 0;
        self.sessions.for_each(|state| {
            let Some(granted) = state.subscriptions().match_max(&message.topic) else {
                return;
            };
            let qos = message.qos.min(granted);
            let active = state.is_active();
            if qos == QoS::AtMostOnce && !active {
                return;
            }

            let item = Outgoing::Publish(PublishDescriptor {
                topic: message.topic.clone(),
                payload: message.payload.clone(),
                qos,
                retain: false,
                dup: false,
            });
            match state.enqueue(item) {
                Ok(()) => delivered += 1,
                Err(_) if active => {
                    warn!(
                        client_id = state.client_id(),
                        "outgoing queue overflow, closing session"
                    );
                    state.close_owner(CloseReason::QueueOverflow);
                }
                Err(_) => {
                    warn!(
                        client_id = state.client_id(),
                        "outgoing queue full, dropping message for offline session"
                    );
                }
            }
        });
        delivered
    }

    /// Asks every live connection to close.
    pub fn shutdown(&self) {
        self.sessions
            .for_each(|state| state.close_owner(CloseReason::ServerShutdown));
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("settings", &self.settings)
            .field("sessions", &self.sessions.len())
            .field("authenticator", &self.authenticator.is_some())
            .finish()
    }
}
