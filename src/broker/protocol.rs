//! Per protocol level CONNECT rules, kept as data on [`ProtocolLevel`].

use crate::codec::{ProtocolLevel, connack_code, reason_code};
use crate::utils::error::ConnectErrorKind;

/// How a level treats an empty client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyClientId {
    Rejected,
    /// Allowed with CleanSession=1; the server picks an id.
    AssignedIfClean,
    /// Always allowed; the server picks an id and returns it in CONNACK.
    Assigned,
}

impl ProtocolLevel {
    /// Longest client identifier the level accepts, if limited.
    pub fn max_client_id_len(self) -> Option<usize> {
        match self {
            ProtocolLevel::V3_1 => Some(23),
            ProtocolLevel::V3_1_1 | ProtocolLevel::V5 => None,
        }
    }

    pub fn empty_client_id(self) -> EmptyClientId {
        match self {
            ProtocolLevel::V3_1 => EmptyClientId::Rejected,
            ProtocolLevel::V3_1_1 => EmptyClientId::AssignedIfClean,
            ProtocolLevel::V5 => EmptyClientId::Assigned,
        }
    }

    /// CONNACK code for a refused CONNECT at this level.
    pub fn rejection_code(self, kind: ConnectErrorKind) -> u8 {
        match (self.is_v5(), kind) {
            (false, ConnectErrorKind::UnsupportedProtocolVersion) => {
                connack_code::UNACCEPTABLE_PROTOCOL_VERSION
            }
            (false, ConnectErrorKind::InvalidClientId) => connack_code::IDENTIFIER_REJECTED,
            (false, ConnectErrorKind::InvalidCredentials) => connack_code::BAD_USER_NAME_OR_PASSWORD,
            (true, ConnectErrorKind::UnsupportedProtocolVersion) => {
                reason_code::UNSUPPORTED_PROTOCOL_VERSION
            }
            (true, ConnectErrorKind::InvalidClientId) => reason_code::CLIENT_IDENTIFIER_NOT_VALID,
            (true, ConnectErrorKind::InvalidCredentials) => reason_code::BAD_USER_NAME_OR_PASSWORD,
        }
    }

    /// Whether `name` is the protocol name this level requires.
    pub fn accepts_name(self, name: &[u8]) -> bool {
        name == self.protocol_name()
    }
}
