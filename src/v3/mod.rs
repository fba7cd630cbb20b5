//! SNMPv3 with the User-based Security Model (RFC 3414).

pub mod auth;
pub mod message;
pub mod privacy;
pub mod transport;

pub use auth::AuthProtocol;
pub use message::{ScopedPdu, SecurityParams, V3Message, V3Response};
pub use privacy::PrivProtocol;
pub use transport::SnmpV3Transport;

/// Keys localized to an agent's engine id, ready for use on a message.
///
/// Both keys absent is a valid state (noAuthNoPriv); privacy without
/// authentication is not producible through the client constructors.
#[derive(Debug, Clone, Default)]
pub struct UsmKeys {
    pub auth: Option<(AuthProtocol, Vec<u8>)>,
    pub privacy: Option<(PrivProtocol, Vec<u8>)>,
}
