//! Redfire SNMP - asynchronous SNMP client library
//!
//! An SNMPv1/v2c/v3 client for monitoring systems that poll many agents
//! concurrently over UDP, with full sub-tree traversal, a passive trap
//! listener, and the User-based Security Model (HMAC authentication,
//! DES-CBC and AES-CFB128 privacy).

pub mod asn1;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod mib;
pub mod pdu;
pub mod transport;
pub mod trap;
pub mod utils;
pub mod v3;

pub use asn1::{Oid, Tag, Value};
pub use client::{Snmp, SnmpClient, SnmpV3};
pub use error::{Error, ErrorStatus, Result};
pub use pdu::VarBind;
pub use v3::{AuthProtocol, PrivProtocol};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
