//! SNMPv1/v2c community message framing.

use bytes::Bytes;

use crate::asn1::{Decoder, Encoder, Tag, Value};
use crate::pdu::{RequestPdu, ResponsePdu};
use crate::{Error, Result};

pub const VERSION_1: i64 = 0;
pub const VERSION_2C: i64 = 1;
pub const VERSION_3: i64 = 3;

/// An outgoing community-framed message:
/// `Sequence { version, community, pdu }`.
#[derive(Debug, Clone)]
pub struct CommunityMessage {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: RequestPdu,
}

impl CommunityMessage {
    pub fn make(version: i64, community: Vec<u8>, pdu: RequestPdu) -> Self {
        Self { version, community, pdu }
    }

    pub fn set_request_id(&mut self, id: u16) {
        self.pdu.set_request_id(id);
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = Encoder::new();
        enc.enter(Tag::SEQUENCE);
        enc.write_integer(i128::from(self.version));
        enc.write_octet_string(&self.community);
        self.pdu.encode(&mut enc)?;
        enc.leave()?;
        enc.finish()
    }
}

/// An incoming community-framed message.
///
/// Decoding is progressive: the PDU's request id is populated on the value
/// before the varbind list is parsed, so decode failures can still be
/// routed by id.
#[derive(Debug, Default)]
pub struct CommunityResponse {
    pub version: Option<i64>,
    pub community: Vec<u8>,
    pub pdu: ResponsePdu,
}

impl CommunityResponse {
    pub fn decode(&mut self, data: &[u8]) -> Result<()> {
        let mut dec = Decoder::new(data);
        dec.enter()?;
        let (_, version) = dec.read()?;
        self.version = version.as_integer().and_then(|v| i64::try_from(v).ok());
        let (_, community) = dec.read()?;
        if let Value::Bytes(community) = community {
            self.community = community;
        } else {
            return Err(Error::decode("community is not an octet string"));
        }
        self.pdu.decode(&mut dec)?;
        dec.leave()
    }
}
