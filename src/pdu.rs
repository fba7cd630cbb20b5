//! SNMP PDUs: request construction and response decoding.

use crate::asn1::{Class, Decoder, Encoder, Oid, Tag, Value};
use crate::error::ErrorStatus;
use crate::{Error, Result};

pub const PDU_GET: u32 = 0;
pub const PDU_GET_NEXT: u32 = 1;
pub const PDU_RESPONSE: u32 = 2;
pub const PDU_GET_BULK: u32 = 5;
pub const PDU_REPORT: u32 = 8;

const DEFAULT_MAX_REPETITIONS: u32 = 20;

/// A decoded variable binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub tag: Tag,
    pub value: Value,
}

/// An outgoing request PDU.
///
/// `Get` and `GetNext` share the frame `(request_id, error_status=0,
/// error_index=0, varbinds)`; `GetBulk` reuses the same frame shape with
/// `non_repeaters` and `max_repetitions` in the two middle slots. Request
/// varbinds always carry a Null value.
#[derive(Debug, Clone)]
pub enum RequestPdu {
    Get { request_id: u16, oids: Vec<Oid> },
    GetNext { request_id: u16, oids: Vec<Oid> },
    GetBulk {
        request_id: u16,
        non_repeaters: u32,
        max_repetitions: u32,
        oids: Vec<Oid>,
    },
}

impl RequestPdu {
    pub fn get(oids: Vec<Oid>) -> Self {
        Self::Get { request_id: 0, oids }
    }

    pub fn get_next(oids: Vec<Oid>) -> Self {
        Self::GetNext { request_id: 0, oids }
    }

    pub fn get_bulk(oids: Vec<Oid>) -> Self {
        Self::GetBulk {
            request_id: 0,
            non_repeaters: 0,
            max_repetitions: DEFAULT_MAX_REPETITIONS,
            oids,
        }
    }

    pub fn pdu_id(&self) -> u32 {
        match self {
            Self::Get { .. } => PDU_GET,
            Self::GetNext { .. } => PDU_GET_NEXT,
            Self::GetBulk { .. } => PDU_GET_BULK,
        }
    }

    pub fn set_request_id(&mut self, id: u16) {
        match self {
            Self::Get { request_id, .. }
            | Self::GetNext { request_id, .. }
            | Self::GetBulk { request_id, .. } => *request_id = id,
        }
    }

    /// Write this PDU into `enc` as an implicitly tagged context
    /// constructed value.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        let (request_id, field2, field3, oids) = match self {
            Self::Get { request_id, oids } => (*request_id, 0, 0, oids),
            Self::GetNext { request_id, oids } => (*request_id, 0, 0, oids),
            Self::GetBulk { request_id, non_repeaters, max_repetitions, oids } => {
                (*request_id, *non_repeaters, *max_repetitions, oids)
            }
        };
        enc.enter(Tag::context(self.pdu_id(), true));
        enc.write_integer(i128::from(request_id));
        enc.write_integer(i128::from(field2));
        enc.write_integer(i128::from(field3));
        enc.enter(Tag::SEQUENCE);
        for oid in oids {
            enc.enter(Tag::SEQUENCE);
            enc.write_oid(oid)?;
            enc.write_null();
            enc.leave()?;
        }
        enc.leave()?;
        enc.leave()
    }
}

/// An incoming response, report or request PDU.
///
/// Decoding is progressive: `request_id` is populated before the fallible
/// remainder so that a failure deeper in the varbind list can still be
/// routed to the pending request that owns the id.
#[derive(Debug, Default)]
pub struct ResponsePdu {
    pub pdu_id: u32,
    pub request_id: Option<i64>,
    pub error_status: i64,
    pub error_index: i64,
    pub bindings: Vec<VarBind>,
}

impl ResponsePdu {
    /// Decode from `dec`, positioned at the PDU's implicit context tag.
    pub fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        let tag = dec.peek()?;
        if tag.class != Class::Context || !tag.constructed {
            return Err(Error::decode(format!(
                "expected a PDU tag, got class {:?} number {}",
                tag.class, tag.number
            )));
        }
        self.pdu_id = tag.number;
        dec.enter()?;
        self.request_id = Some(read_integer(dec, "request-id")?);
        self.error_status = read_integer(dec, "error-status")?;
        self.error_index = read_integer(dec, "error-index")?;

        dec.enter()?;
        while !dec.eof() {
            dec.enter()?;
            let (_, oid) = dec.read()?;
            let Value::Oid(oid) = oid else {
                return Err(Error::decode("varbind name is not an OID"));
            };
            let (tag, value) = dec.read()?;
            self.bindings.push(VarBind { oid, tag, value });
            dec.leave()?;
        }
        dec.leave()?;
        dec.leave()
    }

    /// Maps a non-zero error-status to the matching error, resolving the
    /// 1-based error-index to an OID when `1 <= error_index <= len`.
    pub fn status_error(&self) -> Option<Error> {
        if self.error_status == 0 {
            return None;
        }
        let oid = usize::try_from(self.error_index)
            .ok()
            .filter(|&idx| idx >= 1 && idx <= self.bindings.len())
            .map(|idx| self.bindings[idx - 1].oid.clone());
        match ErrorStatus::from_code(self.error_status) {
            Some(status) => Some(Error::status(status, oid)),
            None => Some(Error::decode(format!(
                "unknown error-status {}",
                self.error_status
            ))),
        }
    }
}

fn read_integer(dec: &mut Decoder<'_>, field: &str) -> Result<i64> {
    let (_, value) = dec.read()?;
    let v = value
        .as_integer()
        .ok_or_else(|| Error::decode(format!("{field} is not an integer")))?;
    i64::try_from(v).map_err(|_| Error::decode(format!("{field} out of range")))
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::asn1::number;

    fn sys_descr() -> Oid {
        Oid::from_slice(&[1, 3, 6, 1, 2, 1, 1, 1, 0])
    }

    fn decode(data: &[u8]) -> ResponsePdu {
        let mut pdu = ResponsePdu::default();
        pdu.decode(&mut Decoder::new(data)).unwrap();
        pdu
    }

    fn encode(pdu: &RequestPdu) -> Vec<u8> {
        let mut enc = Encoder::new();
        pdu.encode(&mut enc).unwrap();
        enc.finish().unwrap().to_vec()
    }

    #[test]
    fn test_get_request_wire_format() {
        let mut pdu = RequestPdu::get(vec![sys_descr()]);
        pdu.set_request_id(38);
        assert_eq!(
            encode(&pdu),
            hex!(
                "a0 19"             // GetRequest, implicit context tag
                "02 01 26"          // request-id 38
                "02 01 00"          // error-status
                "02 01 00"          // error-index
                "30 0e"             // varbind list
                "30 0c"
                "06 08 2b 06 01 02 01 01 01 00"
                "05 00"
            )
            .to_vec()
        );
    }

    #[test]
    fn test_get_bulk_fields() {
        let mut pdu = RequestPdu::get_bulk(vec![sys_descr()]);
        pdu.set_request_id(1);
        let bytes = encode(&pdu);
        assert_eq!(bytes[0], 0xA5);
        // non-repeaters 0, max-repetitions 20 in the status/index slots
        let mut decoded = ResponsePdu::default();
        decoded.decode(&mut Decoder::new(&bytes)).unwrap();
        assert_eq!(decoded.pdu_id, PDU_GET_BULK);
        assert_eq!(decoded.request_id, Some(1));
        assert_eq!(decoded.error_status, 0);
        assert_eq!(decoded.error_index, 20);
    }

    #[test]
    fn test_decode_response() {
        // GetResponse with one octet-string binding.
        let data = hex!(
            "a2 1d"
            "02 01 26"
            "02 01 00"
            "02 01 00"
            "30 12"
            "30 10"
            "06 08 2b 06 01 02 01 01 01 00"
            "04 04 74 65 73 74"
        );
        let pdu = decode(&data);
        assert_eq!(pdu.pdu_id, PDU_RESPONSE);
        assert_eq!(pdu.request_id, Some(38));
        assert_eq!(pdu.bindings.len(), 1);
        assert_eq!(pdu.bindings[0].oid, sys_descr());
        assert_eq!(pdu.bindings[0].tag.number, number::OCTET_STRING);
        assert_eq!(pdu.bindings[0].value, Value::Bytes(b"test".to_vec()));
        assert!(pdu.status_error().is_none());
    }

    #[test]
    fn test_request_id_survives_broken_varbinds() {
        // Valid header then a varbind whose name is not an OID.
        let data = hex!(
            "a2 13"
            "02 02 30 39"       // request-id 12345
            "02 01 00"
            "02 01 00"
            "30 07"
            "30 05 02 01 01 05 00"
        );
        let mut pdu = ResponsePdu::default();
        let res = pdu.decode(&mut Decoder::new(&data));
        assert!(res.is_err());
        assert_eq!(pdu.request_id, Some(12345));
    }

    #[test]
    fn test_status_error_index_bounds() {
        let vb = |oid: Oid| VarBind {
            oid,
            tag: Tag::NULL,
            value: Value::Null,
        };
        let mut pdu = ResponsePdu {
            pdu_id: PDU_RESPONSE,
            request_id: Some(1),
            error_status: 2,
            error_index: 1,
            bindings: vec![vb(sys_descr())],
        };
        match pdu.status_error() {
            Some(Error::Status { status, oid }) => {
                assert_eq!(status, ErrorStatus::NoSuchName);
                assert_eq!(oid, Some(sys_descr()));
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Out-of-range index keeps the error but drops the OID; GetBulk
        // agents are known to echo max-repetitions here.
        pdu.error_index = 20;
        match pdu.status_error() {
            Some(Error::Status { oid, .. }) => assert_eq!(oid, None),
            other => panic!("unexpected: {other:?}"),
        }

        pdu.error_index = 0;
        match pdu.status_error() {
            Some(Error::Status { oid, .. }) => assert_eq!(oid, None),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_error_status() {
        let pdu = ResponsePdu {
            pdu_id: PDU_RESPONSE,
            request_id: Some(1),
            error_status: 99,
            error_index: 0,
            bindings: vec![],
        };
        assert!(matches!(pdu.status_error(), Some(Error::Decode(_))));
    }

    #[test]
    fn test_exception_value_binding() {
        let data = hex!(
            "a2 17"
            "02 01 01"
            "02 01 00"
            "02 01 00"
            "30 0c"
            "30 0a"
            "06 06 2b 06 01 02 01 02"
            "82 00"
        );
        let pdu = decode(&data);
        assert_eq!(pdu.bindings[0].value, Value::EndOfMibView);
        assert!(pdu.bindings[0].value.is_absent());
    }
}
