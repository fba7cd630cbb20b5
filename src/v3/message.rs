//! SNMPv3 message framing: header, USM security parameters and the scoped
//! PDU, with authentication digest insertion and payload encryption.

use bytes::Bytes;

use super::auth::AuthProtocol;
use super::privacy::PrivProtocol;
use crate::asn1::{Decoder, Encoder, Tag, Value};
use crate::pdu::{RequestPdu, ResponsePdu};
use crate::{Error, Result};

pub const FLAG_AUTH: u8 = 0x01;
pub const FLAG_PRIV: u8 = 0x02;

const MSG_MAX_SIZE: i64 = 1 << 16;
const SECURITY_MODEL_USM: i64 = 3;

/// USM security parameters, serialized as a Sequence nested inside an
/// OctetString of the message envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityParams {
    pub engine_id: Vec<u8>,
    pub engine_boots: i64,
    pub engine_time: i64,
    pub user_name: Vec<u8>,
    pub auth_params: Vec<u8>,
    pub priv_params: Vec<u8>,
}

impl SecurityParams {
    /// All-zero parameters for the engine discovery handshake.
    pub fn discovery() -> Self {
        Self::default()
    }

    /// Parameters for a user request: engine identity and counters from the
    /// most recently observed response, empty digest and salt fields.
    pub fn for_user(&self, user_name: Vec<u8>) -> Self {
        Self {
            engine_id: self.engine_id.clone(),
            engine_boots: self.engine_boots,
            engine_time: self.engine_time,
            user_name,
            auth_params: Vec::new(),
            priv_params: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = Encoder::new();
        enc.enter(Tag::SEQUENCE);
        enc.write_octet_string(&self.engine_id);
        enc.write_integer(i128::from(self.engine_boots));
        enc.write_integer(i128::from(self.engine_time));
        enc.write_octet_string(&self.user_name);
        enc.write_octet_string(&self.auth_params);
        enc.write_octet_string(&self.priv_params);
        enc.leave()?;
        enc.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        dec.enter()?;
        let engine_id = read_bytes(&mut dec, "engine-id")?;
        let engine_boots = read_integer(&mut dec, "engine-boots")?;
        let engine_time = read_integer(&mut dec, "engine-time")?;
        let user_name = read_bytes(&mut dec, "user-name")?;
        let auth_params = read_bytes(&mut dec, "auth-params")?;
        let priv_params = read_bytes(&mut dec, "priv-params")?;
        dec.leave()?;
        Ok(Self {
            engine_id,
            engine_boots,
            engine_time,
            user_name,
            auth_params,
            priv_params,
        })
    }
}

/// A PDU paired with its context; the default context is both fields empty.
#[derive(Debug, Clone)]
pub struct ScopedPdu {
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
    pub pdu: RequestPdu,
}

impl ScopedPdu {
    pub fn new(pdu: RequestPdu) -> Self {
        Self {
            context_engine_id: Vec::new(),
            context_name: Vec::new(),
            pdu,
        }
    }

    fn encode_into(&self, enc: &mut Encoder) -> Result<()> {
        enc.enter(Tag::SEQUENCE);
        enc.write_octet_string(&self.context_engine_id);
        enc.write_octet_string(&self.context_name);
        self.pdu.encode(enc)?;
        enc.leave()
    }

    /// Standalone encoding, the plaintext handed to the privacy layer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = Encoder::new();
        self.encode_into(&mut enc)?;
        enc.finish()
    }
}

/// Body of an outgoing v3 message: the scoped PDU, either in the clear or
/// as the ciphertext OctetString produced by the privacy layer.
#[derive(Debug, Clone)]
enum Body {
    Plain(ScopedPdu),
    Encrypted(Vec<u8>),
}

/// An outgoing SNMPv3 message.
#[derive(Debug, Clone)]
pub struct V3Message {
    pub msg_id: u16,
    pub flags: u8,
    pub params: SecurityParams,
    body: Body,
}

impl V3Message {
    pub fn make(scoped_pdu: ScopedPdu, params: SecurityParams) -> Self {
        Self {
            msg_id: 0,
            flags: 0,
            params,
            body: Body::Plain(scoped_pdu),
        }
    }

    /// The message id doubles as the transport request id; the inner PDU
    /// keeps its own id untouched.
    pub fn set_request_id(&mut self, id: u16) {
        self.msg_id = id;
    }

    /// Replace the plaintext scoped PDU with its encryption, storing the
    /// salt in the security parameters.
    pub fn encrypt(&mut self, proto: PrivProtocol, key: &[u8]) -> Result<()> {
        let Body::Plain(ref scoped) = self.body else {
            return Err(Error::protocol("scoped PDU already encrypted"));
        };
        let encoded = scoped.encode()?;
        let ciphertext = proto.encrypt(key, &encoded, &mut self.params)?;
        self.body = Body::Encrypted(ciphertext);
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = Encoder::new();
        enc.enter(Tag::SEQUENCE);
        enc.write_integer(i128::from(crate::message::VERSION_3));
        enc.enter(Tag::SEQUENCE);
        enc.write_integer(i128::from(self.msg_id));
        enc.write_integer(i128::from(MSG_MAX_SIZE));
        enc.write_octet_string(&[self.flags]);
        enc.write_integer(i128::from(SECURITY_MODEL_USM));
        enc.leave()?;
        enc.write_octet_string(&self.params.encode()?);
        match &self.body {
            Body::Plain(scoped) => scoped.encode_into(&mut enc)?,
            Body::Encrypted(ciphertext) => enc.write_octet_string(ciphertext),
        }
        enc.leave()?;
        enc.finish()
    }

    /// Authenticated encoding. The digest field is first zero-filled to the
    /// protocol's truncation length, the whole message is serialized and
    /// HMACed, then the real digest replaces the placeholder and the
    /// message is serialized once more. The two serializations differ only
    /// in the digest window.
    pub fn encode_authenticated(
        &mut self,
        proto: AuthProtocol,
        key: &[u8],
    ) -> Result<Bytes> {
        self.params.auth_params = vec![0; proto.truncated_len()];
        let unsigned = self.encode()?;
        self.params.auth_params = proto.sign(key, &unsigned)?;
        self.encode()
    }
}

/// Body of a received v3 message.
#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Missing,
    Plain(ScopedResponse),
    Encrypted(Vec<u8>),
}

/// A decoded scoped PDU from a response.
#[derive(Debug)]
pub struct ScopedResponse {
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
    pub pdu: ResponsePdu,
}

/// An incoming SNMPv3 message. `msg_id` is populated before the fallible
/// remainder of the envelope so decode failures can be routed by id.
#[derive(Debug, Default)]
pub struct V3Response {
    pub msg_id: Option<i64>,
    pub flags: u8,
    pub params: SecurityParams,
    pub body: ResponseBody,
}

impl V3Response {
    pub fn decode(&mut self, data: &[u8]) -> Result<()> {
        let mut dec = Decoder::new(data);
        dec.enter()?;
        let _version = read_integer(&mut dec, "version")?;

        dec.enter()?;
        self.msg_id = Some(read_integer(&mut dec, "msg-id")?);
        let _max_size = read_integer(&mut dec, "msg-max-size")?;
        let flags = read_bytes(&mut dec, "msg-flags")?;
        self.flags = flags.first().copied().unwrap_or(0);
        let _model = read_integer(&mut dec, "security-model")?;
        dec.leave()?;

        let raw_params = read_bytes(&mut dec, "security-parameters")?;
        self.params = SecurityParams::decode(&raw_params)?;

        if self.flags & FLAG_PRIV != 0 {
            let ciphertext = read_bytes(&mut dec, "encrypted scoped PDU")?;
            self.body = ResponseBody::Encrypted(ciphertext);
        } else {
            self.body = ResponseBody::Plain(decode_scoped(&mut dec)?);
        }
        dec.leave()
    }

    /// Decrypt the scoped PDU in place using the received salt and engine
    /// counters.
    pub fn decrypt(&mut self, proto: PrivProtocol, key: &[u8]) -> Result<()> {
        let ResponseBody::Encrypted(ref ciphertext) = self.body else {
            return Err(Error::Decryption);
        };
        let plain = proto.decrypt(key, ciphertext, &self.params)?;
        let mut dec = Decoder::new(&plain);
        self.body = ResponseBody::Plain(decode_scoped(&mut dec)?);
        Ok(())
    }
}

fn decode_scoped(dec: &mut Decoder<'_>) -> Result<ScopedResponse> {
    dec.enter()?;
    let context_engine_id = read_bytes(dec, "context-engine-id")?;
    let context_name = read_bytes(dec, "context-name")?;
    let mut pdu = ResponsePdu::default();
    pdu.decode(dec)?;
    dec.leave()?;
    Ok(ScopedResponse { context_engine_id, context_name, pdu })
}

fn read_integer(dec: &mut Decoder<'_>, field: &str) -> Result<i64> {
    let (_, value) = dec.read()?;
    let v = value
        .as_integer()
        .ok_or_else(|| Error::decode(format!("{field} is not an integer")))?;
    i64::try_from(v).map_err(|_| Error::decode(format!("{field} out of range")))
}

fn read_bytes(dec: &mut Decoder<'_>, field: &str) -> Result<Vec<u8>> {
    let (_, value) = dec.read()?;
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        _ => Err(Error::decode(format!("{field} is not an octet string"))),
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::asn1::Oid;
    use crate::pdu::PDU_GET;

    fn test_params() -> SecurityParams {
        SecurityParams {
            engine_id: hex!("80001f888059dc486145a26322").to_vec(),
            engine_boots: 3,
            engine_time: 1000,
            user_name: b"monitor".to_vec(),
            auth_params: Vec::new(),
            priv_params: Vec::new(),
        }
    }

    fn test_message() -> V3Message {
        let oid = Oid::from_slice(&[1, 3, 6, 1, 2, 1, 1, 1, 0]);
        let scoped = ScopedPdu::new(RequestPdu::get(vec![oid]));
        let mut msg = V3Message::make(scoped, test_params());
        msg.set_request_id(257);
        msg
    }

    #[test]
    fn test_security_params_round_trip() {
        let params = test_params();
        let encoded = params.encode().unwrap();
        assert_eq!(SecurityParams::decode(&encoded).unwrap(), params);
    }

    #[test]
    fn test_plain_encode_decode() {
        let msg = test_message();
        let bytes = msg.encode().unwrap();

        let mut resp = V3Response::default();
        resp.decode(&bytes).unwrap();
        assert_eq!(resp.msg_id, Some(257));
        assert_eq!(resp.flags, 0);
        assert_eq!(resp.params, test_params());
        match resp.body {
            ResponseBody::Plain(scoped) => {
                assert_eq!(scoped.pdu.pdu_id, PDU_GET);
                assert_eq!(scoped.pdu.bindings.len(), 1);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_digest_insertion_changes_only_the_digest_window() {
        let proto = AuthProtocol::Hmac96Sha;
        let key = proto.derive_key(b"maplesyrup").unwrap();
        let key = proto.localize(&key, &hex!("000000000000000000000002"));

        let mut msg = test_message();
        msg.flags = FLAG_AUTH;
        msg.params.auth_params = vec![0; proto.truncated_len()];
        let unsigned = msg.encode().unwrap();
        let signed = msg.encode_authenticated(proto, &key).unwrap();

        assert_eq!(unsigned.len(), signed.len());
        let diffs: Vec<usize> = unsigned
            .iter()
            .zip(signed.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect();
        assert!(!diffs.is_empty());
        assert!(diffs.len() <= proto.truncated_len());
        // All differing bytes sit in one window of digest size.
        let first = diffs[0];
        let last = *diffs.last().unwrap();
        assert!(last - first < proto.truncated_len());
        // The window holds the digest of the zero-placeholder serialization,
        // and the placeholder itself was zero there.
        let expected = proto.sign(&key, &unsigned).unwrap();
        let pos = signed
            .windows(expected.len())
            .position(|w| w == expected.as_slice())
            .expect("signed message carries the digest");
        assert_eq!(
            &unsigned[pos..pos + expected.len()],
            vec![0u8; expected.len()].as_slice()
        );
    }

    #[test]
    fn test_encrypted_round_trip() {
        let auth = AuthProtocol::Hmac96Sha;
        let master = auth.derive_key(b"maplesyrup").unwrap();
        let key = auth.localize(&master, &hex!("000000000000000000000002"));

        let mut msg = test_message();
        msg.flags = FLAG_AUTH | FLAG_PRIV;
        msg.encrypt(PrivProtocol::Cfb128Aes, &key).unwrap();
        assert_eq!(msg.params.priv_params.len(), 8);
        let bytes = msg.encode().unwrap();

        let mut resp = V3Response::default();
        resp.decode(&bytes).unwrap();
        assert!(matches!(resp.body, ResponseBody::Encrypted(_)));
        resp.decrypt(PrivProtocol::Cfb128Aes, &key).unwrap();
        match resp.body {
            ResponseBody::Plain(scoped) => {
                assert_eq!(scoped.pdu.pdu_id, PDU_GET);
                assert_eq!(
                    scoped.pdu.bindings[0].oid,
                    Oid::from_slice(&[1, 3, 6, 1, 2, 1, 1, 1, 0])
                );
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_decrypt_rejects_plain_body() {
        let msg = test_message();
        let bytes = msg.encode().unwrap();
        let mut resp = V3Response::default();
        resp.decode(&bytes).unwrap();
        assert!(matches!(
            resp.decrypt(PrivProtocol::Cfb128Aes, &[0u8; 16]),
            Err(Error::Decryption)
        ));
    }

    #[test]
    fn test_msg_id_survives_broken_params() {
        // Valid envelope start, then truncated security parameters.
        let mut enc = Encoder::new();
        enc.enter(Tag::SEQUENCE);
        enc.write_integer(3);
        enc.enter(Tag::SEQUENCE);
        enc.write_integer(999);
        enc.write_integer(MSG_MAX_SIZE as i128);
        enc.write_octet_string(&[0]);
        enc.write_integer(3);
        enc.leave().unwrap();
        enc.write_octet_string(&hex!("30 02 04 05"));
        enc.leave().unwrap();
        let bytes = enc.finish().unwrap();

        let mut resp = V3Response::default();
        assert!(resp.decode(&bytes).is_err());
        assert_eq!(resp.msg_id, Some(999));
    }
}
