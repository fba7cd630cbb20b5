//! UDP transport for SNMPv3: demultiplexing by message id, caching of the
//! agent's engine parameters and USM report handling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::message::{ResponseBody, ScopedResponse, SecurityParams, V3Message, V3Response};
use super::UsmKeys;
use crate::asn1::Oid;
use crate::pdu::{VarBind, PDU_REPORT, PDU_RESPONSE};
use crate::transport::bind_and_connect;
use crate::{Error, Result};

/// Fixed usmStats OIDs an agent reports USM failures under
/// (RFC 3414 section 5).
const REPORT_OIDS: [(&[u32], &str); 6] = [
    (&[1, 3, 6, 1, 6, 3, 15, 1, 1, 1, 0], "Unsupported securityLevel"),
    (&[1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0], "Not in time window"),
    (&[1, 3, 6, 1, 6, 3, 15, 1, 1, 3, 0], "Unknown user"),
    (&[1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0], "Unknown snmpEngineID"),
    (&[1, 3, 6, 1, 6, 3, 15, 1, 1, 5, 0], "Wrong digest value"),
    (&[1, 3, 6, 1, 6, 3, 15, 1, 1, 6, 0], "Decryption error"),
];

fn report_reason(oid: &Oid) -> Option<&'static str> {
    REPORT_OIDS
        .iter()
        .find(|(report, _)| oid.components() == *report)
        .map(|&(_, reason)| reason)
}

const RECV_BUFFER: usize = 65535;

type Pending = Arc<DashMap<u16, oneshot::Sender<Result<V3Response>>>>;

struct PendingGuard {
    pending: Pending,
    id: u16,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// UDP endpoint for SNMPv3 messages.
///
/// The receive task resolves pending requests with the decoded envelope;
/// decryption and report/error mapping happen on the sender side, which
/// holds the keys. Every successfully decoded datagram refreshes the cached
/// security parameters so later requests carry current engine boots/time.
pub struct SnmpV3Transport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    pending: Pending,
    next_request_id: AtomicU16,
    timeouts: Vec<Duration>,
    last_params: Arc<Mutex<Option<SecurityParams>>>,
    recv_task: JoinHandle<()>,
}

impl SnmpV3Transport {
    pub async fn connect(peer: SocketAddr, timeouts: Vec<Duration>) -> Result<Self> {
        let socket = bind_and_connect(peer).await?;
        let pending: Pending = Arc::new(DashMap::new());
        let last_params = Arc::new(Mutex::new(None));
        let recv_task = tokio::spawn(recv_loop(
            Arc::clone(&socket),
            Arc::clone(&pending),
            Arc::clone(&last_params),
            peer,
        ));
        Ok(Self {
            socket,
            peer,
            pending,
            next_request_id: AtomicU16::new(0),
            timeouts,
            last_params,
            recv_task,
        })
    }

    /// Most recently observed security parameters, set once the engine
    /// discovery response arrives.
    pub fn cached_params(&self) -> Option<SecurityParams> {
        self.last_params
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn next_id(&self) -> u16 {
        self.next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    async fn exchange(&self, encoded: &[u8], id: u16, timeout: Duration) -> Result<V3Response> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard { pending: Arc::clone(&self.pending), id };

        self.socket.send(encoded).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::protocol("receive task stopped")),
            Err(_) => {
                warn!(
                    "request id {id} timed out after {}s (source ip: {})",
                    timeout.as_secs(),
                    self.peer.ip()
                );
                Err(Error::Timeout)
            }
        }
    }

    /// One unauthenticated attempt, returning the raw envelope. Used for
    /// engine discovery, where the interesting payload is the security
    /// parameters the Report carries.
    pub async fn send_plain_once(
        &self,
        msg: &mut V3Message,
        timeout: Duration,
    ) -> Result<V3Response> {
        let id = self.next_id();
        msg.set_request_id(id);
        msg.flags = 0;
        let encoded = msg.encode()?;
        self.exchange(&encoded, id, timeout).await
    }

    /// Discovery send with the retry schedule.
    pub async fn send_plain(&self, msg: &mut V3Message) -> Result<V3Response> {
        for &timeout in &self.timeouts {
            match self.send_plain_once(msg, timeout).await {
                Err(Error::Timeout) => continue,
                outcome => return outcome,
            }
        }
        Err(Error::Timeout)
    }

    /// One attempt under the given security level: encrypt-then-auth per
    /// the keys present, send, then decrypt and interpret the reply.
    pub async fn send_secure_once(
        &self,
        msg: &mut V3Message,
        keys: &UsmKeys,
        timeout: Duration,
    ) -> Result<Vec<VarBind>> {
        let id = self.next_id();
        msg.set_request_id(id);

        let encoded = match (&keys.privacy, &keys.auth) {
            (Some((priv_proto, priv_key)), Some((auth_proto, auth_key))) => {
                msg.flags = super::message::FLAG_AUTH | super::message::FLAG_PRIV;
                msg.encrypt(*priv_proto, priv_key)?;
                msg.encode_authenticated(*auth_proto, auth_key)?
            }
            (None, Some((auth_proto, auth_key))) => {
                msg.flags = super::message::FLAG_AUTH;
                msg.encode_authenticated(*auth_proto, auth_key)?
            }
            (Some(_), None) => {
                return Err(Error::protocol("privacy requires authentication"))
            }
            (None, None) => {
                msg.flags = 0;
                msg.encode()?
            }
        };

        let mut resp = self.exchange(&encoded, id, timeout).await?;
        if let Some((priv_proto, priv_key)) = &keys.privacy {
            resp.decrypt(*priv_proto, priv_key)?;
        }
        let ResponseBody::Plain(scoped) = resp.body else {
            return Err(Error::Decryption);
        };
        interpret(scoped)
    }

    /// Walk the timeout schedule. A timeout moves to the next attempt; a
    /// USM report failure is remembered and keeps the retries going, to be
    /// surfaced instead of the timeout when the schedule runs out; anything
    /// else aborts immediately.
    pub async fn send_secure(
        &self,
        msg: &mut V3Message,
        keys: &UsmKeys,
    ) -> Result<Vec<VarBind>> {
        let mut usm_failure: Option<Error> = None;
        for &timeout in &self.timeouts {
            let mut attempt = msg.clone();
            match self.send_secure_once(&mut attempt, keys, timeout).await {
                Err(Error::Timeout) => continue,
                Err(err @ Error::AuthV3(_)) => {
                    usm_failure = Some(err);
                    continue;
                }
                outcome => return outcome,
            }
        }
        Err(usm_failure.unwrap_or(Error::Timeout))
    }
}

impl Drop for SnmpV3Transport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Map a decoded scoped PDU to the caller-visible outcome.
fn interpret(scoped: ScopedResponse) -> Result<Vec<VarBind>> {
    let pdu = scoped.pdu;
    if pdu.pdu_id == PDU_REPORT {
        for vb in &pdu.bindings {
            if let Some(reason) = report_reason(&vb.oid) {
                return Err(Error::AuthV3(reason));
            }
        }
        return Err(Error::protocol("expected a response PDU"));
    }
    if pdu.pdu_id != PDU_RESPONSE {
        return Err(Error::protocol("expected a response PDU"));
    }
    if let Some(err) = pdu.status_error() {
        return Err(err);
    }
    Ok(pdu.bindings)
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    pending: Pending,
    last_params: Arc<Mutex<Option<SecurityParams>>>,
    peer: SocketAddr,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                error!("receive failed (source ip: {}): {e}", peer.ip());
                continue;
            }
        };

        let mut resp = V3Response::default();
        let decoded = resp.decode(&buf[..len]);
        // The message id is populated before the fallible remainder, so a
        // decode failure can still be routed to its pending request.
        let msg_id = resp.msg_id;
        if decoded.is_ok() {
            // Later requests need the engine id, boots and time the agent
            // just reported.
            *last_params
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) =
                Some(resp.params.clone());
        }
        let outcome = decoded.map(|()| resp);

        let Some(id) = msg_id else {
            error!("failed to decode datagram (source ip: {})", peer.ip());
            continue;
        };
        let Some(id) = u16::try_from(id).ok() else {
            error!("unknown request id {id} (source ip: {})", peer.ip());
            continue;
        };
        match pending.remove(&id) {
            Some((_, tx)) => {
                if tx.send(outcome).is_err() {
                    error!(
                        "response for cancelled request id {id} (source ip: {})",
                        peer.ip()
                    );
                }
            }
            None => error!("unknown request id {id} (source ip: {})", peer.ip()),
        }
    }
}
