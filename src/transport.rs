//! UDP transport: request-id allocation, response demultiplexing and the
//! retry schedule.
//!
//! One bound socket per client. Outstanding requests live in a concurrent
//! map of request id to one-shot channel; the receive task resolves the
//! channel that owns an incoming datagram's request id. Cancelling the
//! sender side (dropping the future) removes the map entry, so a late
//! datagram is logged and dropped rather than delivered.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::message::{CommunityMessage, CommunityResponse};
use crate::pdu::VarBind;
use crate::{Error, Result};

/// Per-attempt timeout schedule in seconds: the worst case send latency is
/// the sum.
pub const DEFAULT_TIMEOUTS: [u64; 3] = [20, 10, 10];

/// The default schedule as durations.
pub fn default_timeouts() -> Vec<Duration> {
    DEFAULT_TIMEOUTS.iter().map(|&s| Duration::from_secs(s)).collect()
}

// Datagrams are reassembled by the kernel; SNMP replies can exceed an MTU.
const RECV_BUFFER: usize = 65535;

type Pending<T> = Arc<DashMap<u16, oneshot::Sender<Result<T>>>>;

/// Removes the pending-map entry when an attempt ends for any reason,
/// including the caller dropping the future mid-await.
struct PendingGuard<T> {
    pending: Pending<T>,
    id: u16,
}

impl<T> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// UDP endpoint for SNMPv1/v2c community messages.
pub struct SnmpTransport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    pending: Pending<Vec<VarBind>>,
    next_request_id: AtomicU16,
    timeouts: Vec<Duration>,
    recv_task: JoinHandle<()>,
}

impl SnmpTransport {
    /// Bind an ephemeral local port, connect it to `peer` and start the
    /// receive task.
    pub async fn connect(peer: SocketAddr, timeouts: Vec<Duration>) -> Result<Self> {
        let socket = bind_and_connect(peer).await?;
        let pending: Pending<Vec<VarBind>> = Arc::new(DashMap::new());
        let recv_task = tokio::spawn(recv_loop(
            Arc::clone(&socket),
            Arc::clone(&pending),
            peer,
        ));
        Ok(Self {
            socket,
            peer,
            pending,
            next_request_id: AtomicU16::new(0),
            timeouts,
            recv_task,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn next_id(&self) -> u16 {
        self.next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    /// One attempt: allocate a fresh request id, send, await the response
    /// for at most `timeout`.
    pub async fn send_once(
        &self,
        msg: &mut CommunityMessage,
        timeout: Duration,
    ) -> Result<Vec<VarBind>> {
        let id = self.next_id();
        msg.set_request_id(id);
        let encoded = msg.encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard { pending: Arc::clone(&self.pending), id };

        self.socket.send(&encoded).await?;
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

    /// Walk the timeout schedule, retrying each timeout with a fresh
    /// request id. Non-timeout errors abort immediately.
    pub async fn send(&self, msg: &mut CommunityMessage) -> Result<Vec<VarBind>> {
        for &timeout in &self.timeouts {
            match self.send_once(msg, timeout).await {
                Err(Error::Timeout) => continue,
                outcome => return outcome,
            }
        }
        Err(Error::Timeout)
    }
}

impl Drop for SnmpTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

pub(crate) async fn bind_and_connect(peer: SocketAddr) -> Result<Arc<UdpSocket>> {
    let local: SocketAddr = if peer.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await.map_err(|_| Error::NoConnection)?;
    socket.connect(peer).await.map_err(|_| Error::NoConnection)?;
    Ok(Arc::new(socket))
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    pending: Pending<Vec<VarBind>>,
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
        dispatch(&buf[..len], &pending, peer);
    }
}

// How much payload to include in decode-failure logs.
const MAX_HEX_LOG: usize = 40;

fn dispatch(data: &[u8], pending: &Pending<Vec<VarBind>>, peer: SocketAddr) {
    let mut resp = CommunityResponse::default();
    let outcome = match resp.decode(data) {
        Ok(()) => match resp.pdu.status_error() {
            Some(err) => Err(err),
            None => Ok(std::mem::take(&mut resp.pdu.bindings)),
        },
        Err(err) => {
            let excerpt = hex::encode(&data[..data.len().min(MAX_HEX_LOG)]);
            warn!("failed to parse datagram: {err} {excerpt}");
            Err(err)
        }
    };

    // The request id sits at the start of the PDU; when decoding fails
    // before it is known there is nothing to route and the query times out.
    let Some(id) = resp.pdu.request_id else {
        error!("failed to decode datagram (source ip: {})", peer.ip());
        return;
    };
    let Some(id) = u16::try_from(id).ok() else {
        error!("unknown request id {id} (source ip: {})", peer.ip());
        return;
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
