//! Passive trap listener.
//!
//! Binds a local UDP socket, decodes each incoming datagram as a community
//! message and surfaces the variable bindings, with names resolved against
//! a caller-supplied MIB index, on an event channel. The listener never
//! sends responses.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::asn1::{Oid, Value};
use crate::message::CommunityResponse;
use crate::mib::MibIndex;
use crate::{Error, Result};

pub const DEFAULT_TRAP_PORT: u16 = 162;

/// One variable binding from a trap, with its resolved names.
#[derive(Debug, Clone)]
pub struct TrapBinding {
    pub oid: Oid,
    /// Name of the object the OID instances, when the MIB knows it.
    pub name: Option<String>,
    pub value: Value,
    /// For OID-valued bindings, the resolved name of the value.
    pub value_name: Option<String>,
}

/// A decoded trap, surfaced to the caller's sink.
#[derive(Debug, Clone)]
pub struct TrapEvent {
    pub source: SocketAddr,
    pub bindings: Vec<TrapBinding>,
}

/// Passive UDP receiver for SNMP traps.
pub struct TrapListener {
    bind_address: String,
    port: u16,
    mib: Arc<MibIndex>,
    event_tx: mpsc::UnboundedSender<TrapEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<TrapEvent>>,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl TrapListener {
    pub fn new(mib: Arc<MibIndex>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_TRAP_PORT,
            mib,
            event_tx,
            event_rx: Some(event_rx),
            local_addr: None,
            task: None,
        }
    }

    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The address the socket ended up bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The receiving half of the event channel. Can be taken once.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<TrapEvent>> {
        self.event_rx.take()
    }

    /// Bind the socket and start receiving.
    pub async fn listen(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|_| Error::NoConnection)?;
        self.local_addr = socket.local_addr().ok();
        info!("listening for traps on {addr}");

        let mib = Arc::clone(&self.mib);
        let event_tx = self.event_tx.clone();
        self.task = Some(tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            loop {
                let (len, source) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("trap receive failed: {e}");
                        continue;
                    }
                };
                handle_datagram(&buf[..len], source, &mib, &event_tx);
            }
        }));
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TrapListener {
    fn drop(&mut self) {
        self.close();
    }
}

fn handle_datagram(
    data: &[u8],
    source: SocketAddr,
    mib: &MibIndex,
    event_tx: &mpsc::UnboundedSender<TrapEvent>,
) {
    let mut msg = CommunityResponse::default();
    if let Err(e) = msg.decode(data) {
        error!("failed to decode trap package: {e} (source ip: {})", source.ip());
        return;
    }
    debug!("trap message received from {source}");

    let mut bindings = Vec::with_capacity(msg.pdu.bindings.len());
    for vb in msg.pdu.bindings {
        // Only report bindings whose object is in a loaded MIB; the
        // instance suffix is stripped before the lookup, guarded against
        // single-component OIDs.
        let name = vb
            .oid
            .parent()
            .and_then(|parent| mib.get(&parent).map(|object| object.name.clone()));
        if name.is_none() {
            continue;
        }
        let value_name = match &vb.value {
            Value::Oid(oid) => Some(mib.name_of(oid)),
            _ => None,
        };
        info!(
            "trap oid: {} name: {} value: {:?}",
            vb.oid,
            name.as_deref().unwrap_or("-"),
            vb.value
        );
        bindings.push(TrapBinding {
            oid: vb.oid,
            name,
            value: vb.value,
            value_name,
        });
    }
    let _ = event_tx.send(TrapEvent { source, bindings });
}
