//! High-level SNMP clients.

use std::time::Duration;

use tokio::net::lookup_host;
use tracing::debug;

use crate::asn1::{Oid, Value};
use crate::error::ErrorStatus;
use crate::message::{CommunityMessage, VERSION_1, VERSION_2C};
use crate::pdu::{RequestPdu, VarBind};
use crate::transport::{default_timeouts, SnmpTransport};
use crate::v3::message::{ScopedPdu, SecurityParams, V3Message};
use crate::v3::{AuthProtocol, PrivProtocol, SnmpV3Transport, UsmKeys};
use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 161;
pub const DEFAULT_MAX_ROWS: usize = 10_000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Community-based client for SNMPv1 and SNMPv2c.
pub struct Snmp {
    host: String,
    port: u16,
    community: Vec<u8>,
    max_rows: usize,
    timeouts: Vec<Duration>,
    version: i64,
    transport: Option<SnmpTransport>,
}

impl Snmp {
    /// An SNMPv2c client.
    pub fn new(host: impl Into<String>, community: &str) -> Self {
        Self::with_version(host, community, VERSION_2C)
    }

    /// An SNMPv1 client. Walks use GetNext and treat a noSuchName
    /// error-status as the end of the subtree.
    pub fn v1(host: impl Into<String>, community: &str) -> Self {
        Self::with_version(host, community, VERSION_1)
    }

    fn with_version(host: impl Into<String>, community: &str, version: i64) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            community: community.as_bytes().to_vec(),
            max_rows: DEFAULT_MAX_ROWS,
            timeouts: default_timeouts(),
            version,
            transport: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn timeouts(mut self, timeouts: Vec<Duration>) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub async fn connect(&mut self) -> Result<()> {
        let peer = resolve(&self.host, self.port).await?;
        let transport = tokio::time::timeout(
            CONNECT_TIMEOUT,
            SnmpTransport::connect(peer, self.timeouts.clone()),
        )
        .await
        .map_err(|_| Error::NoConnection)??;
        debug!("connected to {peer}");
        self.transport = Some(transport);
        Ok(())
    }

    pub fn close(&mut self) {
        self.transport = None;
    }

    fn transport(&self) -> Result<&SnmpTransport> {
        self.transport.as_ref().ok_or(Error::NoConnection)
    }

    async fn request(&self, pdu: RequestPdu) -> Result<Vec<VarBind>> {
        let mut msg =
            CommunityMessage::make(self.version, self.community.clone(), pdu);
        self.transport()?.send(&mut msg).await
    }

    pub async fn get(&self, oid: Oid) -> Result<VarBind> {
        let vbs = self.request(RequestPdu::get(vec![oid])).await?;
        vbs.into_iter()
            .next()
            .ok_or_else(|| Error::decode("empty varbind list in response"))
    }

    pub async fn get_next(&self, oid: Oid) -> Result<VarBind> {
        let vbs = self.request(RequestPdu::get_next(vec![oid])).await?;
        vbs.into_iter()
            .next()
            .ok_or_else(|| Error::decode("empty varbind list in response"))
    }

    /// GetNext over several OIDs at once, keeping only results that are
    /// direct children of one of the requested prefixes.
    pub async fn get_next_multi(&self, oids: Vec<Oid>) -> Result<Vec<(Oid, Value)>> {
        let vbs = self.request(RequestPdu::get_next(oids.clone())).await?;
        Ok(filter_direct_children(vbs, &oids))
    }

    /// Collect every `(oid, value)` under `root`.
    ///
    /// `is_table` keeps all rows; otherwise scalar rows are selected and
    /// whole conceptual rows are skipped over.
    pub async fn walk(&self, root: &Oid, is_table: bool) -> Result<Vec<(Oid, Value)>> {
        let mut walk = WalkState::new(root, is_table, self.max_rows);
        loop {
            let step = if self.version == VERSION_1 {
                match self.request(RequestPdu::get_next(vec![walk.cursor()])).await {
                    // v1 signals end-of-subtree with an error-status
                    // instead of an end-of-mib exception value.
                    Err(Error::Status { status: ErrorStatus::NoSuchName, .. }) => break,
                    other => other?,
                }
            } else {
                self.request(RequestPdu::get_bulk(vec![walk.cursor()])).await?
            };
            if !walk.absorb(step)? {
                break;
            }
        }
        Ok(walk.rows)
    }
}

/// SNMPv3/USM client.
///
/// Master keys are derived from the passphrases at construction time and
/// localized to the agent's engine id during [`SnmpV3::connect`].
pub struct SnmpV3 {
    host: String,
    port: u16,
    max_rows: usize,
    timeouts: Vec<Duration>,
    username: Vec<u8>,
    auth: Option<(AuthProtocol, Vec<u8>)>,
    privacy: Option<(PrivProtocol, Vec<u8>)>,
    localized: Option<UsmKeys>,
    transport: Option<SnmpV3Transport>,
}

impl SnmpV3 {
    pub fn new(
        host: impl Into<String>,
        username: &str,
        auth: Option<(AuthProtocol, &str)>,
        privacy: Option<(PrivProtocol, &str)>,
    ) -> Result<Self> {
        if privacy.is_some() && auth.is_none() {
            return Err(Error::invalid_config("`priv` requires `auth`"));
        }
        let auth = match auth {
            Some((proto, passphrase)) => {
                Some((proto, proto.derive_key(passphrase.as_bytes())?))
            }
            None => None,
        };
        // The privacy passphrase is stretched with the authentication
        // protocol's hash.
        let privacy = match (privacy, &auth) {
            (Some((proto, passphrase)), Some((auth_proto, _))) => {
                Some((proto, auth_proto.derive_key(passphrase.as_bytes())?))
            }
            _ => None,
        };
        Ok(Self {
            host: host.into(),
            port: DEFAULT_PORT,
            max_rows: DEFAULT_MAX_ROWS,
            timeouts: default_timeouts(),
            username: username.as_bytes().to_vec(),
            auth,
            privacy,
            localized: None,
            transport: None,
        })
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn timeouts(mut self, timeouts: Vec<Duration>) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Open the endpoint and run the two-phase engine discovery: an
    /// unauthenticated Get with all-zero security parameters draws a
    /// Report carrying the engine id, against which the keys are
    /// localized once.
    pub async fn connect(&mut self) -> Result<()> {
        let peer = resolve(&self.host, self.port).await?;
        let transport = tokio::time::timeout(
            CONNECT_TIMEOUT,
            SnmpV3Transport::connect(peer, self.timeouts.clone()),
        )
        .await
        .map_err(|_| Error::NoConnection)??;
        self.transport = Some(transport);
        self.discover_engine().await
    }

    async fn discover_engine(&mut self) -> Result<()> {
        let transport = self.transport()?;
        let scoped = ScopedPdu::new(RequestPdu::get(vec![]));
        let mut msg = V3Message::make(scoped, SecurityParams::discovery());
        match transport.send_plain(&mut msg).await {
            Ok(_) => {}
            Err(Error::Timeout) => return Err(Error::Timeout),
            Err(_) => return Err(Error::NoAuthParams),
        }

        let params = transport.cached_params().ok_or(Error::NoAuthParams)?;
        let engine_id = params.engine_id;
        debug!("discovered engine id {}", hex::encode(&engine_id));
        let auth = self
            .auth
            .as_ref()
            .map(|(proto, key)| (*proto, proto.localize(key, &engine_id)));
        let privacy = match (&self.privacy, &self.auth) {
            (Some((proto, key)), Some((auth_proto, _))) => {
                Some((*proto, auth_proto.localize(key, &engine_id)))
            }
            _ => None,
        };
        self.localized = Some(UsmKeys { auth, privacy });
        Ok(())
    }

    pub fn close(&mut self) {
        self.transport = None;
        self.localized = None;
    }

    fn transport(&self) -> Result<&SnmpV3Transport> {
        self.transport.as_ref().ok_or(Error::NoConnection)
    }

    async fn request(&self, pdu: RequestPdu) -> Result<Vec<VarBind>> {
        let transport = self.transport()?;
        let params = transport.cached_params().ok_or(Error::NoAuthParams)?;
        let keys = self.localized.as_ref().ok_or(Error::NoAuthParams)?;
        let scoped = ScopedPdu::new(pdu);
        let mut msg =
            V3Message::make(scoped, params.for_user(self.username.clone()));
        transport.send_secure(&mut msg, keys).await
    }

    pub async fn get(&self, oid: Oid) -> Result<VarBind> {
        let vbs = self.request(RequestPdu::get(vec![oid])).await?;
        vbs.into_iter()
            .next()
            .ok_or_else(|| Error::decode("empty varbind list in response"))
    }

    pub async fn get_next(&self, oid: Oid) -> Result<VarBind> {
        let vbs = self.request(RequestPdu::get_next(vec![oid])).await?;
        vbs.into_iter()
            .next()
            .ok_or_else(|| Error::decode("empty varbind list in response"))
    }

    pub async fn get_next_multi(&self, oids: Vec<Oid>) -> Result<Vec<(Oid, Value)>> {
        let vbs = self.request(RequestPdu::get_next(oids.clone())).await?;
        Ok(filter_direct_children(vbs, &oids))
    }

    pub async fn walk(&self, root: &Oid, is_table: bool) -> Result<Vec<(Oid, Value)>> {
        let mut walk = WalkState::new(root, is_table, self.max_rows);
        loop {
            let step = self
                .request(RequestPdu::get_bulk(vec![walk.cursor()]))
                .await?;
            if !walk.absorb(step)? {
                break;
            }
        }
        Ok(walk.rows)
    }
}

/// A client of any protocol version, as built from configuration.
pub enum SnmpClient {
    Community(Snmp),
    V3(SnmpV3),
}

impl std::fmt::Debug for SnmpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Community(_) => f.debug_tuple("Community").finish(),
            Self::V3(_) => f.debug_tuple("V3").finish(),
        }
    }
}

impl SnmpClient {
    pub async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Community(client) => client.connect().await,
            Self::V3(client) => client.connect().await,
        }
    }

    pub async fn get(&self, oid: Oid) -> Result<VarBind> {
        match self {
            Self::Community(client) => client.get(oid).await,
            Self::V3(client) => client.get(oid).await,
        }
    }

    pub async fn walk(&self, root: &Oid, is_table: bool) -> Result<Vec<(Oid, Value)>> {
        match self {
            Self::Community(client) => client.walk(root, is_table).await,
            Self::V3(client) => client.walk(root, is_table).await,
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Community(client) => client.close(),
            Self::V3(client) => client.close(),
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<std::net::SocketAddr> {
    lookup_host((host, port))
        .await
        .map_err(|_| Error::NoConnection)?
        .next()
        .ok_or(Error::NoConnection)
}

/// Keep the results whose OID is a direct child of a requested prefix.
fn filter_direct_children(vbs: Vec<VarBind>, requested: &[Oid]) -> Vec<(Oid, Value)> {
    vbs.into_iter()
        .filter(|vb| {
            vb.oid
                .parent()
                .map(|parent| requested.contains(&parent))
                .unwrap_or(false)
        })
        .map(|vb| (vb.oid, vb.value))
        .collect()
}

/// Accumulator for one subtree traversal.
struct WalkState {
    root: Oid,
    prefix_len: usize,
    is_table: bool,
    max_rows: usize,
    cursor: Oid,
    rows: Vec<(Oid, Value)>,
}

impl WalkState {
    fn new(root: &Oid, is_table: bool, max_rows: usize) -> Self {
        Self {
            root: root.clone(),
            prefix_len: root.len(),
            is_table,
            max_rows,
            cursor: root.clone(),
            rows: Vec::new(),
        }
    }

    fn cursor(&self) -> Oid {
        self.cursor.clone()
    }

    /// Fold one response into the result set. Returns false when the
    /// traversal is complete.
    fn absorb(&mut self, vbs: Vec<VarBind>) -> Result<bool> {
        if vbs.is_empty() {
            return Ok(false);
        }
        for vb in vbs {
            self.cursor = vb.oid;
            if !self.cursor.starts_with(&self.root) || vb.value.is_absent() {
                return Ok(false);
            }
            if self.is_table || self.cursor.get(self.prefix_len + 1) == Some(0) {
                if self.rows.len() == self.max_rows {
                    return Err(Error::TooManyRows);
                }
                self.rows.push((self.cursor.clone(), vb.value));
            }
        }
        // In a scalar subtree a non-zero component after the column index
        // means we are inside a conceptual table row: skip to the next
        // column by bumping the component at the root's depth.
        if !self.is_table && self.cursor.get(self.prefix_len + 1) != Some(0) {
            let Some(column) = self.cursor.get(self.prefix_len) else {
                return Ok(false);
            };
            self.cursor = self.root.child(column + 1);
        }
        Ok(true)
    }
}
