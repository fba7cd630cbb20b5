//! End-to-end scenarios against an in-process mock agent on loopback UDP.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use redfire_snmp::asn1::{application, Encoder, Oid, Tag, Value};
use redfire_snmp::message::{CommunityResponse, VERSION_2C};
use redfire_snmp::pdu::{PDU_GET, PDU_GET_BULK, PDU_GET_NEXT, PDU_REPORT, PDU_RESPONSE};
use redfire_snmp::v3::message::{SecurityParams, V3Response};
use redfire_snmp::{AuthProtocol, Error, ErrorStatus, Snmp, SnmpV3};

fn oid(components: &[u32]) -> Oid {
    Oid::from_slice(components)
}

fn sys_descr() -> Oid {
    oid(&[1, 3, 6, 1, 2, 1, 1, 1, 0])
}

fn if_entry() -> Oid {
    oid(&[1, 3, 6, 1, 2, 1, 2, 2, 1])
}

/// The managed objects of a small two-interface agent, sorted by OID.
fn two_interface_agent() -> Vec<(Oid, Value)> {
    let mut entries = vec![
        (sys_descr(), Value::Bytes(b"Redfire test agent".to_vec())),
        (oid(&[1, 3, 6, 1, 2, 1, 1, 3, 0]), Value::Integer(123_456)),
        // ifIndex
        (if_entry().child(1).child(1), Value::Integer(1)),
        (if_entry().child(1).child(2), Value::Integer(2)),
        // ifDescr
        (if_entry().child(2).child(1), Value::Bytes(b"eth0".to_vec())),
        (if_entry().child(2).child(2), Value::Bytes(b"eth1".to_vec())),
    ];
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn write_value(enc: &mut Encoder, value: &Value) {
    match value {
        Value::Integer(v) => enc.write_integer(*v),
        Value::Bytes(bytes) => enc.write_octet_string(bytes),
        Value::Oid(v) => enc.write_oid(v).unwrap(),
        Value::Null => enc.write_null(),
        Value::Bool(v) => enc.write_boolean(*v),
        Value::NoSuchObject => {
            enc.write_octet_string_tagged(&[], Tag::context(0, false))
        }
        Value::NoSuchInstance => {
            enc.write_octet_string_tagged(&[], Tag::context(1, false))
        }
        Value::EndOfMibView => {
            enc.write_octet_string_tagged(&[], Tag::context(2, false))
        }
    }
}

fn encode_reply(
    request_id: i64,
    error_status: i64,
    error_index: i64,
    bindings: &[(Oid, Value)],
) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.enter(Tag::SEQUENCE);
    enc.write_integer(i128::from(VERSION_2C));
    enc.write_octet_string(b"public");
    enc.enter(Tag::context(PDU_RESPONSE, true));
    enc.write_integer(i128::from(request_id));
    enc.write_integer(i128::from(error_status));
    enc.write_integer(i128::from(error_index));
    enc.enter(Tag::SEQUENCE);
    for (name, value) in bindings {
        enc.enter(Tag::SEQUENCE);
        enc.write_oid(name).unwrap();
        write_value(&mut enc, value);
        enc.leave().unwrap();
    }
    enc.leave().unwrap();
    enc.leave().unwrap();
    enc.leave().unwrap();
    enc.finish().unwrap().to_vec()
}

/// Serve the community protocol over one socket until aborted.
async fn serve_community(socket: UdpSocket, entries: Vec<(Oid, Value)>) {
    let mut buf = [0u8; 65535];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(_) => continue,
        };
        let mut req = CommunityResponse::default();
        if req.decode(&buf[..len]).is_err() {
            continue;
        }
        let request_id = req.pdu.request_id.unwrap_or(0);
        let Some(start) = req.pdu.bindings.first().map(|vb| vb.oid.clone()) else {
            continue;
        };
        let reply = match req.pdu.pdu_id {
            PDU_GET => match entries.iter().find(|(name, _)| *name == start) {
                Some((name, value)) => {
                    encode_reply(request_id, 0, 0, &[(name.clone(), value.clone())])
                }
                None => encode_reply(
                    request_id,
                    0,
                    0,
                    &[(start.clone(), Value::NoSuchObject)],
                ),
            },
            PDU_GET_NEXT => {
                match entries.iter().find(|(name, _)| *name > start) {
                    Some((name, value)) => {
                        encode_reply(request_id, 0, 0, &[(name.clone(), value.clone())])
                    }
                    // End of the MIB: v1 agents answer with noSuchName.
                    None => encode_reply(
                        request_id,
                        i64::from(ErrorStatus::NoSuchName.code()),
                        1,
                        &[(start.clone(), Value::Null)],
                    ),
                }
            }
            PDU_GET_BULK => {
                let max_repetitions = usize::try_from(req.pdu.error_index).unwrap_or(0);
                let mut successors: Vec<(Oid, Value)> = entries
                    .iter()
                    .filter(|(name, _)| *name > start)
                    .take(max_repetitions)
                    .cloned()
                    .collect();
                if successors.len() < max_repetitions {
                    let at = successors
                        .last()
                        .map(|(name, _)| name.clone())
                        .unwrap_or(start);
                    successors.push((at, Value::EndOfMibView));
                }
                encode_reply(request_id, 0, 0, &successors)
            }
            _ => continue,
        };
        let _ = socket.send_to(&reply, from).await;
    }
}

async fn spawn_agent(entries: Vec<(Oid, Value)>) -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = tokio::spawn(serve_community(socket, entries));
    (addr, handle)
}

#[tokio::test]
async fn test_get_scalar() {
    let (addr, agent) = spawn_agent(two_interface_agent()).await;
    let mut client = Snmp::new("127.0.0.1", "public").port(addr.port());
    client.connect().await.unwrap();

    let vb = client.get(sys_descr()).await.unwrap();
    assert_eq!(vb.oid, sys_descr());
    let text = vb.value.as_bytes().unwrap();
    assert!(!text.is_empty());

    client.close();
    agent.abort();
}

#[tokio::test]
async fn test_walk_interfaces_table() {
    let (addr, agent) = spawn_agent(two_interface_agent()).await;
    let mut client = Snmp::new("127.0.0.1", "public").port(addr.port());
    client.connect().await.unwrap();

    let rows = client.walk(&if_entry(), true).await.unwrap();
    // Two interfaces times two columns.
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|(name, _)| name.is_child_of(&if_entry())));

    client.close();
    agent.abort();
}

#[tokio::test]
async fn test_v1_walk_ends_on_no_such_name() {
    let (addr, agent) = spawn_agent(two_interface_agent()).await;
    let mut client = Snmp::v1("127.0.0.1", "public").port(addr.port());
    client.connect().await.unwrap();

    // The interface table is the tail of the agent's MIB, so the final
    // GetNext draws a noSuchName, which must read as normal termination.
    let rows = client.walk(&if_entry(), true).await.unwrap();
    assert_eq!(rows.len(), 4);

    client.close();
    agent.abort();
}

#[tokio::test]
async fn test_walk_row_cap() {
    let (addr, agent) = spawn_agent(two_interface_agent()).await;
    let mut client = Snmp::new("127.0.0.1", "public")
        .port(addr.port())
        .max_rows(2);
    client.connect().await.unwrap();

    let outcome = client.walk(&if_entry(), true).await;
    assert!(matches!(outcome, Err(Error::TooManyRows)));

    client.close();
    agent.abort();
}

#[tokio::test]
async fn test_timeout_against_silent_peer() {
    // Bound socket, nobody reading: every attempt must expire.
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();
    let mut client = Snmp::new("127.0.0.1", "public")
        .port(addr.port())
        .timeouts(vec![Duration::from_millis(300); 3]);
    client.connect().await.unwrap();

    let started = std::time::Instant::now();
    let outcome = client.get(sys_descr()).await;
    assert!(matches!(outcome, Err(Error::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(900));
}

/// A v3 agent that answers discovery with a Report and authenticated
/// requests with a fixed sysDescr binding. Digest checking is left to the
/// client side of the exchange under test.
async fn serve_v3(socket: UdpSocket, engine_id: Vec<u8>) {
    let mut buf = [0u8; 65535];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(_) => continue,
        };
        let mut req = V3Response::default();
        if req.decode(&buf[..len]).is_err() {
            continue;
        }
        let msg_id = req.msg_id.unwrap_or(0);
        let params = SecurityParams {
            engine_id: engine_id.clone(),
            engine_boots: 3,
            engine_time: 1000,
            user_name: req.params.user_name.clone(),
            auth_params: Vec::new(),
            priv_params: Vec::new(),
        };
        let discovery = req.params.engine_id.is_empty();
        let reply = encode_v3_reply(msg_id, &params, discovery);
        let _ = socket.send_to(&reply, from).await;
    }
}

fn encode_v3_reply(msg_id: i64, params: &SecurityParams, discovery: bool) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.enter(Tag::SEQUENCE);
    enc.write_integer(3);
    enc.enter(Tag::SEQUENCE);
    enc.write_integer(i128::from(msg_id));
    enc.write_integer(65507);
    enc.write_octet_string(&[0]);
    enc.write_integer(3);
    enc.leave().unwrap();
    enc.write_octet_string(&params.encode().unwrap());
    enc.enter(Tag::SEQUENCE);
    enc.write_octet_string(b"");
    enc.write_octet_string(b"");
    if discovery {
        enc.enter(Tag::context(PDU_REPORT, true));
        enc.write_integer(0);
        enc.write_integer(0);
        enc.write_integer(0);
        enc.enter(Tag::SEQUENCE);
        enc.enter(Tag::SEQUENCE);
        enc.write_oid(&oid(&[1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0])).unwrap();
        enc.write_integer_tagged(1, Tag::application(application::COUNTER32));
        enc.leave().unwrap();
        enc.leave().unwrap();
        enc.leave().unwrap();
    } else {
        enc.enter(Tag::context(PDU_RESPONSE, true));
        enc.write_integer(0);
        enc.write_integer(0);
        enc.write_integer(0);
        enc.enter(Tag::SEQUENCE);
        enc.enter(Tag::SEQUENCE);
        enc.write_oid(&sys_descr()).unwrap();
        enc.write_octet_string(b"Redfire v3 agent");
        enc.leave().unwrap();
        enc.leave().unwrap();
        enc.leave().unwrap();
    }
    enc.leave().unwrap();
    enc.leave().unwrap();
    enc.finish().unwrap().to_vec()
}

#[tokio::test]
async fn test_v3_auth_discovery_and_get() {
    let engine_id = vec![0x80, 0x00, 0x1F, 0x88, 0x05, 0x9D, 0xC4, 0x86];
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let agent = tokio::spawn(serve_v3(socket, engine_id));

    let mut client = SnmpV3::new(
        "127.0.0.1",
        "monitor",
        Some((AuthProtocol::Hmac96Sha, "Password1")),
        None,
    )
    .unwrap()
    .port(addr.port());
    client.connect().await.unwrap();

    let vb = client.get(sys_descr()).await.unwrap();
    assert_eq!(vb.oid, sys_descr());
    assert_eq!(vb.value.as_bytes().unwrap(), b"Redfire v3 agent");

    client.close();
    agent.abort();
}
