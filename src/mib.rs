//! MIB lookup table and value formatting.
//!
//! The index maps object identifiers to named objects with a display
//! syntax. It is an explicitly constructed structure handed to the
//! formatter and the trap listener; nothing here is process-global.
//! Modules loaded later overlay earlier definitions, so obsoleted modules
//! must be merged first (RFC1213-MIB before the SNMPv2-SMI family).

use std::collections::HashMap;

use serde_json::{json, Map, Value as Json};

use crate::asn1::{Oid, Value};
use crate::{Error, Result};

/// How a managed object's value is rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum Syntax {
    OctetString,
    Integer,
    /// INTEGER with named values.
    Enum(HashMap<i64, String>),
    /// BITS construct: named bits, octet-packed little-endian per octet.
    Bits(HashMap<u32, String>),
    ObjectIdentifier,
    DisplayString,
    MacAddress,
    PhysAddress,
    TimeTicks,
    IpAddress,
    DateAndTime,
    TruthValue,
}

/// What kind of definition an index entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    ObjectType,
    ObjectIdentity,
    ModuleIdentity,
    ObjectGroup,
    NotificationType,
}

#[derive(Debug, Clone)]
pub struct MibObject {
    pub name: String,
    pub kind: ObjectKind,
    pub syntax: Option<Syntax>,
}

impl MibObject {
    pub fn object_type(name: &str, syntax: Syntax) -> Self {
        Self {
            name: name.to_string(),
            kind: ObjectKind::ObjectType,
            syntax: Some(syntax),
        }
    }

    pub fn identity(name: &str, kind: ObjectKind) -> Self {
        Self { name: name.to_string(), kind, syntax: None }
    }
}

/// An explicitly constructed OID-to-object index.
#[derive(Debug, Default)]
pub struct MibIndex {
    objects: HashMap<Oid, MibObject>,
}

impl MibIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one definition, replacing any earlier one under the same
    /// OID. Later modules overlay earlier ones by design.
    pub fn insert(&mut self, oid: Oid, object: MibObject) {
        self.objects.insert(oid, object);
    }

    /// Merge another index into this one, `other` winning on conflicts.
    pub fn merge(&mut self, other: MibIndex) {
        self.objects.extend(other.objects);
    }

    pub fn get(&self, oid: &Oid) -> Option<&MibObject> {
        self.objects.get(oid)
    }

    /// Resolved name of an OID, falling back to dotted notation.
    pub fn name_of(&self, oid: &Oid) -> String {
        match self.objects.get(oid) {
            Some(object) => object.name.clone(),
            None => oid.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Group a walk result into named per-row records.
    ///
    /// Each returned OID splits into `base . column . row-index`; entries
    /// whose column prefix is unknown or is not an OBJECT-TYPE are
    /// skipped. The result is the base object's name and one JSON record
    /// per row index.
    pub fn format_walk(
        &self,
        base: &Oid,
        rows: &[(Oid, Value)],
    ) -> Result<(String, Vec<Map<String, Json>>)> {
        let result_name = self
            .get(base)
            .map(|object| object.name.clone())
            .ok_or_else(|| {
                Error::parse_result(format!("no definition for base oid {base}"))
            })?;
        let prefix_len = base.len() + 1;

        let mut order: Vec<Vec<u32>> = Vec::new();
        let mut table: HashMap<Vec<u32>, Map<String, Json>> = HashMap::new();
        for (oid, value) in rows {
            if oid.len() < prefix_len {
                continue;
            }
            let prefix = Oid::from_slice(&oid.components()[..prefix_len]);
            let idx = oid.components()[prefix_len..].to_vec();
            let Some(object) = self.get(&prefix) else {
                continue;
            };
            if object.kind != ObjectKind::ObjectType {
                continue;
            }
            let Some(syntax) = &object.syntax else {
                continue;
            };
            let record = table.entry(idx.clone()).or_insert_with(|| {
                order.push(idx.clone());
                let mut record = Map::new();
                record.insert(
                    "name".to_string(),
                    json!(Oid::new(idx.clone()).to_string()),
                );
                record
            });
            record.insert(object.name.clone(), format_value(self, syntax, value));
        }

        let mut records = Vec::with_capacity(order.len());
        for idx in order {
            if let Some(record) = table.remove(&idx) {
                records.push(record);
            }
        }
        Ok((result_name, records))
    }
}

/// Render a decoded value under a display syntax. Values whose shape does
/// not match the declared syntax render as JSON null; devices that stray
/// from their own MIB are common enough that this is not an error.
pub fn format_value(index: &MibIndex, syntax: &Syntax, value: &Value) -> Json {
    match syntax {
        Syntax::OctetString | Syntax::DisplayString => match value {
            Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => json!(text),
                Err(_) => Json::Null,
            },
            _ => Json::Null,
        },
        Syntax::Integer => match value {
            Value::Integer(v) => {
                i64::try_from(*v).map(|v| json!(v)).unwrap_or(Json::Null)
            }
            _ => Json::Null,
        },
        Syntax::Enum(values) => value
            .as_integer()
            .and_then(|v| i64::try_from(v).ok())
            .and_then(|v| values.get(&v))
            .map(|name| json!(name))
            .unwrap_or(Json::Null),
        Syntax::Bits(names) => match value {
            Value::Bytes(bytes) => {
                let mut set: Vec<&str> = Vec::new();
                let mut keys: Vec<&u32> = names.keys().collect();
                keys.sort();
                for &bit in keys {
                    let octet = (bit / 8) as usize;
                    if octet < bytes.len() && bytes[octet] & (1 << (bit % 8)) != 0 {
                        set.push(&names[&bit]);
                    }
                }
                json!(set.join(","))
            }
            _ => Json::Null,
        },
        Syntax::ObjectIdentifier => match value {
            Value::Oid(oid) => json!(index.name_of(oid)),
            // Some devices return other types here; old UPS firmware is
            // known to answer with a plain integer.
            _ => Json::Null,
        },
        Syntax::MacAddress | Syntax::PhysAddress => match value {
            Value::Bytes(bytes) => json!(bytes
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":")),
            _ => Json::Null,
        },
        Syntax::TimeTicks => match value {
            Value::Integer(ticks) => json!(format_timeticks(*ticks)),
            _ => Json::Null,
        },
        Syntax::IpAddress => match value {
            Value::Bytes(bytes) if bytes.len() == 4 => {
                json!(format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            _ => Json::Null,
        },
        Syntax::DateAndTime => match value {
            Value::Bytes(bytes) if bytes.len() == 8 || bytes.len() == 11 => {
                let year = u16::from(bytes[0]) << 8 | u16::from(bytes[1]);
                json!(format!(
                    "{year}-{}-{},{:02}:{:02}:{:02}.{}",
                    bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]
                ))
            }
            _ => Json::Null,
        },
        Syntax::TruthValue => match value.as_integer() {
            Some(1) => json!(true),
            Some(2) => json!(false),
            _ => Json::Null,
        },
    }
}

/// Centiseconds to `d days, hh:mm:ss.cc`.
fn format_timeticks(ticks: i128) -> String {
    let centis = ticks.max(0);
    let (days, rest) = (centis / 8_640_000, centis % 8_640_000);
    let (hours, rest) = (rest / 360_000, rest % 360_000);
    let (minutes, rest) = (rest / 6_000, rest % 6_000);
    let (seconds, centis) = (rest / 100, rest % 100);
    format!("{days} days, {hours:02}:{minutes:02}:{seconds:02}.{centis:02}")
}
