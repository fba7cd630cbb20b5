//! BER decoder with push-down into constructed values.

use super::{application, context, number, Class, Oid, Tag, Value};
use crate::{Error, Result};

// Longest integer body accepted on decode; 16 octets covers the full
// Counter64 range with a sign octet to spare.
const MAX_INTEGER_OCTETS: usize = 16;

struct Frame<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Streaming decoder over a byte slice.
///
/// Constructed values are traversed with [`Decoder::enter`] and
/// [`Decoder::leave`]; the nested region is popped on leave whether or not
/// it was fully consumed, so vendor encodings with trailing slack decode
/// cleanly.
pub struct Decoder<'a> {
    stack: Vec<Frame<'a>>,
    tag: Option<Tag>,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            stack: vec![Frame { data, pos: 0 }],
            tag: None,
        }
    }

    /// The tag a subsequent [`Decoder::read`] would decode, without
    /// advancing past it.
    pub fn peek(&mut self) -> Result<Tag> {
        if self.at_end() {
            return Err(Error::syntax("input is empty"));
        }
        if let Some(tag) = self.tag {
            return Ok(tag);
        }
        let tag = self.read_tag()?;
        self.tag = Some(tag);
        Ok(tag)
    }

    /// Decode one tag-length-value triple.
    pub fn read(&mut self) -> Result<(Tag, Value)> {
        let tag = self.peek()?;
        let length = self.read_length()?;
        let body = self.read_bytes(length)?;
        self.tag = None;
        let value = decode_value(tag, body)?;
        Ok((tag, value))
    }

    /// True when the current region has no more data.
    pub fn eof(&self) -> bool {
        self.at_end()
    }

    /// Descend into the constructed value at the current offset.
    pub fn enter(&mut self) -> Result<()> {
        let tag = self.peek()?;
        if !tag.constructed {
            return Err(Error::syntax("cannot enter a non-constructed tag"));
        }
        let length = self.read_length()?;
        let body = self.read_bytes(length)?;
        self.stack.push(Frame { data: body, pos: 0 });
        self.tag = None;
        Ok(())
    }

    /// Ascend out of the constructed value entered last. Unconsumed bytes
    /// inside the nested region are discarded.
    pub fn leave(&mut self) -> Result<()> {
        if self.stack.len() == 1 {
            return Err(Error::syntax("not inside a constructed value"));
        }
        self.stack.pop();
        self.tag = None;
        Ok(())
    }

    fn frame(&mut self) -> &mut Frame<'a> {
        self.stack
            .last_mut()
            .expect("decoder stack always holds the root frame")
    }

    fn at_end(&self) -> bool {
        let frame = self
            .stack
            .last()
            .expect("decoder stack always holds the root frame");
        frame.pos >= frame.data.len()
    }

    fn read_byte(&mut self) -> Result<u8> {
        let frame = self.frame();
        let byte = *frame
            .data
            .get(frame.pos)
            .ok_or_else(|| Error::syntax("premature end of input"))?;
        frame.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let frame = self.frame();
        let end = frame
            .pos
            .checked_add(count)
            .filter(|&end| end <= frame.data.len())
            .ok_or_else(|| Error::syntax("premature end of input"))?;
        let bytes = &frame.data[frame.pos..end];
        frame.pos = end;
        Ok(bytes)
    }

    fn read_tag(&mut self) -> Result<Tag> {
        let byte = self.read_byte()?;
        let class = Class::from_bits(byte);
        let constructed = byte & 0x20 != 0;
        let mut nr = u32::from(byte & 0x1F);
        if nr == 0x1F {
            // Long form, base-128 with continuation in the top bit.
            nr = 0;
            loop {
                let byte = self.read_byte()?;
                nr = nr
                    .checked_mul(128)
                    .map(|n| n | u32::from(byte & 0x7F))
                    .ok_or_else(|| Error::syntax("tag number too large"))?;
                if byte & 0x80 == 0 {
                    break;
                }
            }
        }
        Ok(Tag { number: nr, constructed, class })
    }

    fn read_length(&mut self) -> Result<usize> {
        let byte = self.read_byte()?;
        if byte & 0x80 == 0 {
            return Ok(usize::from(byte));
        }
        let count = usize::from(byte & 0x7F);
        if count == 0x7F {
            return Err(Error::syntax("reserved length indicator"));
        }
        let mut length = 0usize;
        for &byte in self.read_bytes(count)? {
            length = length
                .checked_mul(256)
                .map(|l| l | usize::from(byte))
                .ok_or_else(|| Error::syntax("length out of range"))?;
        }
        Ok(length)
    }
}

fn decode_value(tag: Tag, body: &[u8]) -> Result<Value> {
    match tag.class {
        Class::Context => Ok(match tag.number {
            context::NO_SUCH_OBJECT => Value::NoSuchObject,
            context::NO_SUCH_INSTANCE => Value::NoSuchInstance,
            context::END_OF_MIB_VIEW => Value::EndOfMibView,
            _ => Value::Bytes(body.to_vec()),
        }),
        Class::Application => match tag.number {
            application::COUNTER32
            | application::GAUGE32
            | application::TIMETICKS
            | application::COUNTER64 => Ok(Value::Integer(decode_integer(body)?)),
            _ => Ok(Value::Bytes(body.to_vec())),
        },
        Class::Universal => match tag.number {
            number::BOOLEAN => decode_boolean(body),
            number::INTEGER | number::ENUMERATED => {
                Ok(Value::Integer(decode_integer(body)?))
            }
            number::NULL => decode_null(body),
            number::OBJECT_IDENTIFIER => Ok(Value::Oid(decode_oid(body)?)),
            _ => Ok(Value::Bytes(body.to_vec())),
        },
        Class::Private => Ok(Value::Bytes(body.to_vec())),
    }
}

fn decode_boolean(body: &[u8]) -> Result<Value> {
    if body.len() != 1 {
        return Err(Error::syntax("boolean body must be one octet"));
    }
    Ok(Value::Bool(body[0] != 0))
}

fn decode_null(body: &[u8]) -> Result<Value> {
    if !body.is_empty() {
        return Err(Error::syntax("null body must be empty"));
    }
    Ok(Value::Null)
}

/// Two's-complement big-endian integer of 1..=16 octets.
fn decode_integer(body: &[u8]) -> Result<i128> {
    if body.is_empty() {
        return Err(Error::syntax("empty integer body"));
    }
    if body.len() > MAX_INTEGER_OCTETS {
        return Err(Error::syntax("integer body too long"));
    }
    let fill = if body[0] & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut buf = [fill; MAX_INTEGER_OCTETS];
    buf[MAX_INTEGER_OCTETS - body.len()..].copy_from_slice(body);
    Ok(i128::from_be_bytes(buf))
}

fn decode_oid(body: &[u8]) -> Result<Oid> {
    let mut components: Vec<u32> = Vec::new();
    let mut value: u64 = 0;
    for &byte in body {
        if value == 0 && byte == 0x80 {
            // Leading 0x80 continuation octets are non-canonical.
            return Err(Error::syntax("non-canonical OID component"));
        }
        value = (value << 7) | u64::from(byte & 0x7F);
        if value > u64::from(u32::MAX) {
            return Err(Error::syntax("OID component out of range"));
        }
        if byte & 0x80 == 0 {
            components.push(value as u32);
            value = 0;
        }
    }
    let Some(&first) = components.first() else {
        return Err(Error::syntax("empty OID body"));
    };
    if value != 0 {
        return Err(Error::syntax("truncated OID component"));
    }
    if first > 1599 {
        return Err(Error::syntax("first OID octet out of range"));
    }
    let mut result = Vec::with_capacity(components.len() + 1);
    result.push(first / 40);
    result.push(first % 40);
    result.extend_from_slice(&components[1..]);
    Ok(Oid::new(result))
}
