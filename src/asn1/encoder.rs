//! BER encoder, the mirror of the decoder.

use bytes::{BufMut, Bytes, BytesMut};

use super::{number, Oid, Tag};
use crate::{Error, Result};

struct Frame {
    tag: Option<Tag>,
    buf: BytesMut,
}

/// Streaming encoder producing a DER-compatible byte stream.
///
/// Constructed values are written by entering a tag, appending children and
/// leaving; the length octets are patched in when the scope closes.
pub struct Encoder {
    stack: Vec<Frame>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            stack: vec![Frame { tag: None, buf: BytesMut::new() }],
        }
    }

    /// Open a constructed value. Children written before the matching
    /// [`Encoder::leave`] become its body.
    pub fn enter(&mut self, tag: Tag) {
        self.stack.push(Frame { tag: Some(tag), buf: BytesMut::new() });
    }

    /// Close the innermost constructed value and append it to its parent.
    pub fn leave(&mut self) -> Result<()> {
        if self.stack.len() == 1 {
            return Err(Error::syntax("no constructed value to leave"));
        }
        let frame = self.stack.pop().expect("stack holds more than the root");
        let tag = frame.tag.expect("nested frames always carry a tag");
        let parent = self.top();
        emit_tag(parent, tag);
        emit_length(parent, frame.buf.len());
        parent.put_slice(&frame.buf);
        Ok(())
    }

    pub fn write_integer(&mut self, value: i128) {
        self.write_integer_tagged(value, Tag::INTEGER);
    }

    pub fn write_integer_tagged(&mut self, value: i128, tag: Tag) {
        let bytes = value.to_be_bytes();
        // Strip redundant sign-extension octets down to the minimal form.
        let mut start = 0;
        while start < bytes.len() - 1 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        let content = &bytes[start..];
        let buf = self.top();
        emit_tag(buf, tag);
        emit_length(buf, content.len());
        buf.put_slice(content);
    }

    pub fn write_octet_string(&mut self, value: &[u8]) {
        self.write_octet_string_tagged(value, Tag::OCTET_STRING);
    }

    pub fn write_octet_string_tagged(&mut self, value: &[u8], tag: Tag) {
        let buf = self.top();
        emit_tag(buf, tag);
        emit_length(buf, value.len());
        buf.put_slice(value);
    }

    pub fn write_null(&mut self) {
        let buf = self.top();
        emit_tag(buf, Tag::NULL);
        emit_length(buf, 0);
    }

    pub fn write_boolean(&mut self, value: bool) {
        let buf = self.top();
        emit_tag(buf, Tag::universal(number::BOOLEAN));
        emit_length(buf, 1);
        buf.put_u8(if value { 0xFF } else { 0x00 });
    }

    pub fn write_oid(&mut self, oid: &Oid) -> Result<()> {
        let components = oid.components();
        let (&first, rest) = components
            .split_first()
            .filter(|_| components.len() >= 2)
            .ok_or_else(|| Error::syntax("OID needs at least two components"))?;
        let second = rest[0];
        if first > 2 || (first < 2 && second > 39) {
            return Err(Error::syntax(format!("OID head out of range: {oid}")));
        }
        let mut body = BytesMut::new();
        emit_base128(&mut body, first * 40 + second);
        for &component in &rest[1..] {
            emit_base128(&mut body, component);
        }
        let buf = self.top();
        emit_tag(buf, Tag::OBJECT_IDENTIFIER);
        emit_length(buf, body.len());
        buf.put_slice(&body);
        Ok(())
    }

    /// Final byte stream. Errors when a constructed scope is still open.
    pub fn finish(mut self) -> Result<Bytes> {
        if self.stack.len() != 1 {
            return Err(Error::syntax("unbalanced constructed value"));
        }
        let root = self.stack.pop().expect("stack holds the root frame");
        Ok(root.buf.freeze())
    }

    fn top(&mut self) -> &mut BytesMut {
        &mut self
            .stack
            .last_mut()
            .expect("encoder stack always holds the root frame")
            .buf
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn emit_tag(buf: &mut BytesMut, tag: Tag) {
    let mut head = tag.class.bits();
    if tag.constructed {
        head |= 0x20;
    }
    if tag.number < 0x1F {
        buf.put_u8(head | tag.number as u8);
        return;
    }
    buf.put_u8(head | 0x1F);
    emit_base128(buf, tag.number);
}

fn emit_length(buf: &mut BytesMut, length: usize) {
    if length < 0x80 {
        buf.put_u8(length as u8);
        return;
    }
    let bytes = length.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    buf.put_u8(0x80 | (bytes.len() - start) as u8);
    buf.put_slice(&bytes[start..]);
}

/// Base-128 groups, most significant first, continuation bit on all but the
/// last octet.
fn emit_base128(buf: &mut BytesMut, value: u32) {
    let mut groups = [0u8; 5];
    let mut n = 0;
    let mut rest = value;
    loop {
        groups[n] = (rest & 0x7F) as u8;
        n += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (1..n).rev() {
        buf.put_u8(groups[i] | 0x80);
    }
    buf.put_u8(groups[0]);
}
