//! VelocyPack subset codec.
//!
//! Encodes and decodes the slice of VelocyPack the wire protocol actually
//! uses: null, booleans, doubles, integers, strings, arrays, and objects.
//! Values are bridged through `serde_json::Value`, which is also the body
//! model on the request side.
//!
//! Arrays are written with an index table (0x06/0x07/0x08, offset width
//! chosen by total size); objects with a sorted index table (0x0b/0x0c/0x0d).
//! The decoder additionally accepts index-table-free arrays (0x02..0x05).
//! All multi-byte integers are little-endian.

use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encode a value to VelocyPack bytes.
pub fn to_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => buf.push(0x18),
        Value::Bool(false) => buf.push(0x19),
        Value::Bool(true) => buf.push(0x1a),
        Value::Number(n) => write_number(buf, n)?,
        Value::String(s) => write_string(buf, s),
        Value::Array(items) => write_array(buf, items)?,
        Value::Object(map) => write_object(buf, map)?,
    }
    Ok(())
}

fn write_number(buf: &mut Vec<u8>, n: &Number) -> Result<()> {
    if let Some(u) = n.as_u64() {
        if u <= 9 {
            buf.push(0x30 + u as u8);
        } else {
            let width = uint_width(u);
            buf.push(0x27 + width as u8);
            buf.extend_from_slice(&u.to_le_bytes()[..width]);
        }
    } else if let Some(i) = n.as_i64() {
        // as_u64 failed, so i is negative
        if i >= -6 {
            buf.push((0x40 + i) as u8);
        } else {
            let width = int_width(i);
            buf.push(0x1f + width as u8);
            buf.extend_from_slice(&i.to_le_bytes()[..width]);
        }
    } else if let Some(f) = n.as_f64() {
        buf.push(0x1b);
        buf.extend_from_slice(&f.to_le_bytes());
    } else {
        return Err(Error::codec(format!("unrepresentable number: {n}")));
    }
    Ok(())
}

/// Bytes needed to store `u` unsigned.
fn uint_width(u: u64) -> usize {
    let bits = 64 - u.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// Bytes needed to store `i` as sign-extended two's complement.
fn int_width(i: i64) -> usize {
    for width in 1..8usize {
        let shift = 64 - width * 8;
        if (i << shift) >> shift == i {
            return width;
        }
    }
    8
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    if bytes.len() <= 126 {
        buf.push(0x40 + bytes.len() as u8);
    } else {
        buf.push(0xbf);
        buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    }
    buf.extend_from_slice(bytes);
}

fn write_array(buf: &mut Vec<u8>, items: &[Value]) -> Result<()> {
    if items.is_empty() {
        buf.push(0x01);
        return Ok(());
    }
    let mut encoded = Vec::new();
    let mut offsets = Vec::with_capacity(items.len());
    for item in items {
        offsets.push(encoded.len());
        write_value(&mut encoded, item)?;
    }
    write_indexed(buf, 0x06, &encoded, &offsets)
}

fn write_object(buf: &mut Vec<u8>, map: &Map<String, Value>) -> Result<()> {
    if map.is_empty() {
        buf.push(0x0a);
        return Ok(());
    }
    // Index table must be sorted by attribute name; writing pairs in key
    // order makes the in-order offsets already sorted.
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    let mut encoded = Vec::new();
    let mut offsets = Vec::with_capacity(map.len());
    for key in keys {
        offsets.push(encoded.len());
        write_string(&mut encoded, key);
        write_value(&mut encoded, &map[key])?;
    }
    write_indexed(buf, 0x0b, &encoded, &offsets)
}

/// Emit tag + byteLength + nrItems + payload + index table, picking the
/// narrowest of the 1/2/4-byte header variants that fits.
fn write_indexed(buf: &mut Vec<u8>, base_tag: u8, payload: &[u8], offsets: &[usize]) -> Result<()> {
    let n = offsets.len();
    for (variant, width) in [(0u8, 1usize), (1, 2), (2, 4)] {
        let header = 1 + 2 * width;
        let total = header + payload.len() + n * width;
        let max = match width {
            1 => 0xff,
            2 => 0xffff,
            _ => 0xffff_ffff,
        };
        if total > max || n > max {
            continue;
        }
        buf.push(base_tag + variant);
        buf.extend_from_slice(&(total as u64).to_le_bytes()[..width]);
        buf.extend_from_slice(&(n as u64).to_le_bytes()[..width]);
        buf.extend_from_slice(payload);
        for off in offsets {
            buf.extend_from_slice(&((header + off) as u64).to_le_bytes()[..width]);
        }
        return Ok(());
    }
    Err(Error::codec("value exceeds 4-byte velocypack length header"))
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode one value, requiring the input to hold exactly one value.
pub fn from_slice(bytes: &[u8]) -> Result<Value> {
    let (value, used) = from_slice_prefix(bytes)?;
    if used != bytes.len() {
        return Err(Error::codec(format!(
            "{} trailing bytes after velocypack value",
            bytes.len() - used
        )));
    }
    Ok(value)
}

/// Decode one value from the front of `bytes`, returning the value and the
/// number of bytes consumed. Used for the response layout where a meta array
/// is followed by a body slice.
pub fn from_slice_prefix(bytes: &[u8]) -> Result<(Value, usize)> {
    let mut reader = Reader { bytes, pos: 0 };
    let value = reader.read_value()?;
    Ok((value, reader.pos))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn read_value(&mut self) -> Result<Value> {
        let tag = self.take(1)?[0];
        match tag {
            0x01 => Ok(Value::Array(Vec::new())),
            0x0a => Ok(Value::Object(Map::new())),
            0x18 => Ok(Value::Null),
            0x19 => Ok(Value::Bool(false)),
            0x1a => Ok(Value::Bool(true)),
            0x1b => {
                let raw: [u8; 8] = self.take(8)?.try_into().unwrap();
                let f = f64::from_le_bytes(raw);
                Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| Error::codec("non-finite double"))
            }
            0x02..=0x05 => self.read_unindexed_array(1 << (tag - 0x02)),
            0x06..=0x08 => self.read_indexed(tag - 0x06, false),
            0x0b..=0x0d => self.read_indexed(tag - 0x0b, true),
            0x20..=0x27 => {
                let width = (tag - 0x1f) as usize;
                let raw = self.take(width)?;
                let mut v = [0u8; 8];
                v[..width].copy_from_slice(raw);
                let shift = 64 - width * 8;
                let i = (i64::from_le_bytes(v) << shift) >> shift;
                Ok(Value::Number(i.into()))
            }
            0x28..=0x2f => {
                let width = (tag - 0x27) as usize;
                let raw = self.take(width)?;
                let mut v = [0u8; 8];
                v[..width].copy_from_slice(raw);
                Ok(Value::Number(u64::from_le_bytes(v).into()))
            }
            0x30..=0x39 => Ok(Value::Number(u64::from(tag - 0x30).into())),
            0x3a..=0x3f => Ok(Value::Number(i64::from(tag as i64 - 0x40).into())),
            0x40..=0xbe => {
                let len = (tag - 0x40) as usize;
                let raw = self.take(len)?;
                Ok(Value::String(utf8(raw)?))
            }
            0xbf => {
                let raw: [u8; 8] = self.take(8)?.try_into().unwrap();
                let len = u64::from_le_bytes(raw) as usize;
                let raw = self.take(len)?;
                Ok(Value::String(utf8(raw)?))
            }
            other => Err(Error::codec(format!(
                "unsupported velocypack tag 0x{other:02x}"
            ))),
        }
    }

    /// Array without index table: header, then items back to back until the
    /// declared byte length is exhausted.
    fn read_unindexed_array(&mut self, width: usize) -> Result<Value> {
        let start = self.pos - 1;
        let byte_length = self.read_uint(width)?;
        let end = start + byte_length;
        // Optional zero padding between header and first item.
        while self.pos < end && self.bytes[self.pos] == 0 {
            self.pos += 1;
        }
        let mut items = Vec::new();
        while self.pos < end {
            items.push(self.read_value()?);
        }
        if self.pos != end {
            return Err(Error::codec("array items overran declared byte length"));
        }
        Ok(Value::Array(items))
    }

    /// Array or object with index table. Items are laid out contiguously in
    /// order, so the trailing table is skipped rather than followed.
    fn read_indexed(&mut self, variant: u8, object: bool) -> Result<Value> {
        let width = 1usize << variant;
        let start = self.pos - 1;
        let byte_length = self.read_uint(width)?;
        let nr_items = self.read_uint(width)?;
        let end = start + byte_length;

        let value = if object {
            let mut map = Map::with_capacity(nr_items);
            for _ in 0..nr_items {
                let key = match self.read_value()? {
                    Value::String(s) => s,
                    other => {
                        return Err(Error::codec(format!("non-string object key: {other}")));
                    }
                };
                map.insert(key, self.read_value()?);
            }
            Value::Object(map)
        } else {
            let mut items = Vec::with_capacity(nr_items);
            for _ in 0..nr_items {
                items.push(self.read_value()?);
            }
            Value::Array(items)
        };

        // Skip the index table.
        let expected_table = nr_items * width;
        if end < self.pos || end - self.pos != expected_table {
            return Err(Error::codec("index table size mismatch"));
        }
        self.pos = end;
        Ok(value)
    }

    fn read_uint(&mut self, width: usize) -> Result<usize> {
        let raw = self.take(width)?;
        let mut v = [0u8; 8];
        v[..width].copy_from_slice(raw);
        Ok(u64::from_le_bytes(v) as usize)
    }

    fn take(&mut self, n: usize) -> Result<&'_ [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::codec("truncated velocypack value"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

fn utf8(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|_| Error::codec("invalid utf-8 in string"))
}
