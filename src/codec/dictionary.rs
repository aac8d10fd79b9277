//! dictionary-coder v1
//!
//! LZW over bytes. The dictionary starts with the 256 single-byte strings and
//! every emitted code adds `previous string + next byte` as a new code, up to
//! `MAX_CODES` entries. Codes are written as unsigned LEB128 varints after a
//! varint header holding the uncompressed length.

use std::collections::HashMap;

const MAX_CODES: u32 = 1 << 20;

/// Compress `input` into a dictionary-coder v1 body (without the frame tag)
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2 + 8);
    write_varint(&mut out, input.len() as u64);

    let Some((&first, rest)) = input.split_first() else {
        return out;
    };

    let mut dict: HashMap<(u32, u8), u32> = HashMap::new();
    let mut next_code: u32 = 256;
    let mut current = first as u32;

    for &byte in rest {
        if let Some(&code) = dict.get(&(current, byte)) {
            current = code;
            continue;
        }

        write_varint(&mut out, current as u64);
        if next_code < MAX_CODES {
            dict.insert((current, byte), next_code);
            next_code += 1;
        }
        current = byte as u32;
    }

    write_varint(&mut out, current as u64);
    out
}

/// Decompress a dictionary-coder v1 body
///
/// `max_len` bounds the declared output length to guard against bombs.
pub fn decompress(body: &[u8], max_len: u64) -> Result<Vec<u8>, String> {
    let mut pos = 0;
    let expected = read_varint(body, &mut pos)?;
    if expected > max_len {
        return Err(format!(
            "declared length {} exceeds limit of {} bytes",
            expected, max_len
        ));
    }

    let mut out = Vec::with_capacity(expected as usize);
    if expected == 0 {
        if pos != body.len() {
            return Err("trailing data after empty stream".to_string());
        }
        return Ok(out);
    }

    // entries[code - 256] = (prefix code, appended byte)
    let mut entries: Vec<(u32, u8)> = Vec::new();
    let mut scratch = Vec::new();

    let first = read_varint(body, &mut pos)?;
    if first > 255 {
        return Err(format!("first code {} is not a literal", first));
    }
    out.push(first as u8);
    let mut prev = first as u32;

    while pos < body.len() {
        let code = read_varint(body, &mut pos)?;
        let next_code = 256 + entries.len() as u32;
        let start = out.len();

        if code < next_code as u64 {
            expand(code as u32, &entries, &mut scratch, &mut out);
        } else if code == next_code as u64 && next_code < MAX_CODES {
            // The code being defined right now: prev + first byte of prev
            expand(prev, &entries, &mut scratch, &mut out);
            let head = out[start];
            out.push(head);
        } else {
            return Err(format!("code {} is not defined yet", code));
        }

        if next_code < MAX_CODES {
            entries.push((prev, out[start]));
        }
        prev = code as u32;

        if out.len() as u64 > expected {
            return Err(format!(
                "stream expands past declared length of {} bytes",
                expected
            ));
        }
    }

    if out.len() as u64 != expected {
        return Err(format!(
            "stream ended after {} of {} bytes",
            out.len(),
            expected
        ));
    }
    Ok(out)
}

/// Append the string for `code` to `out`
fn expand(code: u32, entries: &[(u32, u8)], scratch: &mut Vec<u8>, out: &mut Vec<u8>) {
    scratch.clear();
    let mut code = code;
    while code >= 256 {
        let (prefix, byte) = entries[(code - 256) as usize];
        scratch.push(byte);
        code = prefix;
    }
    scratch.push(code as u8);
    out.extend(scratch.iter().rev());
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64, String> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| "truncated varint".to_string())?;
        *pos += 1;

        if shift == 63 && byte > 1 {
            return Err("varint overflows 64 bits".to_string());
        }
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err("varint overflows 64 bits".to_string());
        }
    }
}
