//! Offset based readers over ABI encoded log data
//!
//! Log layouts are fixed per event signature, so fields are read at known
//! head positions instead of decoding a full ABI description. Every read is
//! bounds checked and reports `ParseData` on short or corrupt input.

use crate::error::{RouterError, RouterResult};

use ethers::types::{Bytes, H256, U256};

const WORD: usize = 32;

fn parse_error(what: &str, pos: usize, len: usize) -> RouterError {
    RouterError::ParseData(format!("{} at {} out of range (data length {})", what, pos, len))
}

fn word(data: &[u8], pos: usize) -> RouterResult<&[u8]> {
    let end = pos
        .checked_add(WORD)
        .ok_or_else(|| parse_error("word", pos, data.len()))?;
    data.get(pos..end)
        .ok_or_else(|| parse_error("word", pos, data.len()))
}

pub fn parse_u256(data: &[u8], pos: usize) -> RouterResult<U256> {
    Ok(U256::from_big_endian(word(data, pos)?))
}

/// Chain ids must fit in 64 bits
pub fn parse_u64(data: &[u8], pos: usize) -> RouterResult<u64> {
    let value = parse_u256(data, pos)?;
    if value > U256::from(u64::MAX) {
        return Err(RouterError::ParseData(format!("value at {} overflows u64", pos)));
    }
    Ok(value.as_u64())
}

fn parse_usize(data: &[u8], pos: usize) -> RouterResult<usize> {
    let value = parse_u256(data, pos)?;
    if value > U256::from(data.len()) {
        return Err(parse_error("offset", pos, data.len()));
    }
    Ok(value.as_usize())
}

pub fn format_address(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Address right-aligned in a word
pub fn parse_address(data: &[u8], pos: usize) -> RouterResult<String> {
    Ok(format_address(&word(data, pos)?[12..]))
}

pub fn topic_address(topic: &H256) -> String {
    format_address(&topic.as_bytes()[12..])
}

/// Dynamic `bytes` whose offset is stored at `pos`
pub fn parse_bytes(data: &[u8], pos: usize) -> RouterResult<Vec<u8>> {
    let offset = parse_usize(data, pos)?;
    read_bytes_at(data, offset)
}

fn read_bytes_at(data: &[u8], offset: usize) -> RouterResult<Vec<u8>> {
    let len = parse_usize(data, offset)?;
    let start = offset + WORD;
    data.get(start..start + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| parse_error("bytes", start, data.len()))
}

/// Dynamic `string` whose offset is stored at `pos`
pub fn parse_string(data: &[u8], pos: usize) -> RouterResult<String> {
    let bytes = parse_bytes(data, pos)?;
    String::from_utf8(bytes).map_err(|e| RouterError::ParseData(format!("invalid string: {}", e)))
}

/// Start of the elements and the element count of an array whose offset is at `pos`
fn array_head(data: &[u8], pos: usize) -> RouterResult<(usize, usize)> {
    let offset = parse_usize(data, pos)?;
    let count = parse_usize(data, offset)?;
    let start = offset + WORD;
    if count
        .checked_mul(WORD)
        .and_then(|size| start.checked_add(size))
        .map_or(true, |end| end > data.len())
    {
        return Err(parse_error("array", offset, data.len()));
    }
    Ok((start, count))
}

pub fn parse_address_slice(data: &[u8], pos: usize) -> RouterResult<Vec<String>> {
    let (start, count) = array_head(data, pos)?;
    (0..count)
        .map(|i| parse_address(data, start + i * WORD))
        .collect()
}

pub fn parse_u256_slice(data: &[u8], pos: usize) -> RouterResult<Vec<U256>> {
    let (start, count) = array_head(data, pos)?;
    (0..count)
        .map(|i| parse_u256(data, start + i * WORD))
        .collect()
}

/// `bytes[]`: element offsets are relative to the first element slot
pub fn parse_bytes_slice(data: &[u8], pos: usize) -> RouterResult<Vec<Bytes>> {
    let (start, count) = array_head(data, pos)?;
    let elements = &data[start..];
    (0..count)
        .map(|i| {
            let offset = parse_usize(elements, i * WORD)?;
            read_bytes_at(elements, offset).map(Bytes::from)
        })
        .collect()
}
