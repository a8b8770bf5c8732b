//! Pack image directory format
//!
//! A pack image is a flat sequence of records, one per item:
//!
//! ```text
//! name_len: u32 le | name: utf-8 | data_len: u32 le | data
//! ```
//!
//! This is the minimum the cache needs to materialize items out of a
//! fetched image; everything else about the wire format belongs to the
//! build-time packer.

use crate::error::{DepotError, DepotResult};

/// Encode items into a pack image. The inverse of [`extract_item`];
/// used by the packer side and by test fixtures.
pub fn encode_pack(items: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, data) in items {
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// Extract one item's bytes from a pack image.
pub fn extract_item(image: &[u8], pack: &str, item: &str) -> DepotResult<Vec<u8>> {
    let mut offset = 0usize;
    while offset < image.len() {
        let (name, data, next) = read_record(image, offset, pack)?;
        if name == item {
            return Ok(data.to_vec());
        }
        offset = next;
    }
    Err(DepotError::ItemNotFound {
        pack: pack.to_string(),
        item: item.to_string(),
    })
}

/// List the item names present in a pack image.
pub fn list_items(image: &[u8], pack: &str) -> DepotResult<Vec<String>> {
    let mut names = Vec::new();
    let mut offset = 0usize;
    while offset < image.len() {
        let (name, _, next) = read_record(image, offset, pack)?;
        names.push(name.to_string());
        offset = next;
    }
    Ok(names)
}

fn read_record<'a>(
    image: &'a [u8],
    offset: usize,
    pack: &str,
) -> DepotResult<(&'a str, &'a [u8], usize)> {
    let malformed = |reason: &str| DepotError::ImageMalformed {
        pack: pack.to_string(),
        reason: reason.to_string(),
    };

    let name_len = read_len(image, offset).ok_or_else(|| malformed("truncated name length"))?;
    let name_start = offset + 4;
    let name_end = name_start
        .checked_add(name_len)
        .filter(|&end| end <= image.len())
        .ok_or_else(|| malformed("truncated name"))?;
    let name = std::str::from_utf8(&image[name_start..name_end])
        .map_err(|_| malformed("item name is not utf-8"))?;

    let data_len = read_len(image, name_end).ok_or_else(|| malformed("truncated data length"))?;
    let data_start = name_end + 4;
    let data_end = data_start
        .checked_add(data_len)
        .filter(|&end| end <= image.len())
        .ok_or_else(|| malformed("truncated data"))?;

    Ok((name, &image[data_start..data_end], data_end))
}

fn read_len(image: &[u8], offset: usize) -> Option<usize> {
    let bytes = image.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?) as usize)
}
