//! Utility functions for identifiers

use bech32::Bech32m;
use uuid7::{Uuid, uuid7};

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    Ok(new_ordered_id(hrp)?.1)
}

/// Returns the raw uuid7 (time ordered, usable as a sled key) alongside its
/// bech32m rendering.
pub fn new_ordered_id(hrp: &str) -> anyhow::Result<(Uuid, String)> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let id = uuid7();
    let encode = bech32::encode::<Bech32m>(hrp, id.as_bytes())?;
    Ok((id, encode))
}
