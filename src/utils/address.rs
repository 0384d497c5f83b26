//! Address normalization.
//!
//! Every address this crate compares, stores, or indexes is normalized to
//! the canonical raw form `workchain:hex64` before comparison. Addresses
//! may arrive either already in raw form or in the base64 "friendly" form;
//! both are accepted and normalized identically.

use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose, Engine as _};

const FRIENDLY_ADDRESS_LEN: usize = 36;

/// Normalize an address string to `workchain:hex64`, lowercase hex, no `+`/`-`
/// flag bits retained from the friendly encoding.
pub fn normalize_address(addr: &str) -> Result<String> {
    let addr = addr.trim();

    if let Some((workchain, hash)) = addr.split_once(':') {
        let workchain: i32 = workchain
            .parse()
            .map_err(|_| anyhow!("invalid workchain in raw address `{addr}`"))?;
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid account hash in raw address `{addr}`");
        }
        return Ok(format!("{workchain}:{}", hash.to_lowercase()));
    }

    decode_friendly(addr)
}

fn decode_friendly(addr: &str) -> Result<String> {
    let bytes = general_purpose::URL_SAFE
        .decode(addr)
        .or_else(|_| general_purpose::STANDARD.decode(addr))
        .map_err(|e| anyhow!("address `{addr}` is neither raw nor valid base64: {e}"))?;

    if bytes.len() != FRIENDLY_ADDRESS_LEN {
        bail!("decoded friendly address has unexpected length {}", bytes.len());
    }

    let payload = &bytes[0..34];
    let expected_crc = u16::from_be_bytes([bytes[34], bytes[35]]);
    if crc16_xmodem(payload) != expected_crc {
        bail!("friendly address `{addr}` failed crc16 check");
    }

    let workchain = bytes[1] as i8 as i32;
    let hash = &bytes[2..34];
    let hex: String = hash.iter().map(|b| format!("{b:02x}")).collect();

    Ok(format!("{workchain}:{hex}"))
}

/// CRC-16/XMODEM: poly 0x1021, init 0, no reflection, no final xor. Used by
/// the friendly-address encoding's trailing checksum.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_address_is_lowercased() {
        let addr = "0:AABBCCDDEEFF00112233445566778899AABBCCDDEEFF00112233445566778899";
        assert_eq!(
            normalize_address(addr).unwrap(),
            "0:aabbccddeeff00112233445566778899aabbccddeeff00112233445566778899"
        );
    }

    #[test]
    fn negative_workchain_is_preserved() {
        let addr = "-1:aabbccddeeff00112233445566778899aabbccddeeff00112233445566778899";
        assert_eq!(normalize_address(addr).unwrap(), addr);
    }

    #[test]
    fn rejects_malformed_raw_hash() {
        let addr = "0:not-hex";
        assert!(normalize_address(addr).is_err());
    }

    #[test]
    fn friendly_address_round_trips_to_raw() {
        // Build a valid friendly address by hand: tag 0x11, workchain 0,
        // a 32-byte hash of all 0xAB, then the crc16 over the first 34 bytes.
        let mut payload = vec![0x11u8, 0x00];
        payload.extend(std::iter::repeat(0xABu8).take(32));
        let crc = crc16_xmodem(&payload);
        payload.extend_from_slice(&crc.to_be_bytes());

        let encoded = general_purpose::URL_SAFE.encode(&payload);
        let normalized = normalize_address(&encoded).unwrap();

        assert_eq!(normalized, format!("0:{}", "ab".repeat(32)));
    }

    #[test]
    fn friendly_address_with_bad_crc_is_rejected() {
        let mut payload = vec![0x11u8, 0x00];
        payload.extend(std::iter::repeat(0xABu8).take(32));
        payload.extend_from_slice(&[0x00, 0x00]);
        let encoded = general_purpose::URL_SAFE.encode(&payload);
        assert!(normalize_address(&encoded).is_err());
    }
}
