//! ENS name math: namehash, normalization and DNS wire-format encoding.
//! Pure functions backing name-resolution responses.

use aura_primitives::{keccak256, B256};

/// Lower-cases and validates a dotted name. Empty labels (other than the
/// empty root name itself) are rejected.
pub fn normalize(name: &str) -> Result<String, InvalidName> {
    if name.is_empty() {
        return Ok(String::new());
    }
    let mut labels = Vec::new();
    for label in name.split('.') {
        if label.is_empty() {
            return Err(InvalidName::EmptyLabel);
        }
        if label.len() > 63 {
            return Err(InvalidName::LabelTooLong);
        }
        labels.push(label.to_lowercase());
    }
    Ok(labels.join("."))
}

/// Malformed ENS/DNS name.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidName {
    /// A label between dots is empty.
    #[error("empty label")]
    EmptyLabel,
    /// A label exceeds 63 bytes.
    #[error("label longer than 63 bytes")]
    LabelTooLong,
    /// The whole name exceeds the wire limit.
    #[error("name longer than 255 bytes")]
    NameTooLong,
    /// The wire encoding is truncated or unterminated.
    #[error("malformed wire encoding")]
    MalformedWire,
}

/// EIP-137 namehash: `namehash("") = 0`, and
/// `namehash(l.rest) = keccak(namehash(rest) || keccak(l))`.
pub fn namehash(name: &str) -> B256 {
    if name.is_empty() {
        return B256::ZERO;
    }
    let mut node = B256::ZERO;
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(node.as_slice());
        combined[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(combined);
    }
    node
}

/// Encodes a dotted name into DNS wire format: length-prefixed labels,
/// zero-terminated.
pub fn dns_encode(name: &str) -> Result<Vec<u8>, InvalidName> {
    let normalized = normalize(name)?;
    let mut out = Vec::with_capacity(normalized.len() + 2);
    if !normalized.is_empty() {
        for label in normalized.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    if out.len() > 255 {
        return Err(InvalidName::NameTooLong);
    }
    Ok(out)
}

/// Decodes DNS wire format back into a dotted name.
pub fn dns_decode(mut wire: &[u8]) -> Result<String, InvalidName> {
    let mut labels = Vec::new();
    loop {
        let Some((&len, rest)) = wire.split_first() else {
            return Err(InvalidName::MalformedWire);
        };
        if len == 0 {
            if !rest.is_empty() {
                return Err(InvalidName::MalformedWire);
            }
            return Ok(labels.join("."));
        }
        let len = len as usize;
        if len > 63 || rest.len() < len {
            return Err(InvalidName::MalformedWire);
        }
        let label = std::str::from_utf8(&rest[..len])
            .map_err(|_| InvalidName::MalformedWire)?;
        labels.push(label.to_string());
        wire = &rest[len..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namehash_of_root_is_zero() {
        assert_eq!(namehash(""), B256::ZERO);
    }

    #[test]
    fn namehash_recurses_per_label() {
        // namehash(n.eth) == keccak(namehash(eth) || keccak(n))
        let eth = namehash("eth");
        let label = keccak256(b"vitalik");
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(eth.as_slice());
        combined[32..].copy_from_slice(label.as_slice());
        assert_eq!(namehash("vitalik.eth"), keccak256(combined));
    }

    #[test]
    fn namehash_is_stable_under_normalization() {
        let normalized = normalize("ViTaLiK.eTh").unwrap();
        assert_eq!(normalized, "vitalik.eth");
        assert_eq!(namehash(&normalized), namehash("vitalik.eth"));
        // repeated invocation is a fixed point
        assert_eq!(normalize(&normalized).unwrap(), normalized);
    }

    #[test]
    fn dns_wire_roundtrip() {
        for name in ["", "eth", "vitalik.eth", "a.b.c.example"] {
            let wire = dns_encode(name).unwrap();
            assert_eq!(dns_decode(&wire).unwrap(), name, "roundtrip failed for {name:?}");
        }
    }

    #[test]
    fn malformed_names_are_rejected()  {
        assert_eq!(normalize("a..b"), Err(InvalidName::EmptyLabel));
        assert_eq!(dns_decode(&[3, b'a', b'b']), Err(InvalidName::MalformedWire));
        assert_eq!(dns_decode(&[]), Err(InvalidName::MalformedWire));
        let long = "x".repeat(64);
        assert_eq!(normalize(&long), Err(InvalidName::LabelTooLong));
    }
}
