/// Hex digest of `parts` joined by `:`, truncated to `len` characters.
///
/// Used for fact ids (12 chars), record dedup hashes (16 chars) and file
/// fingerprints (full length).
pub fn short_hash(parts: &[&[u8]], len: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part);
    }
    let hex = hasher.finalize().to_hex();
    let len = len.min(hex.len());
    hex[..len].to_string()
}

/// Full-length hex digest of a byte slice.
pub fn fingerprint(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
