use sha2::{Digest, Sha256};

/// Deterministic digest of a note's content state.
///
/// The byte layout is fixed by the wire contract: labelled sections for
/// title, contents, tags and the tombstone flag, then the raw embedding
/// blob when one is present. Two devices holding the same post-image
/// produce the same hex string, which is what the convergence check
/// compares across peers.
pub fn compute_note_hash(
    title: &str,
    contents: &str,
    tags: &str,
    embedding: Option<&[u8]>,
    deleted: bool,
) -> String {
    let mut hasher = Sha256::new();

    hasher.update(b"title:");
    hasher.update(title.as_bytes());
    hasher.update(b"\ncontents:");
    hasher.update(contents.as_bytes());
    hasher.update(b"\ntags:");
    hasher.update(tags.as_bytes());
    hasher.update(b"\ndeleted:");
    hasher.update(if deleted { b"1" } else { b"0" });

    if let Some(blob) = embedding {
        hasher.update(b"\nembeddings:");
        hasher.update(blob);
    }

    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
