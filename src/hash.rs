//! Commit-digest hashing (C1): canonical 256-bit hashing and the `dot`
//! pairwise combine used to build the running hash chain a transaction's
//! commit digest must match server-side.

use sha2::{Digest, Sha256};

use crate::error::DriverError;

/// Exactly 32 bytes, or the distinguished empty value. Constructed only
/// through [`CommitHash::new`]/[`CommitHash::empty`], which enforce the
/// 0-or-32-bytes invariant.
#[derive(Clone, PartialEq, Eq)]
pub struct CommitHash(Option<[u8; 32]>);

impl CommitHash {
    pub fn empty() -> Self {
        CommitHash(None)
    }

    /// Fails with [`DriverError::InvalidArgument`] unless `bytes` is empty or
    /// exactly 32 bytes long.
    pub fn new(bytes: &[u8]) -> Result<Self, DriverError> {
        match bytes.len() {
            0 => Ok(CommitHash(None)),
            32 => {
                let mut buf = [0u8; 32];
                buf.copy_from_slice(bytes);
                Ok(CommitHash(Some(buf)))
            }
            n => Err(DriverError::InvalidArgument(format!(
                "commit hash must be 0 or 32 bytes, got {n}"
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            Some(b) => b.as_slice(),
            None => &[],
        }
    }
}

impl std::fmt::Debug for CommitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(b) => write!(f, "CommitHash({})", hex(b)),
            None => write!(f, "CommitHash(empty)"),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 of `text`'s UTF-8 bytes.
pub fn hash_text(text: &str) -> CommitHash {
    let digest = Sha256::digest(text.as_bytes());
    CommitHash(Some(digest.into()))
}

/// SHA-256 over a value's canonical encoding, as produced by the value
/// codec's hashing traversal (C2).
pub fn hash_bytes(canonical: &[u8]) -> CommitHash {
    let digest = Sha256::digest(canonical);
    CommitHash(Some(digest.into()))
}

/// Little-endian signed lexicographic comparator: scan from index 31 down
/// to 0, first nonzero signed-byte difference wins. Load-bearing for
/// matching server-side ordering of `dot` operands.
fn little_endian_signed_cmp(a: &[u8; 32], b: &[u8; 32]) -> std::cmp::Ordering {
    for i in (0..32).rev() {
        let ai = a[i] as i8;
        let bi = b[i] as i8;
        if ai != bi {
            return ai.cmp(&bi);
        }
    }
    std::cmp::Ordering::Equal
}

/// Combine two commit hashes. If either operand is empty, returns the
/// other. Otherwise concatenates the two 32-byte arrays with the
/// smaller-comparing one first (per [`little_endian_signed_cmp`]) and
/// returns the SHA-256 of the concatenation.
pub fn dot(a: &CommitHash, b: &CommitHash) -> CommitHash {
    let (a_bytes, b_bytes) = match (&a.0, &b.0) {
        (None, _) => return b.clone(),
        (_, None) => return a.clone(),
        (Some(a), Some(b)) => (a, b),
    };
    let (first, second) = match little_endian_signed_cmp(a_bytes, b_bytes) {
        std::cmp::Ordering::Greater => (b_bytes, a_bytes),
        _ => (a_bytes, b_bytes),
    };
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(first);
    buf.extend_from_slice(second);
    hash_bytes(&buf)
}

/// Fold `dot` across an iterator of hashes, starting from `empty`.
pub fn dot_fold<I: IntoIterator<Item = CommitHash>>(hashes: I) -> CommitHash {
    hashes
        .into_iter()
        .fold(CommitHash::empty(), |acc, h| dot(&acc, &h))
}

/// `fp(s, P) = H(s) · H(p_1) · … · H(p_k)` — a statement's fingerprint,
/// combining its text hash with the hash of each bound parameter's
/// canonical encoding, in positional order.
pub fn statement_fingerprint(stmt_hash: CommitHash, param_hashes: &[CommitHash]) -> CommitHash {
    param_hashes
        .iter()
        .cloned()
        .fold(stmt_hash, |acc, h| dot(&acc, &h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_length_is_rejected() {
        assert!(CommitHash::new(&[1, 2, 3]).is_err());
        assert!(CommitHash::new(&[]).is_ok());
        assert!(CommitHash::new(&[0u8; 32]).is_ok());
    }

    #[test]
    fn dot_identity() {
        let x = hash_text("hello");
        assert_eq!(dot(&CommitHash::empty(), &x), x);
        assert_eq!(dot(&x, &CommitHash::empty()), x);
    }

    #[test]
    fn dot_commutative() {
        let a = hash_text("a");
        let b = hash_text("b");
        assert_eq!(dot(&a, &b), dot(&b, &a));
    }

    #[test]
    fn comparator_is_antisymmetric() {
        let a: [u8; 32] = {
            let mut b = [0u8; 32];
            b[31] = 5;
            b
        };
        let b: [u8; 32] = {
            let mut b = [0u8; 32];
            b[31] = 9;
            b
        };
        assert_eq!(
            little_endian_signed_cmp(&a, &b),
            little_endian_signed_cmp(&b, &a).reverse()
        );
    }

    #[test]
    fn hash_text_is_deterministic() {
        assert_eq!(hash_text("t1").as_bytes(), hash_text("t1").as_bytes());
    }
}
