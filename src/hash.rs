use std::collections::HashMap;
use std::hash::BuildHasher;
use std::hash::Hasher;

/// A map for keys that carry their own precomputed hash. Hashing happens once,
/// in parallel, when names are read from input files; lookups then just pass
/// the stored value through.
pub(crate) type PassThroughHashMap<K, V> = HashMap<K, V, PassThroughHasher>;

pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    fxhash::hash64(bytes)
}

#[derive(Default, Clone)]
pub(crate) struct PassThroughHasher {
    hash: u64,
}

impl Hasher for PassThroughHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write_u64(&mut self, i: u64) {
        self.hash = i;
    }

    fn write(&mut self, _bytes: &[u8]) {
        panic!("PassThroughHasher requires keys that hash via write_u64");
    }
}

impl BuildHasher for PassThroughHasher {
    type Hasher = PassThroughHasher;

    fn build_hasher(&self) -> Self::Hasher {
        PassThroughHasher::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash_bytes(b"puts"), hash_bytes(b"puts"));
        assert_ne!(hash_bytes(b"puts"), hash_bytes(b"putc"));
    }
}
