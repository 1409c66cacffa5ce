//! XXH3 hasher (default).

use crate::hasher::traits::KeyHasher;
use crate::token::Token;
use xxhash_rust::xxh3::xxh3_64;

/// 64-bit XXH3 hasher.
#[derive(Clone, Copy, Debug, Default)]
pub struct Xxh3Hasher;

impl KeyHasher for Xxh3Hasher {
    fn hash(&self, key: &[u8]) -> Token {
        Token(xxh3_64(key))
    }

    fn name(&self) -> &'static str {
        "Xxh3Hasher"
    }
}
