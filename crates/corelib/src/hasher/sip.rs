//! SipHash-1-3 hasher.

use crate::hasher::traits::KeyHasher;
use crate::token::Token;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// SipHash-1-3 with fixed zero keys, so every process derives the same tokens.
#[derive(Clone, Copy, Debug, Default)]
pub struct SipKeyHasher;

impl KeyHasher for SipKeyHasher {
    fn hash(&self, key: &[u8]) -> Token {
        let mut hasher = SipHasher13::new();
        hasher.write(key);
        Token(hasher.finish())
    }

    fn name(&self) -> &'static str {
        "SipKeyHasher"
    }
}
