//! Key hashers for consistent hashing.
//!
//! Hashers turn member replica keys and routing keys into [`Token`]s that can
//! be placed on the hash ring.
//!
//! [`Token`]: crate::token::Token

pub mod sip;
pub mod traits;
pub mod xxh3;

pub use sip::SipKeyHasher;
pub use traits::KeyHasher;
pub use xxh3::Xxh3Hasher;
