//! Request payload fingerprints.
//!
//! A fingerprint is a 64-bit FNV-1a hash over the canonical serialization of
//! a request's child elements, concatenated in order. It tells a plain
//! retransmission apart from a different payload reusing the same rid.
//! Collisions are possible and accepted: this is not a security check.

use crate::body::Element;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Request carried no payload.
    Empty,
    Content(u64),
}

impl Fingerprint {
    pub fn of<'a>(children: impl IntoIterator<Item = &'a Element>) -> Self {
        let mut children = children.into_iter().peekable();
        if children.peek().is_none() {
            return Self::Empty;
        }
        let mut h = FNV_OFFSET;
        for child in children {
            h = fnv_bytes(h, child.to_xml().as_bytes());
        }
        Self::Content(h)
    }

    pub fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }
}

fn fnv_bytes(mut h: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        h = (h ^ u64::from(byte)).wrapping_mul(FNV_PRIME);
    }
    h
}
