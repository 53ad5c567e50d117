use sha1::{Digest, Sha1};
use std::fmt::{Debug, Formatter, Result};

use crate::KEY_LENGTH;

/// A key that represents nodes and data.
///
/// Keys are 64 bits wide. A key derived from arbitrary bytes is the low `KEY_LENGTH` bytes of the
/// SHA-1 digest of those bytes, read as a big-endian integer.
#[derive(Ord, PartialOrd, PartialEq, Eq, Clone, Hash, Serialize, Deserialize, Default, Copy)]
pub struct Key(pub u64);

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{:016X}", self.0)
    }
}

impl Key {
    /// The key that is farthest from `Key(0)`.
    pub const MAX: Key = Key(u64::MAX);

    /// Constructs a new `Key` from an integer.
    pub fn new(data: u64) -> Self {
        Key(data)
    }

    /// Hashes `data` into a `Key`. The same input always yields the same key.
    pub fn hash<T: AsRef<[u8]>>(data: T) -> Self {
        let digest = Sha1::digest(data.as_ref());
        let mut low_bytes = [0u8; KEY_LENGTH];
        low_bytes.copy_from_slice(&digest[digest.len() - KEY_LENGTH..]);
        Key(u64::from_be_bytes(low_bytes))
    }

    /// Constructs a new, random `Key`.
    pub(crate) fn rand() -> Self {
        Key(rand::random::<u64>())
    }

    /// Constructs a new, random `Key` from `[2^(63 - index), 2^(64 - index))`, i.e. a key with
    /// exactly `index` leading zeros.
    pub(crate) fn rand_in_range(index: usize) -> Self {
        let high_bit = 1u64 << (KEY_LENGTH * 8 - index - 1);
        Key(high_bit | (Key::rand().0 & (high_bit - 1)))
    }

    /// Returns the XOR result between `self` and `key`.
    pub fn xor(&self, key: &Key) -> Key {
        Key(self.0 ^ key.0)
    }

    /// Returns the number of leading zeros in `self`.
    pub fn leading_zeros(&self) -> usize {
        self.0.leading_zeros() as usize
    }

    /// Returns the length of the common bit prefix of `self` and `key`. This is the index of the
    /// routing bucket `key` occupies in the routing table of a node with id `self`, and is
    /// `KEY_LENGTH * 8` when the keys are equal.
    pub fn prefix_len(&self, key: &Key) -> usize {
        self.xor(key).leading_zeros()
    }
}
