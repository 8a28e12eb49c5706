//! Kademlia key space: 256 bit identifiers and their prefix distance.
use rand::Rng;
use sha2::{Digest, Sha256};
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of Ids in bytes.
pub const ID_SIZE: usize = 32;
/// The size of Ids in bits.
pub const ID_BITS: u32 = ID_SIZE as u32 * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
/// A point in the key space, produced by hashing a peer identity or a content key.
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    /// Generate a random Id.
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Hash arbitrary key bytes into the key space with SHA-256.
    pub fn hash<T: AsRef<[u8]>>(key: T) -> Id {
        let digest = Sha256::digest(key.as_ref());

        let mut bytes = [0; ID_SIZE];
        bytes.copy_from_slice(&digest);

        Id(bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// Number of leading bits this Id shares with `other`.
    ///
    /// The shared prefix of an Id with itself is [ID_BITS].
    pub fn shared_prefix_len(&self, other: &Id) -> u32 {
        for i in 0..ID_SIZE {
            let xor = self.0[i] ^ other.0[i];

            if xor != 0 {
                return i as u32 * 8 + xor.leading_zeros();
            }
        }

        ID_BITS
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 256
    /// Distance to an Id with 5 leading matching bits is 251
    pub fn distance(&self, other: &Id) -> u32 {
        ID_BITS - self.shared_prefix_len(other)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        Id::from_bytes(hex::decode(s)?)
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}
