//! Key hash function implementations.
//!
//! All functions map a byte key to a `u32`. 64-bit algorithms are truncated
//! to their low 32 bits.

use crc::{Crc, CRC_32_ISO_HDLC};
use md5::{Digest, Md5};
use std::hash::Hasher;
use twox_hash::XxHash64;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const FNV_32_INIT: u32 = 0x811c_9dc5;
const FNV_32_PRIME: u32 = 0x0100_0193;
const FNV_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Jenkins one-at-a-time.
pub fn one_at_a_time(key: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in key {
        hash = hash.wrapping_add(u32::from(byte));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// CRC-32 (IEEE polynomial, reflected, final one's complement).
pub fn crc32(key: &[u8]) -> u32 {
    CRC32.checksum(key)
}

/// First four bytes of the MD5 digest, little-endian.
pub fn md5(key: &[u8]) -> u32 {
    let digest = Md5::digest(key);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Full MD5 digest, used by the ketama point layout.
pub fn md5_digest(key: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(key));
    out
}

pub fn fnv1_32(key: &[u8]) -> u32 {
    key.iter().fold(FNV_32_INIT, |hash, &byte| {
        hash.wrapping_mul(FNV_32_PRIME) ^ u32::from(byte)
    })
}

pub fn fnv1a_32(key: &[u8]) -> u32 {
    key.iter().fold(FNV_32_INIT, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_32_PRIME)
    })
}

pub fn fnv1_64(key: &[u8]) -> u32 {
    let hash = key.iter().fold(FNV_64_INIT, |hash, &byte| {
        hash.wrapping_mul(FNV_64_PRIME) ^ u64::from(byte)
    });
    hash as u32
}

pub fn fnv1a_64(key: &[u8]) -> u32 {
    let hash = key.iter().fold(FNV_64_INIT, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_64_PRIME)
    });
    hash as u32
}

/// Paul Hsieh's SuperFastHash.
pub fn hsieh(key: &[u8]) -> u32 {
    if key.is_empty() {
        return 0;
    }

    let read16 = |b: &[u8]| u32::from(u16::from_le_bytes([b[0], b[1]]));
    let signed = |b: u8| b as i8 as i32 as u32;

    let mut hash = key.len() as u32;
    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        hash = hash.wrapping_add(read16(&chunk[0..2]));
        let tmp = (read16(&chunk[2..4]) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }

    let rem = chunks.remainder();
    match rem.len() {
        3 => {
            hash = hash.wrapping_add(read16(&rem[0..2]));
            hash ^= hash << 16;
            hash ^= signed(rem[2]) << 18;
            hash = hash.wrapping_add(hash >> 11);
        }
        2 => {
            hash = hash.wrapping_add(read16(rem));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        }
        1 => {
            hash = hash.wrapping_add(signed(rem[0]));
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        }
        _ => {}
    }

    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash.wrapping_add(hash >> 6)
}

/// MurmurHash2 with the length-derived seed used by memcached clients.
pub fn murmur2(key: &[u8]) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let len = key.len() as u32;
    let seed = 0xdead_beef_u32.wrapping_mul(len);
    let mut hash = seed ^ len;

    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        hash = hash.wrapping_mul(M);
        hash ^= k;
    }

    let rem = chunks.remainder();
    if rem.len() >= 3 {
        hash ^= u32::from(rem[2]) << 16;
    }
    if rem.len() >= 2 {
        hash ^= u32::from(rem[1]) << 8;
    }
    if !rem.is_empty() {
        hash ^= u32::from(rem[0]);
        hash = hash.wrapping_mul(M);
    }

    hash ^= hash >> 13;
    hash = hash.wrapping_mul(M);
    hash ^ (hash >> 15)
}

/// xxHash64 with seed 0.
pub fn xxhash(key: &[u8]) -> u32 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key);
    hasher.finish() as u32
}
