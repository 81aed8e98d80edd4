//! Weighted consistent hash ring.
//!
//! Each server owns `weight * points_per_server` points on a 32-bit ring. A
//! key belongs to the first point at or after its hash, wrapping to the
//! start. Adding or removing a server only moves the keys that fell on that
//! server's points, roughly 1/N of the key space.

use crate::buffer::ByteBuffer;
use crate::error::BufferError;
use crate::hashing::{md5_digest, KeyHasher};

/// Number of ring points per unit of weight.
pub const DEFAULT_POINTS_PER_SERVER: u32 = 160;

/// Ring points taken from a single MD5 digest in the ketama layout.
pub const POINTS_PER_DIGEST: u32 = 4;

/// Upper bound on `weight * points_per_server` for a single server.
pub const MAX_POINTS_PER_SERVER: u32 = 1 << 20;

/// Points a server of `weight` owns, or `None` past [`MAX_POINTS_PER_SERVER`].
pub fn points_for_weight(points_per_server: u32, weight: u32) -> Option<u32> {
    points_per_server
        .checked_mul(weight)
        .filter(|&count| count <= MAX_POINTS_PER_SERVER)
}

/// How point hashes are derived from server identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RingLayout {
    /// Hash `"{identity}-{i}"` with the pool's hasher, one point per string.
    #[default]
    PerPoint,
    /// libmemcached/twemproxy ketama: every MD5 digest of
    /// `"{identity}-{j}"` yields four little-endian points.
    Ketama,
}

/// One point on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingPoint {
    /// Position on the ring.
    pub hash: u32,
    /// Index of the owning server in the pool.
    pub server: u32,
}

/// Immutable sorted ring. Rebuilt from scratch whenever membership changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HashRing {
    points: Box<[RingPoint]>,
    server_count: usize,
}

impl HashRing {
    /// A ring with no servers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a ring from `(identity, weight)` pairs in pool order.
    ///
    /// Points with equal hashes are ordered by server index and then by
    /// point index, so the result depends only on the inputs. A server above
    /// [`MAX_POINTS_PER_SERVER`] fails with `CapacityExceeded`, and an
    /// allocation failure with `OutOfMemory`.
    pub fn build<'a, I>(
        nodes: I,
        hasher: &dyn KeyHasher,
        points_per_server: u32,
        layout: RingLayout,
    ) -> Result<Self, BufferError>
    where
        I: IntoIterator<Item = (&'a str, u32)>,
    {
        let mut ident = ByteBuffer::with_block_size(64);
        let mut raw: Vec<(u32, u32, u32)> = Vec::new();
        let mut server_count = 0usize;

        for (server, (identity, weight)) in nodes.into_iter().enumerate() {
            let server = server as u32;
            let count = points_for_weight(points_per_server, weight).ok_or(
                BufferError::CapacityExceeded {
                    requested: (points_per_server as usize).saturating_mul(weight as usize),
                    max: MAX_POINTS_PER_SERVER as usize,
                },
            )?;
            raw.try_reserve(count as usize)
                .map_err(|_| BufferError::OutOfMemory)?;
            server_count += 1;

            match layout {
                RingLayout::PerPoint => {
                    for i in 0..count {
                        point_identity(&mut ident, identity, i)?;
                        raw.push((hasher.hash(ident.as_bytes()), server, i));
                    }
                }
                RingLayout::Ketama => {
                    let digests = count.div_ceil(POINTS_PER_DIGEST);
                    let mut seq = 0;
                    for j in 0..digests {
                        point_identity(&mut ident, identity, j)?;
                        let digest = md5_digest(ident.as_bytes());
                        for word in digest.chunks_exact(4) {
                            if seq == count {
                                break;
                            }
                            let hash = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                            raw.push((hash, server, seq));
                            seq += 1;
                        }
                    }
                }
            }
        }

        raw.sort_unstable();
        let points = raw
            .into_iter()
            .map(|(hash, server, _)| RingPoint { hash, server })
            .collect();

        Ok(Self {
            points,
            server_count,
        })
    }

    /// All points in ring order.
    pub fn points(&self) -> &[RingPoint] {
        &self.points
    }

    /// Total number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the ring has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of servers the ring was built from.
    pub fn server_count(&self) -> usize {
        self.server_count
    }

    /// Number of points owned by `server`.
    pub fn points_for(&self, server: usize) -> usize {
        self.points
            .iter()
            .filter(|p| p.server as usize == server)
            .count()
    }

    /// Index of the first point at or after `hash`, wrapping to 0.
    fn position(&self, hash: u32) -> usize {
        let idx = self.points.partition_point(|p| p.hash < hash);
        if idx == self.points.len() {
            0
        } else {
            idx
        }
    }

    /// Server owning `hash`, or `None` for an empty ring.
    #[inline]
    pub fn lookup(&self, hash: u32) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points[self.position(hash)].server as usize)
    }

    /// Distinct servers in ring order starting at the owner of `hash`.
    pub fn walk(&self, hash: u32) -> RingWalk<'_> {
        let start = if self.points.is_empty() {
            0
        } else {
            self.position(hash)
        };
        RingWalk {
            ring: self,
            start,
            offset: 0,
            seen: vec![false; self.server_count],
            remaining: self.server_count,
        }
    }
}

/// Iterator returned by [`HashRing::walk`].
#[derive(Debug)]
pub struct RingWalk<'a> {
    ring: &'a HashRing,
    start: usize,
    offset: usize,
    seen: Vec<bool>,
    remaining: usize,
}

impl Iterator for RingWalk<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let len = self.ring.points.len();
        while self.remaining > 0 && self.offset < len {
            let point = self.ring.points[(self.start + self.offset) % len];
            self.offset += 1;
            let server = point.server as usize;
            if !self.seen[server] {
                self.seen[server] = true;
                self.remaining -= 1;
                return Some(server);
            }
        }
        None
    }
}

/// Write `"{identity}-{index}"` into `buf`, replacing its contents.
fn point_identity(buf: &mut ByteBuffer, identity: &str, index: u32) -> Result<(), BufferError> {
    buf.reset();
    buf.append(identity.as_bytes())?;
    buf.append_byte(b'-')?;

    let mut digits = [0u8; 10];
    let mut n = index;
    let mut at = digits.len();
    loop {
        at -= 1;
        digits[at] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    buf.append(&digits[at..])
}
