//! Hierarchical content hash (spec §4.3): block → level-n → top digest,
//! with binary marshal/unmarshal for resumability.
//!
//! Blocks of [`BLOCK_SIZE`] bytes feed a block hash (SHA-1). Each
//! completed block's digest is folded into level 1 via a
//! position-embedded addition; every [`FANOUT`] level-n contributions
//! collapse into one level-(n+1) contribution by the same rule. The block
//! hash itself is pluggable through [`Hasher`] — the canonical profile
//! fixes it to SHA-1/20 bytes.

mod level;

pub use level::DIGEST_SIZE;

use level::Level;

pub const BLOCK_SIZE: usize = 4096;
pub const FANOUT: u32 = 256;

/// Mirrors `pulith_verify::Hasher`: a streaming hash that can be updated in
/// pieces and finalized once. Block digests are computed through this trait
/// so the block-level primitive is swappable even though the canonical
/// profile pins it to SHA-1.
pub trait Hasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self) -> Vec<u8>;
}

pub struct Sha1Hasher(sha1::Sha1);

impl Default for Sha1Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Sha1Hasher {
    pub fn new() -> Self {
        use sha1::Digest;
        Self(sha1::Sha1::new())
    }
}

impl Hasher for Sha1Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha1::Digest;
        self.0.update(data);
    }

    fn finalize(self) -> Vec<u8> {
        use sha1::Digest;
        self.0.finalize().to_vec()
    }
}

fn block_digest(block: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut h = Sha1Hasher::new();
    h.update(block);
    let v = h.finalize();
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&v);
    out
}

fn is_all_null(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Streaming hierarchical hash state. Deterministic regardless of how the
/// input is chunked across `write` calls — only the cumulative byte stream
/// matters, since blocks are a fixed 4096-byte tiling of it.
pub struct HashState {
    block_buf: Vec<u8>,
    only_null_in_block: bool,
    levels: Vec<Level>,
}

impl Default for HashState {
    fn default() -> Self {
        Self::new()
    }
}

impl HashState {
    pub fn new() -> Self {
        Self {
            block_buf: Vec::with_capacity(BLOCK_SIZE),
            only_null_in_block: true,
            levels: vec![Level::new()],
        }
    }

    pub fn write(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = BLOCK_SIZE - self.block_buf.len();
            let take = room.min(data.len());
            self.block_buf.extend_from_slice(&data[..take]);
            if self.only_null_in_block && data[..take].iter().any(|&b| b != 0) {
                self.only_null_in_block = false;
            }
            data = &data[take..];
            if self.block_buf.len() == BLOCK_SIZE {
                self.complete_block();
            }
        }
    }

    fn complete_block(&mut self) {
        if !self.only_null_in_block {
            let digest = block_digest(&self.block_buf);
            self.promote(0, digest);
        }
        self.block_buf.clear();
        self.only_null_in_block = true;
    }

    /// Fold `digest` into `levels[idx]`, cascading a completed level (256
    /// contributions) into the level above.
    fn promote(&mut self, idx: usize, digest: [u8; DIGEST_SIZE]) {
        if idx == self.levels.len() {
            self.levels.push(Level::new());
        }
        let rolled = self.levels[idx].absorb(digest);
        if let Some(rolled_digest) = rolled {
            self.promote(idx + 1, rolled_digest);
        }
    }

    /// Consumes the state, returning the final digest. Flushes any pending
    /// partial block and folds every incomplete lower level into the
    /// level above it so no buffered contribution is lost.
    pub fn finish(mut self) -> [u8; DIGEST_SIZE] {
        if !self.block_buf.is_empty() {
            self.complete_block();
        }
        let Some(top) = self.levels.iter().rposition(|l| l.count > 0) else {
            return [0u8; DIGEST_SIZE];
        };
        for i in 0..top {
            if self.levels[i].count > 0 {
                let digest = self.levels[i].take();
                self.promote(i + 1, digest);
            }
        }
        let new_top = self.levels.iter().rposition(|l| l.count > 0).expect("top survives folding");
        self.levels[new_top].accumulator
    }

    /// Binary marshal of internal state (spec §4.3) for resumable uploads.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.only_null_in_block as u8);
        out.extend_from_slice(&(self.block_buf.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.block_buf);
        out.extend_from_slice(&(self.levels.len() as u32).to_be_bytes());
        for level in &self.levels {
            out.extend_from_slice(&level.accumulator);
            out.extend_from_slice(&level.count.to_be_bytes());
        }
        out
    }

    pub fn unmarshal(bytes: &[u8]) -> Option<Self> {
        let mut pos = 0usize;
        let read_u32 = |bytes: &[u8], pos: &mut usize| -> Option<u32> {
            let v = u32::from_be_bytes(bytes.get(*pos..*pos + 4)?.try_into().ok()?);
            *pos += 4;
            Some(v)
        };
        let only_null_in_block = *bytes.first()? != 0;
        pos += 1;
        let buf_len = read_u32(bytes, &mut pos)? as usize;
        let block_buf = bytes.get(pos..pos + buf_len)?.to_vec();
        pos += buf_len;
        let n_levels = read_u32(bytes, &mut pos)? as usize;
        let mut levels = Vec::with_capacity(n_levels);
        for _ in 0..n_levels {
            let acc: [u8; DIGEST_SIZE] = bytes.get(pos..pos + DIGEST_SIZE)?.try_into().ok()?;
            pos += DIGEST_SIZE;
            let count = read_u32(bytes, &mut pos)?;
            levels.push(Level { accumulator: acc, count });
        }
        Some(Self {
            block_buf,
            only_null_in_block,
            levels,
        })
    }
}

/// Hashes `data` in one shot.
pub fn hash_bytes(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut state = HashState::new();
    state.write(data);
    state.finish()
}

pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(hash_bytes(data))
}
