//! Per-core block encryption.
//!
//! Each block is XORed with a keystream taken from the keyed blake3 XOF
//! of its index, then prefixed with a keyed blake3 tag over index and
//! ciphertext. Keys derive from the base key and the core key, so peers
//! sharing the base key can read each other's replicated blocks.

use std::fmt;

use concord_core::constants::contexts;
use concord_core::keys::CoreKey;

/// Length of the authentication tag prefixed to every block.
pub const TAG_LEN: usize = 32;

#[derive(Clone)]
pub struct BlockCipher {
    stream_key: [u8; 32],
    mac_key: [u8; 32],
}

impl BlockCipher {
    pub fn new(base_key: &[u8; 32], core: &CoreKey) -> Self {
        let mut material = [0u8; 64];
        material[..32].copy_from_slice(base_key);
        material[32..].copy_from_slice(core.as_bytes());
        Self {
            stream_key: blake3::derive_key(contexts::BLOCK_CIPHER, &material),
            mac_key: blake3::derive_key(contexts::BLOCK_MAC, &material),
        }
    }

    pub fn encrypt(&self, index: u64, plaintext: &[u8]) -> Vec<u8> {
        let mut body = plaintext.to_vec();
        self.apply_keystream(index, &mut body);
        let tag = self.tag(index, &body);
        let mut out = Vec::with_capacity(TAG_LEN + body.len());
        out.extend_from_slice(tag.as_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// `None` when the tag does not verify (wrong key, wrong index, or tampering).
    pub fn decrypt(&self, index: u64, raw: &[u8]) -> Option<Vec<u8>> {
        if raw.len() < TAG_LEN {
            return None;
        }
        let (tag, body) = raw.split_at(TAG_LEN);
        let mut expected = [0u8; TAG_LEN];
        expected.copy_from_slice(tag);
        if self.tag(index, body) != blake3::Hash::from_bytes(expected) {
            return None;
        }
        let mut plain = body.to_vec();
        self.apply_keystream(index, &mut plain);
        Some(plain)
    }

    fn apply_keystream(&self, index: u64, buf: &mut [u8]) {
        let mut hasher = blake3::Hasher::new_keyed(&self.stream_key);
        hasher.update(&index.to_le_bytes());
        let mut reader = hasher.finalize_xof();
        let mut pad = [0u8; 64];
        for chunk in buf.chunks_mut(64) {
            reader.fill(&mut pad[..chunk.len()]);
            for (byte, k) in chunk.iter_mut().zip(pad.iter()) {
                *byte ^= k;
            }
        }
    }

    fn tag(&self, index: u64, body: &[u8]) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.mac_key);
        hasher.update(&index.to_le_bytes());
        hasher.update(body);
        hasher.finalize()
    }
}

impl fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlockCipher(..)")
    }
}
