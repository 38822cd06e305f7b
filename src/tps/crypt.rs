use std::borrow::Cow;

use super::byte_source::ByteSource;
use super::error::TpsError;

/// Transparent block decryption layered on a [`ByteSource`].
///
/// With no password, `read` is a verbatim passthrough. With a password,
/// every read is expanded to cover whole 64-byte blocks, each block is
/// decrypted in place with the Clarion-specific chunked cipher, and the
/// caller's requested slice is sliced back out of the rebuilt bytes.
///
/// This is a format compatibility requirement inherited from Clarion's
/// driver, not a security boundary: the cipher makes no strength claim,
/// and a wrong password is only ever detected indirectly, by the header's
/// magic marker failing to match after decryption.
pub struct Decryptor<'a> {
    source: &'a ByteSource,
    keys: Option<[u32; 16]>,
}

const BLOCK_SIZE: usize = 64;
const WORDS_PER_BLOCK: usize = 16;

impl<'a> Decryptor<'a> {
    pub fn new(source: &'a ByteSource, password: Option<&str>) -> Self {
        Decryptor {
            source,
            keys: password.map(key_schedule),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.keys.is_some()
    }

    /// Reads `size` bytes starting at `pos` (or the source's cursor),
    /// decrypting if a password was supplied.
    pub fn read(&self, size: usize, pos: Option<u64>) -> Result<Cow<'a, [u8]>, TpsError> {
        let Some(keys) = self.keys else {
            return Ok(Cow::Borrowed(self.source.read(size, pos)?));
        };

        let pos = pos.unwrap_or_else(|| self.source.tell());
        let start = pos & !(BLOCK_SIZE as u64 - 1);
        let end = ((pos + size as u64 - 1) | (BLOCK_SIZE as u64 - 1)) + 1;

        let raw = self.source.read((end - start) as usize, Some(start))?;
        let mut decrypted = decrypt_blocks(raw, &keys);
        self.source.seek(pos + size as u64);

        let rel_start = (pos - start) as usize;
        decrypted.drain(rel_start + size..);
        decrypted.drain(..rel_start);
        Ok(Cow::Owned(decrypted))
    }
}

/// Builds the 16-word key schedule from a password, per the Clarion
/// driver's key-mixing algorithm.
fn key_schedule(password: &str) -> [u32; 16] {
    let mut pw: Vec<u8> = password.as_bytes().to_vec();
    pw.push(0);

    let mut byte_keys = [0u8; 64];
    for i in 0..64u32 {
        let idx = ((i * 0x11) % 64) as usize;
        let pw_byte = pw[((i + 1) as usize) % pw.len()] as u32;
        byte_keys[idx] = ((i + pw_byte) % 256) as u8;
    }

    let mut keys = [0u32; 16];
    for (word, chunk) in keys.iter_mut().zip(byte_keys.chunks_exact(4)) {
        *word = u32::from_le_bytes(chunk.try_into().unwrap());
    }

    for _ in 0..2 {
        for pos_a in 0..16 {
            let a = keys[pos_a];
            let pos_b = (a & 0x0F) as usize;
            let b = keys[pos_b];
            keys[pos_b] = a.wrapping_add(a & b);
            keys[pos_a] = (a | b).wrapping_add(a);
        }
    }

    keys
}

/// Decrypts `data` (whose length must be a multiple of 64 bytes) in place
/// and returns the rebuilt bytes.
fn decrypt_blocks(data: &[u8], keys: &[u32; 16]) -> Vec<u8> {
    debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
    let mut out = Vec::with_capacity(data.len());

    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut words = [0u32; WORDS_PER_BLOCK];
        for (word, bytes) in words.iter_mut().zip(chunk.chunks_exact(4)) {
            *word = u32::from_le_bytes(bytes.try_into().unwrap());
        }

        for i in 0..16 {
            let pos_a = 15 - i;
            let k = keys[pos_a];
            let pos_b = (k & 0x0F) as usize;

            let a = words[pos_a].wrapping_sub(k);
            let b = words[pos_b].wrapping_sub(k);

            words[pos_a] = (a & k) | (b & !k);
            words[pos_b] = (b & k) | (a & !k);
        }

        for word in words {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    out
}
