//! WebSocket payload masking
//!
//! Client-to-server payloads arrive XOR-masked with a 4-byte key. The reader
//! unmasks payload bytes as they are copied into the caller's buffer, which
//! can split a frame across many reads, so the key position has to be carried
//! between calls (`apply_mask_offset`).

/// XOR `data` in place with a repeating 4-byte mask.
///
/// Masking is self-inverse: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    // 8 bytes at a time
    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Apply a mask starting `offset` bytes into the payload.
///
/// When unmasking across multiple reads, the offset determines which
/// byte of the mask to start with.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let offset = offset & 3;
    if offset == 0 {
        apply_mask(data, mask);
        return;
    }

    let rotated_mask = [
        mask[offset],
        mask[(offset + 1) & 3],
        mask[(offset + 2) & 3],
        mask[(offset + 3) & 3],
    ];
    apply_mask(data, rotated_mask);
}

/// Generate a mask key for client-role frames.
///
/// The adapter itself only writes server frames; this exists for peers and
/// test clients speaking to it. Keys come from `fastrand`, which is fast but
/// not cryptographically secure.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    fastrand::u32(..).to_ne_bytes()
}
