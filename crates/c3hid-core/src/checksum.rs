//! Checksums used by the extended-memory framing and the bootloader.
//!
//! All functions are pure. The Fletcher variants carry their running state in
//! the returned value, so a checksum over `a ++ b` can be computed as
//! `fletcher16_continue(b, fletcher16(a))`.

/// Bytes summed between reductions of the 16-bit Fletcher accumulators.
const FLETCHER16_BLOCK: usize = 20;

/// Bytes (180 words) summed between reductions of the 32-bit accumulators.
const FLETCHER32_BLOCK: usize = 360;

/// Initial value of a fresh Fletcher-16 computation.
pub const FLETCHER16_SEED: u16 = 0xFFFF;

/// Initial value of a fresh Fletcher-32 computation.
pub const FLETCHER32_SEED: u32 = 0xFFFF_FFFF;

/// 8-bit additive checksum (sum of all bytes modulo 256).
pub fn byte_sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Fletcher-16 over `bytes`.
pub fn fletcher16(bytes: &[u8]) -> u16 {
    fletcher16_continue(bytes, FLETCHER16_SEED)
}

/// Continue a Fletcher-16 computation from a previously returned checksum.
pub fn fletcher16_continue(bytes: &[u8], prior: u16) -> u16 {
    let mut sum1 = u32::from(prior & 0xFF);
    let mut sum2 = u32::from(prior >> 8);

    for block in bytes.chunks(FLETCHER16_BLOCK) {
        for &b in block {
            sum1 += u32::from(b);
            sum2 += sum1;
        }
        sum1 = reduce8(sum1);
        sum2 = reduce8(sum2);
    }

    sum1 = reduce8(reduce8(sum1));
    sum2 = reduce8(reduce8(sum2));
    ((sum2 << 8) | sum1) as u16
}

/// Fletcher-32 over `bytes`, read as little-endian 16-bit words.
///
/// An odd trailing byte is treated as one more word whose high byte is zero.
/// Splitting a computation with [`fletcher32_continue`] is therefore only
/// equivalent to a single pass when the split falls on an even offset.
pub fn fletcher32(bytes: &[u8]) -> u32 {
    fletcher32_continue(bytes, FLETCHER32_SEED)
}

/// Continue a Fletcher-32 computation from a previously returned checksum.
pub fn fletcher32_continue(bytes: &[u8], prior: u32) -> u32 {
    let mut sum1 = u64::from(prior & 0xFFFF);
    let mut sum2 = u64::from(prior >> 16);

    for block in bytes.chunks(FLETCHER32_BLOCK) {
        for word in block.chunks(2) {
            let lo = u64::from(word[0]);
            let hi = word.get(1).map_or(0, |&b| u64::from(b));
            sum1 += lo | (hi << 8);
            sum2 += sum1;
        }
        sum1 = reduce16(sum1);
        sum2 = reduce16(sum2);
    }

    sum1 = reduce16(reduce16(sum1));
    sum2 = reduce16(reduce16(sum2));
    ((sum2 << 16) | sum1) as u32
}

#[inline]
fn reduce8(x: u32) -> u32 {
    (x & 0xFF) + (x >> 8)
}

#[inline]
fn reduce16(x: u64) -> u64 {
    (x & 0xFFFF) + (x >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 + 11) as u8).collect()
    }

    #[test]
    fn test_byte_sum8_wraps() {
        assert_eq!(byte_sum8(&[]), 0);
        assert_eq!(byte_sum8(&[0x01, 0x02, 0x03]), 6);
        assert_eq!(byte_sum8(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn test_fletcher_empty_returns_seed() {
        assert_eq!(fletcher16(&[]), FLETCHER16_SEED);
        assert_eq!(fletcher32(&[]), FLETCHER32_SEED);
    }

    #[test]
    fn test_fletcher16_known_value() {
        // sum1 = 0xFF + 1 + 2 = 0x102 -> 0x03
        // sum2 = 0xFF + 0x100 + 0x102 = 0x301 -> 0x04
        assert_eq!(fletcher16(&[0x01, 0x02]), 0x0403);
    }

    #[test]
    fn test_fletcher32_known_value() {
        // One word 0x0201: sum1 = 0xFFFF + 0x0201 -> 0x0201, sum2 = 0xFFFF + 0x10200 -> 0x0201
        assert_eq!(fletcher32(&[0x01, 0x02]), 0x0201_0201);
    }

    #[test]
    fn test_fletcher32_odd_length_pads_high_byte() {
        assert_eq!(fletcher32(&[0xAB]), fletcher32(&[0xAB, 0x00]));
    }

    #[test]
    fn test_fletcher16_split_associativity() {
        let data = sample(97);
        let whole = fletcher16(&data);
        for split in 0..=data.len() {
            let (a, b) = data.split_at(split);
            assert_eq!(
                fletcher16_continue(b, fletcher16(a)),
                whole,
                "split at {split}"
            );
        }
    }

    #[test]
    fn test_fletcher32_split_associativity_on_word_boundaries() {
        let data = sample(1001);
        let whole = fletcher32(&data);
        for split in (0..=data.len()).step_by(2) {
            let (a, b) = data.split_at(split);
            assert_eq!(
                fletcher32_continue(b, fletcher32(a)),
                whole,
                "split at {split}"
            );
        }
    }

    #[test]
    fn test_fletcher_large_input_split_at_half() {
        let data = vec![0xFF; 4096];
        let f16 = fletcher16(&data);
        assert_eq!(fletcher16_continue(&data[2048..], fletcher16(&data[..2048])), f16);

        let f32 = fletcher32(&data);
        assert_eq!(fletcher32_continue(&data[2048..], fletcher32(&data[..2048])), f32);
    }
}
