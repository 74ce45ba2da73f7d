//! RFC 1071 Internet checksum, as used for the file header and descriptor
//! framing checksums.

/// One folding step: add the carry (bits above 16) back into the low 16 bits.
#[inline]
fn fold_once(val: u32) -> u32 {
    (val >> 16) + (val & 0xffff)
}

/// Fold a checksum accumulator down to 16 bits, repeating until no carry
/// remains.
pub fn fold(mut checksum: u32) -> u16 {
    while checksum >> 16 != 0 {
        checksum = fold_once(checksum);
    }
    checksum as u16
}

/// Compute the Internet checksum of `data`, treating it as a stream of
/// little-endian 16-bit words (an odd trailing byte is padded with zero).
///
/// Folds every 32 words (64 bytes) to keep the accumulator from overflowing
/// a `u32`, with a final fold at the end.
pub fn checksum_bytes(data: &[u8]) -> u16 {
    let mut acc: u32 = 0;
    let mut words_since_fold = 0u32;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        acc += u16::from_le_bytes([chunk[0], chunk[1]]) as u32;
        words_since_fold += 1;
        if words_since_fold == 32 {
            acc = fold_once(acc);
            words_since_fold = 0;
        }
    }
    if let [last] = *chunks.remainder() {
        acc += u16::from_le_bytes([last, 0]) as u32;
    }

    fold(acc)
}

/// Whether `checksum` (a value already folded to 16 bits) is a valid
/// complete Internet checksum: its bitwise-complement form must be all
/// zero bits or all one bits.
pub fn is_checksum_good(checksum: u16) -> bool {
    checksum == 0 || checksum == 0xffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_is_idempotent_once_below_16_bits() {
        let folded = fold(0x1_2345);
        assert!(folded as u32 >> 16 == 0);
        assert_eq!(fold(folded as u32), folded);
    }

    #[test]
    fn empty_buffer_checksums_to_zero() {
        assert_eq!(checksum_bytes(&[]), 0);
    }

    #[test]
    fn odd_length_buffer_pads_last_byte() {
        let a = checksum_bytes(&[0x01]);
        let b = checksum_bytes(&[0x01, 0x00]);
        assert_eq!(a, b);
    }

    #[test]
    fn recomputing_over_a_zeroed_checksum_field_reproduces_the_stored_value() {
        // This crate's checksummed structures (file header, descriptor set
        // catalog) embed the checksum field at a fixed, even offset within
        // an even-length buffer, compute it with the field zeroed, and
        // verify by zeroing the field again and comparing — rather than
        // relying on the classic "sum + its own checksum folds to all-1s"
        // property, which only holds when the checksum field sits at a
        // genuine word boundary (not true for arbitrary, possibly
        // odd-length, appended data).
        let mut buf = b"the quick brown fox jumps over lazy dogs\0\0".to_vec();
        let checksum_at = buf.len() - 2;
        let sum = checksum_bytes(&buf);
        buf[checksum_at..].copy_from_slice(&sum.to_le_bytes());

        let mut recheck = buf.clone();
        recheck[checksum_at..].copy_from_slice(&[0, 0]);
        assert_eq!(checksum_bytes(&recheck), sum);
    }

    #[test]
    fn is_checksum_good_accepts_only_all_zero_or_all_one_bits() {
        assert!(is_checksum_good(0));
        assert!(is_checksum_good(0xffff));
        assert!(!is_checksum_good(0x1234));
    }
}
