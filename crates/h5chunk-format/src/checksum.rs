//! Metadata block checksum: Jenkins lookup3 `hashlittle` with a zero seed.
//!
//! Every index block written by this crate (fixed array, extensible array,
//! B-tree nodes) ends in this checksum, computed over all preceding bytes
//! of the block.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// Compute the lookup3 checksum of `data`.
pub fn lookup3(data: &[u8]) -> u32 {
    let seed = 0xdead_beefu32.wrapping_add(data.len() as u32);
    let (mut a, mut b, mut c) = (seed, seed, seed);
    if data.is_empty() {
        return c;
    }

    // The final (possibly full) 12-byte group goes through `final_mix`, not `mix`.
    let body = (data.len() - 1) / 12 * 12;
    for block in data[..body].chunks_exact(12) {
        a = a.wrapping_add(LittleEndian::read_u32(&block[0..4]));
        b = b.wrapping_add(LittleEndian::read_u32(&block[4..8]));
        c = c.wrapping_add(LittleEndian::read_u32(&block[8..12]));
        mix(&mut a, &mut b, &mut c);
    }

    let mut tail = [0u8; 12];
    let rest = &data[body..];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(LittleEndian::read_u32(&tail[0..4]));
    b = b.wrapping_add(LittleEndian::read_u32(&tail[4..8]));
    c = c.wrapping_add(LittleEndian::read_u32(&tail[8..12]));
    final_mix(&mut a, &mut b, &mut c);
    c
}

fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    for (shift_a, shift_b, shift_c) in [(4, 6, 8), (16, 19, 4)] {
        *a = a.wrapping_sub(*c) ^ c.rotate_left(shift_a);
        *c = c.wrapping_add(*b);
        *b = b.wrapping_sub(*a) ^ a.rotate_left(shift_b);
        *a = a.wrapping_add(*c);
        *c = c.wrapping_sub(*b) ^ b.rotate_left(shift_c);
        *b = b.wrapping_add(*a);
    }
}

fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(14));
    *a = (*a ^ *c).wrapping_sub(c.rotate_left(11));
    *b = (*b ^ *a).wrapping_sub(a.rotate_left(25));
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(16));
    *a = (*a ^ *c).wrapping_sub(c.rotate_left(4));
    *b = (*b ^ *a).wrapping_sub(a.rotate_left(14));
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(24));
}

/// Append the checksum of `block` to it.
pub fn seal(block: &mut Vec<u8>) {
    let sum = lookup3(block);
    block.extend_from_slice(&sum.to_le_bytes());
}

/// Verify the trailing checksum of a sealed block and return its body.
pub fn verify<'a>(block: &'a [u8], structure: &'static str) -> Result<&'a [u8], FormatError> {
    if block.len() < 4 {
        return Err(FormatError::malformed(structure, "block shorter than its checksum"));
    }
    let (body, stored) = block.split_at(block.len() - 4);
    let stored = LittleEndian::read_u32(stored);
    let computed = lookup3(body);
    if stored != computed {
        return Err(FormatError::malformed(
            structure,
            format!("checksum {stored:#010x} does not match computed {computed:#010x}"),
        ));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_seed() {
        assert_eq!(lookup3(b""), 0xdead_beef);
    }

    #[test]
    fn reference_vector() {
        // From the driver in Bob Jenkins' lookup3.c.
        assert_eq!(lookup3(b"Four score and seven years ago"), 0x1777_0551);
    }

    #[test]
    fn every_tail_length_is_distinct() {
        let data: Vec<u8> = (1..=25).collect();
        let sums: Vec<u32> = (0..=25).map(|n| lookup3(&data[..n])).collect();
        for i in 0..sums.len() {
            for j in i + 1..sums.len() {
                assert_ne!(sums[i], sums[j], "lengths {i} and {j} collide");
            }
        }
    }

    #[test]
    fn seal_then_verify() {
        let mut block = b"FAHD\x00\x01".to_vec();
        seal(&mut block);
        assert_eq!(verify(&block, "test").unwrap(), b"FAHD\x00\x01");

        block[1] ^= 0x20;
        assert!(matches!(
            verify(&block, "test"),
            Err(FormatError::MalformedIndex { structure: "test", .. })
        ));
    }
}
