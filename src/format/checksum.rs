//! The Jenkins lookup3 checksum of checksummed metadata structures.

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

#[inline]
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

/// Up to 4 little-endian bytes as a `u32`, zero extended.
#[inline]
fn word(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0, |word, (i, byte)| word | (u32::from(*byte) << (8 * i)))
}

fn hashlittle(bytes: &[u8], initval: u32) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    let length = bytes.len() as u32;
    let mut a = 0xdead_beef_u32.wrapping_add(length).wrapping_add(initval);
    let mut b = a;
    let mut c = a;

    let mut rest = bytes;
    while rest.len() > 12 {
        a = a.wrapping_add(word(&rest[0..4]));
        b = b.wrapping_add(word(&rest[4..8]));
        c = c.wrapping_add(word(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    if rest.is_empty() {
        return c;
    }

    // The final 1..=12 bytes, zero extended
    a = a.wrapping_add(word(rest));
    if rest.len() > 4 {
        b = b.wrapping_add(word(&rest[4..]));
    }
    if rest.len() > 8 {
        c = c.wrapping_add(word(&rest[8..]));
    }
    final_mix(&mut a, &mut b, &mut c);
    c
}

/// Compute the Jenkins lookup3 (`hashlittle`, initial value 0) checksum of `bytes`.
///
/// This is the checksum stored at the end of Fixed Array, Extensible Array and version 2 B-tree structures.
#[must_use]
pub fn checksum_lookup3(bytes: &[u8]) -> u32 {
    hashlittle(bytes, 0)
}
