/// Code alphabet with visually ambiguous symbols removed (`0 O o 1 l I`).
pub const ALPHABET: &[u8] = b"23456789abcdefghijkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

pub const BASE: u64 = ALPHABET.len() as u64;

/// Encodes `value` in the code alphabet, left-padded with the first symbol to `min_length`.
pub fn encode(mut value: u64, min_length: usize) -> String {
    let mut digits = Vec::with_capacity(min_length.max(12));
    loop {
        digits.push(ALPHABET[(value % BASE) as usize]);
        value /= BASE;
        if value == 0 {
            break;
        }
    }
    while digits.len() < min_length {
        digits.push(ALPHABET[0]);
    }
    digits.reverse();
    // every byte comes from ALPHABET, which is ASCII
    digits.into_iter().map(char::from).collect()
}

/// Encodes `value` reduced into the space of exactly `length` symbols.
pub fn encode_fixed(value: u64, length: usize) -> String {
    let reduced = match code_space(length) {
        Some(space) => value % space,
        None => value,
    };
    encode(reduced, length)
}

/// Inverse of [`encode`]. Returns `None` for foreign symbols or overflow.
pub fn decode(code: &str) -> Option<u64> {
    if code.is_empty() {
        return None;
    }
    code.bytes().try_fold(0u64, |acc, byte| {
        let digit = ALPHABET.iter().position(|&symbol| symbol == byte)? as u64;
        acc.checked_mul(BASE)?.checked_add(digit)
    })
}

/// Number of distinct codes of exactly `length` symbols, if it fits in a `u64`.
pub fn code_space(length: usize) -> Option<u64> {
    u32::try_from(length).ok().and_then(|len| BASE.checked_pow(len))
}

pub fn is_alphabet_symbol(c: char) -> bool {
    c.is_ascii() && ALPHABET.contains(&(c as u8))
}
