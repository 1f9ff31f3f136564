// SPDX-License-Identifier: Apache-2.0

//! Heap size strings in the `<digits>[K|M|G]` form the JVM accepts.

/// Returns whether `value` is a heap size the JVM accepts for `-Xms`/`-Xmx`.
///
/// Sizes whose byte count does not fit in a `u64` are rejected.
pub fn is_valid_heap_size(value: &str) -> bool {
    heap_size_bytes(value).is_some()
}

/// Converts a heap size to bytes. `None` when malformed, zero or too large.
pub fn heap_size_bytes(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last()?.to_ascii_uppercase() {
        'K' => (&value[..value.len() - 1], 1u64 << 10),
        'M' => (&value[..value.len() - 1], 1u64 << 20),
        'G' => (&value[..value.len() - 1], 1u64 << 30),
        _ => (value, 1),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match digits.parse::<u64>().ok()?.checked_mul(multiplier)? {
        0 => None,
        bytes => Some(bytes),
    }
}
