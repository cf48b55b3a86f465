//! Capacity Policy: how much to over-allocate when an array
//! must grow past its current block.
//!
//! `bit_scan_reverse` is the same "highest set bit" primitive a
//! round-up-to-power-of-two helper is built from, just exposed directly
//! instead of folded into a rounding helper.

use crate::layout::PAGESIZE;

/// Index of the highest set bit in `value`, or `0` if `value == 0`. Mirrors
/// the source's `bit_scan_reverse`.
#[inline]
fn bit_scan_reverse(value: usize) -> u32 {
    if value == 0 {
        0
    } else {
        usize::BITS - 1 - value.leading_zeros()
    }
}

#[inline]
fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Target allocation size, in bytes, for an array growing to `new_length`
/// elements of `elem_size` bytes each.
///
/// Small requests (`raw <= PAGESIZE`) get no over-allocation. Past that, a
/// multiplier of `100 + 1000 / (bit_scan_reverse(raw) + 1)` (percent) is
/// applied: always `>= 102%`, shrinking as the block gets bigger, so mid-size
/// arrays grow fast and huge ones waste proportionally less.
pub fn new_capacity(new_length: usize, elem_size: usize) -> usize {
    let raw = match new_length.checked_mul(elem_size) {
        Some(r) => r,
        None => return usize::MAX,
    };
    if raw <= PAGESIZE {
        return raw;
    }
    let mult = 100usize + 1000 / (bit_scan_reverse(raw) as usize + 1);
    let scaled = match new_length.checked_mul(mult) {
        Some(s) => s,
        None => return usize::MAX,
    };
    ceil_div(scaled, 100).saturating_mul(elem_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_requests_get_no_overallocation() {
        assert_eq!(new_capacity(10, 1), 10);
        assert_eq!(new_capacity(PAGESIZE, 1), PAGESIZE);
    }

    #[test]
    fn multiplier_is_at_least_102_percent_past_a_page() {
        let n = PAGESIZE * 4;
        let got = new_capacity(n, 1);
        assert!(got >= n);
        assert!(got as f64 / n as f64 >= 1.02);
    }

    #[test]
    fn multiplier_shrinks_as_blocks_get_bigger() {
        let small_past_page = new_capacity(PAGESIZE + 1, 1) as f64 / (PAGESIZE + 1) as f64;
        let huge = new_capacity(PAGESIZE * 1024, 1) as f64 / (PAGESIZE * 1024) as f64;
        assert!(huge <= small_past_page);
    }

    #[test]
    fn pure_function_same_input_same_output() {
        assert_eq!(new_capacity(9000, 4), new_capacity(9000, 4));
    }

    #[test]
    fn overflow_on_multiplication_is_reported_as_max() {
        assert_eq!(new_capacity(usize::MAX, usize::MAX), usize::MAX);
    }
}
