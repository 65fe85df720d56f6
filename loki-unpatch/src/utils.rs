use num_traits::PrimInt;

/// Rounds `num` up to a multiple of `alignment`. Returns `None` when the
/// alignment is not a power of two or the result does not fit in `N`.
pub fn align_to<N: PrimInt>(num: N, alignment: N) -> Option<N> {
    if alignment.count_ones() != 1 {
        return None;
    }
    let mask = alignment - N::one();
    num.checked_add(&mask).map(|n| n & !mask)
}

pub fn trim_end(data: &[u8]) -> &[u8] {
    &data[..data.iter().position(|&b| b == 0).unwrap_or(data.len())]
}
