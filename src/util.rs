/// Hash of an intermediate key; `ihash(key) % n_reduce` picks its partition.
pub(crate) fn ihash(key: &str) -> u32 {
    let mut h: u32 = 0;
    for c in key.chars() {
        h = (h << 5).wrapping_sub(h).wrapping_add(c as u32);
    }
    h
}
