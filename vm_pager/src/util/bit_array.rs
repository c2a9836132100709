/// Fixed size bitmap, one bit per page or swap slot.
/// A set bit means "in use".
pub(crate) struct BitArray {
    arr: Vec<u8>,
    bit_len: usize,
}

impl BitArray {
    pub(crate) fn new(bit_len: usize) -> Self {
        BitArray {
            arr: vec![0u8; super::div_ceil(bit_len, 8)],
            bit_len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bit_len
    }

    pub(crate) fn set(&mut self, value: bool, index: usize) {
        debug_assert!(index < self.bit_len, "index {} out of bounds", index);

        let arr_index = index / 8;
        let internal_index = index % 8;

        let item = &mut self.arr[arr_index];
        if value {
            // set bit
            *item |= 1u8 << internal_index;
        } else {
            // unset bit
            *item &= !(1u8 << internal_index);
        }
    }

    pub(crate) fn is_set(&self, index: usize) -> bool {
        debug_assert!(index < self.bit_len, "index {} out of bounds", index);

        let arr_index = index / 8;
        let internal_index = index % 8;

        let item = self.arr[arr_index];
        (item & (1u8 << internal_index)) != 0
    }

    /// Sets the bits `[start, start + cnt)` to `value`
    pub(crate) fn set_multiple(&mut self, start: usize, cnt: usize, value: bool) {
        for index in start..start + cnt {
            self.set(value, index);
        }
    }

    /// Returns true if all bits in `[start, start + cnt)` equal `value`
    pub(crate) fn all(&self, start: usize, cnt: usize, value: bool) -> bool {
        if start + cnt > self.bit_len {
            return false;
        }

        (start..start + cnt).all(|index| self.is_set(index) == value)
    }

    /// Finds the first run of `cnt` consecutive bits that equal `value`
    pub(crate) fn scan(&self, cnt: usize, value: bool) -> Option<usize> {
        if cnt == 0 || cnt > self.bit_len {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for index in 0..self.bit_len {
            if self.is_set(index) == value {
                if run_len == 0 {
                    run_start = index;
                }
                run_len += 1;

                if run_len == cnt {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }

        None
    }

    /// Like `scan`, but also flips the found run to `!value`
    pub(crate) fn scan_and_flip(&mut self, cnt: usize, value: bool) -> Option<usize> {
        let start = self.scan(cnt, value)?;
        self.set_multiple(start, cnt, !value);
        Some(start)
    }

    /// Number of bits that equal `value`
    pub(crate) fn count(&self, value: bool) -> usize {
        (0..self.bit_len).filter(|&index| self.is_set(index) == value).count()
    }
}
