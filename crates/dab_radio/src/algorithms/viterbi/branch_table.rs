use super::{CODE_POLYNOMIALS, CODE_RATE, NUM_STATES, SOFT_DECISION_HIGH, SOFT_DECISION_LOW};

/// Number of butterflies per decoding step; each covers two predecessor
/// states that differ only in their oldest bit.
pub const STRIDE: usize = NUM_STATES / 2;

/// Expected soft symbols for each butterfly and polynomial.
/// The table is immutable and shared by every decoder instance, including
/// the SIMD variant which loads it in 8-lane vectors.
pub struct BranchTable {
    table: [[i16; STRIDE]; CODE_RATE],
}

impl BranchTable {
    const fn new() -> Self {
        let mut table = [[0i16; STRIDE]; CODE_RATE];
        let mut r = 0;
        while r < CODE_RATE {
            let mut state = 0;
            while state < STRIDE {
                let value = (state << 1) & (CODE_POLYNOMIALS[r] as usize);
                let parity = (value.count_ones() & 1) as i16;
                table[r][state] = if parity == 1 { SOFT_DECISION_HIGH } else { SOFT_DECISION_LOW };
                state += 1;
            }
            r += 1;
        }
        Self { table }
    }

    #[inline(always)]
    pub fn row(&self, r: usize) -> &[i16; STRIDE] {
        &self.table[r]
    }
}

/// The single shared branch table for the DAB mother code.
pub static BRANCH_TABLE: BranchTable = BranchTable::new();
