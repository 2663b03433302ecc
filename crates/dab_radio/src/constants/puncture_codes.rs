//! DOC: ETSI EN 300 401
//! Clause 11.1.2 - Puncturing procedure
//! Table 29 - Puncturing vectors
//!
//! Each vector covers 32 mother code bits (8 input bits at rate 1/4);
//! a 1 keeps the coded bit, a 0 punctures it. Vector PI_p carries 8+p
//! ones, giving a code rate of 8/(8+p).

pub type PunctureCode = [u8; 32];

pub static PUNCTURE_CODES: [PunctureCode; 24] = [
    // PI_1
    [1,1,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0],
    // PI_2
    [1,1,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0],
    // PI_3
    [1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0],
    // PI_4
    [1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0],
    // PI_5
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0],
    // PI_6
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,0,0,0],
    // PI_7
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,0,0,0],
    // PI_8
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0],
    // PI_9
    [1,1,1,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0],
    // PI_10
    [1,1,1,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,0,0, 1,1,0,0],
    // PI_11
    [1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,0,0, 1,1,0,0],
    // PI_12
    [1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0],
    // PI_13
    [1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0],
    // PI_14
    [1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,0,0],
    // PI_15
    [1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,0,0],
    // PI_16
    [1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0],
    // PI_17
    [1,1,1,1, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0],
    // PI_18
    [1,1,1,1, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,0, 1,1,1,0],
    // PI_19
    [1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,0, 1,1,1,0],
    // PI_20
    [1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0],
    // PI_21
    [1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0],
    // PI_22
    [1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,0],
    // PI_23
    [1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,0],
    // PI_24
    [1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1],
];

/// The final 24 mother code bits flushing the encoder tail are punctured
/// with this dedicated vector.
pub static PUNCTURE_CODE_TAIL: [u8; 24] =
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0];

/// Returns the puncturing vector for index 1..=24.
pub fn get_puncture_code(puncture_index: usize) -> &'static PunctureCode {
    assert!((1..=24).contains(&puncture_index), "puncture index {} outside 1..=24", puncture_index);
    &PUNCTURE_CODES[puncture_index - 1]
}

/// Number of punctured bits consumed when producing
/// `total_depunctured_bits` through the given vector.
pub fn punctured_bit_count(code: &[u8], total_depunctured_bits: usize) -> usize {
    let ones_per_cycle: usize = code.iter().map(|&bit| bit as usize).sum();
    let cycles = total_depunctured_bits / code.len();
    let remainder = total_depunctured_bits % code.len();
    let remainder_ones: usize = code[..remainder].iter().map(|&bit| bit as usize).sum();
    cycles * ones_per_cycle + remainder_ones
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_pi_p_keeps_8_plus_p_bits() {
        for (index, code) in PUNCTURE_CODES.iter().enumerate() {
            let pi = index + 1;
            let ones: usize = code.iter().map(|&bit| bit as usize).sum();
            assert_eq!(ones, 8 + pi, "PI_{}", pi);
        }
    }

    #[test]
    fn each_vector_adds_one_bit_to_its_predecessor() {
        for pair in PUNCTURE_CODES.windows(2) {
            for i in 0..32 {
                assert!(pair[1][i] >= pair[0][i], "puncturing vectors grow monotonically");
            }
        }
    }

    #[test]
    fn groups_keep_a_prefix_of_the_code_rate() {
        // every 4-bit group is 1s followed by 0s
        for code in PUNCTURE_CODES.iter() {
            for group in code.chunks_exact(4) {
                let mut seen_zero = false;
                for &bit in group {
                    if bit == 0 {
                        seen_zero = true;
                    } else {
                        assert!(!seen_zero);
                    }
                }
            }
        }
    }

    #[test]
    fn tail_vector_keeps_12_bits() {
        let ones: usize = PUNCTURE_CODE_TAIL.iter().map(|&bit| bit as usize).sum();
        assert_eq!(ones, 12);
    }

    #[test]
    fn fic_consumption_adds_up() {
        // DOC: ETSI EN 300 401 clause 11.2
        // 21 blocks of PI_16, 3 blocks of PI_15, 24 tail bits
        let total = punctured_bit_count(get_puncture_code(16), 21 * 128)
            + punctured_bit_count(get_puncture_code(15), 3 * 128)
            + punctured_bit_count(&PUNCTURE_CODE_TAIL, 24);
        assert_eq!(total, 2304);
    }
}
