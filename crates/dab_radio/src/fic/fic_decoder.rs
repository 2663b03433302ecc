//! Decodes one FIB group per CIF: Viterbi with the FIC puncturing
//! schedule, energy dispersal, then a CRC check per FIB.

use crate::algorithms::additive_scrambler::AdditiveScrambler;
use crate::algorithms::crc::CRC16_CCITT_INVERTED;
use crate::algorithms::viterbi::DabViterbiDecoder;
use crate::constants::puncture_codes::{get_puncture_code, PUNCTURE_CODE_TAIL};

/// Decoded bits per FIB, CRC included.
const NB_FIB_BITS: usize = 256;
/// DOC: ETSI EN 300 401, clause 11.2 - Coding in the fast information channel
/// The standard tabulates the FIC puncturing for transmission mode I:
/// 21 blocks of 128 bits under PI_16, 3 under PI_15, then the tail.
const NB_PI_16_BLOCK_BITS: usize = 21 * 128;
const NB_PI_15_BLOCK_BITS: usize = 3 * 128;
const NB_TAIL_BITS: usize = 24;

#[derive(Debug, Default, Clone, Copy)]
pub struct FicCounters {
    pub total_fibs: u64,
    pub total_crc_errors: u64,
    /// Viterbi path error of the most recent FIB group.
    pub last_path_error: u64,
}

pub struct FicDecoder {
    nb_encoded_bits: usize,
    nb_fibs_per_group: usize,
    vitdec: DabViterbiDecoder,
    scrambler: AdditiveScrambler,
    decoded_bytes: Vec<u8>,
    pub counters: FicCounters,
}

impl FicDecoder {
    /// `nb_encoded_bits` is the soft bit count of one FIB group,
    /// `nb_fibs_per_group` the FIB count it decodes to.
    pub fn new(nb_encoded_bits: usize, nb_fibs_per_group: usize) -> Self {
        // rate 1/3 after puncturing the rate 1/4 mother code
        let nb_decoded_bits = nb_encoded_bits / 3;
        let nb_decoded_bytes = nb_decoded_bits / 8;
        assert!(nb_decoded_bits == nb_fibs_per_group * NB_FIB_BITS, "FIB group of {} bits cannot carry {} FIBs", nb_encoded_bits, nb_fibs_per_group);

        let mut vitdec = DabViterbiDecoder::new();
        vitdec.set_traceback_length(nb_decoded_bits);

        Self {
            nb_encoded_bits,
            nb_fibs_per_group,
            vitdec,
            scrambler: AdditiveScrambler::new(0xFFFF),
            decoded_bytes: vec![0u8; nb_decoded_bytes],
            counters: FicCounters::default(),
        }
    }

    /// Decodes one FIB group of soft bits, returning the FIBs that passed
    /// their CRC check. Groups outside the mode I puncturing layout are
    /// dropped with a warning.
    pub fn decode_fib_group(&mut self, encoded_bits: &[i8]) -> Vec<&[u8]> {
        assert!(encoded_bits.len() == self.nb_encoded_bits);

        // The standard only gives FIC puncture codes for the mode I group
        // layout. Modes II and IV share it; anything else is unsupported.
        let nb_decoded_bits_mode_i = (NB_PI_16_BLOCK_BITS + NB_PI_15_BLOCK_BITS + NB_TAIL_BITS) / 4 - 6;
        let nb_decoded_bits = self.nb_fibs_per_group * NB_FIB_BITS;
        if nb_decoded_bits != nb_decoded_bits_mode_i {
            tracing::warn!(
                target: "fic-decoder",
                "expected {} decoded bits per group but got {}; puncture schedule unknown",
                nb_decoded_bits_mode_i, nb_decoded_bits,
            );
            return Vec::new();
        }

        self.vitdec.reset(0);
        let mut curr_bit = 0usize;
        curr_bit += self.vitdec.update(&encoded_bits[curr_bit..], get_puncture_code(16), NB_PI_16_BLOCK_BITS);
        curr_bit += self.vitdec.update(&encoded_bits[curr_bit..], get_puncture_code(15), NB_PI_15_BLOCK_BITS);
        curr_bit += self.vitdec.update(&encoded_bits[curr_bit..], &PUNCTURE_CODE_TAIL, NB_TAIL_BITS);
        debug_assert!(curr_bit == self.nb_encoded_bits);

        let error = self.vitdec.chainback(&mut self.decoded_bytes, 0);
        self.counters.last_path_error = error;

        self.scrambler.reset();
        self.scrambler.descramble(&mut self.decoded_bytes);

        let nb_fib_bytes = self.decoded_bytes.len() / self.nb_fibs_per_group;
        let mut valid_fibs = Vec::with_capacity(self.nb_fibs_per_group);
        for fib in self.decoded_bytes.chunks_exact(nb_fib_bytes) {
            self.counters.total_fibs += 1;
            if CRC16_CCITT_INVERTED.validate(fib) {
                valid_fibs.push(fib);
            } else {
                self.counters.total_crc_errors += 1;
                tracing::debug!(target: "fic-decoder", "FIB crc16 mismatch");
            }
        }
        valid_fibs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::viterbi::encode_mother_code;
    use crate::constants::puncture_codes::punctured_bit_count;

    /// Builds the soft bit FIB group that carries the given 3 FIBs.
    fn encode_fib_group(fibs: &[[u8; 32]; 3]) -> Vec<i8> {
        let mut payload = Vec::with_capacity(96);
        for fib in fibs {
            payload.extend_from_slice(fib);
        }
        // scramble, convolve, then puncture with the FIC schedule
        let mut scrambler = AdditiveScrambler::new(0xFFFF);
        scrambler.descramble(&mut payload);
        let symbols = encode_mother_code(&payload);

        let mut soft = Vec::with_capacity(2304);
        let mut symbol_index = 0usize;
        let push_block = |code: &[u8], depunctured: usize, soft: &mut Vec<i8>, symbol_index: &mut usize| {
            for i in 0..depunctured {
                let keep = code[i % code.len()] != 0;
                if keep {
                    let bit = symbols[*symbol_index];
                    soft.push(if bit == 1 { 127 } else { -127 });
                }
                *symbol_index += 1;
            }
        };
        push_block(get_puncture_code(16), NB_PI_16_BLOCK_BITS, &mut soft, &mut symbol_index);
        push_block(get_puncture_code(15), NB_PI_15_BLOCK_BITS, &mut soft, &mut symbol_index);
        push_block(&PUNCTURE_CODE_TAIL, NB_TAIL_BITS, &mut soft, &mut symbol_index);
        assert_eq!(symbol_index, symbols.len());
        assert_eq!(
            soft.len(),
            punctured_bit_count(get_puncture_code(16), NB_PI_16_BLOCK_BITS)
                + punctured_bit_count(get_puncture_code(15), NB_PI_15_BLOCK_BITS)
                + punctured_bit_count(&PUNCTURE_CODE_TAIL, NB_TAIL_BITS)
        );
        soft
    }

    fn make_fib(seed: u8) -> [u8; 32] {
        let mut fib = [0u8; 32];
        for (i, byte) in fib.iter_mut().enumerate().take(30) {
            *byte = seed.wrapping_add((i * 7) as u8);
        }
        let crc = CRC16_CCITT_INVERTED.process(&fib[..30]);
        fib[30..].copy_from_slice(&crc.to_be_bytes());
        fib
    }

    #[test]
    fn round_trips_a_clean_fib_group() {
        let fibs = [make_fib(1), make_fib(50), make_fib(200)];
        let soft = encode_fib_group(&fibs);

        let mut decoder = FicDecoder::new(2304, 3);
        let decoded = decoder.decode_fib_group(&soft);
        assert_eq!(decoded.len(), 3);
        for (decoded_fib, fib) in decoded.iter().zip(fibs.iter()) {
            assert_eq!(*decoded_fib, &fib[..]);
        }
        assert_eq!(decoder.counters.total_crc_errors, 0);
    }

    #[test]
    fn recovers_from_corrupted_soft_bits() {
        let fibs = [make_fib(3), make_fib(90), make_fib(180)];
        let mut soft = encode_fib_group(&fibs);
        // a scattering of flipped soft bits stays within the code's reach
        for index in (0..soft.len()).step_by(97) {
            soft[index] = -soft[index];
        }

        let mut decoder = FicDecoder::new(2304, 3);
        let decoded = decoder.decode_fib_group(&soft);
        assert_eq!(decoded.len(), 3);
        assert!(decoder.counters.last_path_error > 0);
    }
}
