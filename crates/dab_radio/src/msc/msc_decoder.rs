//! Per-subchannel MSC decoder: address mapping, time deinterleaving,
//! punctured Viterbi decoding and energy dispersal.

use crate::algorithms::additive_scrambler::AdditiveScrambler;
use crate::algorithms::viterbi::DabViterbiDecoder;
use crate::constants::protection_profiles::{get_schedule, PunctureSchedule, BITS_PER_CU};
use crate::constants::puncture_codes::{get_puncture_code, PUNCTURE_CODE_TAIL};
use crate::database::Subchannel;
use crate::msc::cif_deinterleaver::CifDeinterleaver;

const TARGET: &str = "msc-decoder";

pub struct MscDecoder {
    start_bit: usize,
    nb_subchannel_bits: usize,
    schedule: PunctureSchedule,
    deinterleaver: CifDeinterleaver,
    vitdec: DabViterbiDecoder,
    scrambler: AdditiveScrambler,
    decoded_bytes: Vec<u8>,
    /// Viterbi path error of the most recent logical frame.
    pub last_path_error: u64,
}

impl MscDecoder {
    /// Builds a decoder for a complete subchannel record. Returns None
    /// when the protection configuration cannot be resolved.
    pub fn new(subchannel: &Subchannel) -> Option<Self> {
        let start_address_cu = subchannel.start_address_cu? as usize;
        let length_cu = subchannel.length_cu? as usize;
        let protection = subchannel.protection?;
        let schedule = get_schedule(protection, length_cu)?;

        tracing::info!(
            target: TARGET,
            "subchannel {}: start={} CU length={} CU bitrate={} kbps padding={} bits",
            subchannel.id, start_address_cu, length_cu, schedule.bitrate_kbps, schedule.padding_bits,
        );

        let nb_subchannel_bits = length_cu * BITS_PER_CU;
        let nb_decoded_bits = schedule.nb_decoded_bytes * 8;
        let mut vitdec = DabViterbiDecoder::new();
        vitdec.set_traceback_length(nb_decoded_bits);

        Some(Self {
            start_bit: start_address_cu * BITS_PER_CU,
            nb_subchannel_bits,
            deinterleaver: CifDeinterleaver::new(nb_subchannel_bits),
            vitdec,
            scrambler: AdditiveScrambler::new(0xFFFF),
            decoded_bytes: vec![0u8; schedule.nb_decoded_bytes],
            schedule,
            last_path_error: 0,
        })
    }

    pub fn nb_decoded_bytes(&self) -> usize {
        self.schedule.nb_decoded_bytes
    }

    pub fn schedule(&self) -> &PunctureSchedule {
        &self.schedule
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.schedule.bitrate_kbps
    }

    /// Decodes this subchannel's slice of one CIF. Returns the decoded
    /// logical frame bytes, or None while the deinterleaver is priming.
    pub fn decode_cif(&mut self, cif_soft_bits: &[i8]) -> Option<&[u8]> {
        let end_bit = self.start_bit + self.nb_subchannel_bits;
        let Some(subchannel_bits) = cif_soft_bits.get(self.start_bit..end_bit) else {
            tracing::warn!(
                target: TARGET,
                "subchannel slice {}..{} outside CIF of {} bits",
                self.start_bit, end_bit, cif_soft_bits.len(),
            );
            return None;
        };

        // Clause 12: nothing comes out until 16 CIFs have been seen
        let deinterleaved = self.deinterleaver.push_cif(subchannel_bits)?;

        self.vitdec.reset(0);
        let mut curr_bit = 0usize;
        for run in &self.schedule.block_runs {
            let nb_depunctured = run.nb_blocks * 128;
            curr_bit += self.vitdec.update(
                &deinterleaved[curr_bit..],
                get_puncture_code(run.puncture_index),
                nb_depunctured,
            );
        }
        curr_bit += self.vitdec.update(
            &deinterleaved[curr_bit..],
            &PUNCTURE_CODE_TAIL,
            PUNCTURE_CODE_TAIL.len(),
        );
        debug_assert!(curr_bit == self.schedule.total_punctured_bits);
        // trailing padding bits are discarded

        self.last_path_error = self.vitdec.chainback(&mut self.decoded_bytes, 0);

        self.scrambler.reset();
        self.scrambler.descramble(&mut self.decoded_bytes);
        Some(&self.decoded_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::viterbi::encode_mother_code;
    use crate::constants::protection_profiles::{EepOption, Protection};
    use crate::msc::cif_deinterleaver::INTERLEAVE_DELAYS;

    /// Transmitter-side rendition of one logical frame: scramble,
    /// convolve, puncture per the schedule, pad.
    fn encode_logical_frame(payload: &[u8], schedule: &PunctureSchedule, nb_subchannel_bits: usize) -> Vec<i8> {
        let mut bytes = payload.to_vec();
        let mut scrambler = AdditiveScrambler::new(0xFFFF);
        scrambler.descramble(&mut bytes);
        let symbols = encode_mother_code(&bytes);

        let mut soft = Vec::with_capacity(nb_subchannel_bits);
        let mut symbol_index = 0usize;
        let puncture = |code: &[u8], nb_depunctured: usize, soft: &mut Vec<i8>, symbol_index: &mut usize| {
            for i in 0..nb_depunctured {
                if code[i % code.len()] != 0 {
                    soft.push(if symbols[*symbol_index] == 1 { 127 } else { -127 });
                }
                *symbol_index += 1;
            }
        };
        for run in &schedule.block_runs {
            puncture(get_puncture_code(run.puncture_index), run.nb_blocks * 128, &mut soft, &mut symbol_index);
        }
        puncture(&PUNCTURE_CODE_TAIL, PUNCTURE_CODE_TAIL.len(), &mut soft, &mut symbol_index);
        assert_eq!(symbol_index, symbols.len());
        soft.resize(nb_subchannel_bits, 0);
        soft
    }

    #[test]
    fn decodes_an_eep_subchannel_end_to_end() {
        // EEP 3-A, 8 kbps: 6 CU, 24 decoded bytes per logical frame
        let subchannel = Subchannel {
            id: 4,
            start_address_cu: Some(2),
            length_cu: Some(6),
            protection: Some(Protection::Eep { option: EepOption::A, level: 3 }),
        };
        let mut decoder = MscDecoder::new(&subchannel).unwrap();
        assert_eq!(decoder.nb_decoded_bytes(), 24);

        let nb_subchannel_bits = 6 * BITS_PER_CU;
        let nb_cif_bits = 16 * BITS_PER_CU;
        let total_frames = 20usize;
        let payloads: Vec<Vec<u8>> = (0..total_frames)
            .map(|f| (0..24).map(|i| ((f * 13 + i * 7) % 251) as u8).collect())
            .collect();

        // interleave the encoded frames across transmitted CIFs
        let schedule = decoder.schedule().clone();
        let encoded: Vec<Vec<i8>> = payloads
            .iter()
            .map(|payload| encode_logical_frame(payload, &schedule, nb_subchannel_bits))
            .collect();
        let mut transmitted = vec![vec![0i8; nb_subchannel_bits]; total_frames + 16];
        for (f, frame) in encoded.iter().enumerate() {
            for (i, &bit) in frame.iter().enumerate() {
                transmitted[f + INTERLEAVE_DELAYS[i % 16]][i] = bit;
            }
        }

        let mut recovered = Vec::new();
        for subchannel_bits in &transmitted {
            // place the subchannel at its start address inside a larger CIF
            let mut cif = vec![0i8; nb_cif_bits];
            cif[2 * BITS_PER_CU..2 * BITS_PER_CU + nb_subchannel_bits].copy_from_slice(subchannel_bits);
            if let Some(bytes) = decoder.decode_cif(&cif) {
                recovered.push(bytes.to_vec());
            }
        }

        assert!(recovered.len() >= total_frames);
        for (f, payload) in payloads.iter().enumerate() {
            assert_eq!(&recovered[f], payload, "logical frame {}", f);
        }
    }
}
