use super::core::ViterbiCore;
use super::{CODE_RATE, SOFT_DECISION_PUNCTURED};

/// Soft-decision Viterbi decoder for the DAB rate-1/4 mother code with
/// puncturing. The branch table is a shared static; each decoder owns its
/// path metrics, traceback window and depuncture work buffer.
pub struct DabViterbiDecoder {
    core: ViterbiCore,
    depunctured_symbols: Vec<i16>,
    accumulated_error: u64,
    is_sse_supported: bool,
}

struct DepunctureResult {
    total_output_symbols: usize,
    total_punctured_symbols: usize,
}

impl Default for DabViterbiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DabViterbiDecoder {
    pub fn new() -> Self {
        Self {
            core: ViterbiCore::new(),
            depunctured_symbols: Vec::new(),
            accumulated_error: 0,
            is_sse_supported: Self::detect_sse(),
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn detect_sse() -> bool {
        std::arch::is_x86_feature_detected!("sse4.1")
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn detect_sse() -> bool {
        false
    }

    /// Sets the traceback window in decoded bits, excluding tail bits.
    pub fn set_traceback_length(&mut self, traceback_length: usize) {
        self.core.set_traceback_length(traceback_length);
    }

    pub fn get_traceback_length(&self) -> usize {
        self.core.get_traceback_length()
    }

    pub fn get_current_decoded_bit(&self) -> usize {
        self.core.get_current_decoded_bit()
    }

    /// Clears the path metrics, biasing the given start state.
    pub fn reset(&mut self, starting_state: usize) {
        self.core.reset(starting_state);
        self.accumulated_error = 0;
    }

    /// De-punctures the input by substituting a neutral symbol wherever
    /// `puncture_code` is 0, cycling the code until
    /// `requested_output_symbols` de-punctured symbols have been produced,
    /// then runs the butterfly update over them.
    /// Returns the number of punctured input symbols consumed.
    pub fn update(
        &mut self,
        punctured_symbols: &[i8],
        puncture_code: &[u8],
        requested_output_symbols: usize,
    ) -> usize {
        let result = self.depuncture_symbols(punctured_symbols, puncture_code, requested_output_symbols);

        let symbols = &self.depunctured_symbols[..result.total_output_symbols];
        #[cfg(target_arch = "x86_64")]
        if self.is_sse_supported {
            unsafe { self.core.update_sse(symbols) };
            return result.total_punctured_symbols;
        }
        let _ = self.is_sse_supported;
        self.core.update_scalar(symbols);
        result.total_punctured_symbols
    }

    /// Traceback from `end_state`, producing `bytes_out.len() * 8` decoded
    /// bits. Returns the accumulated path metric error since the last reset.
    pub fn chainback(&mut self, bytes_out: &mut [u8], end_state: usize) -> u64 {
        self.core.chainback(bytes_out, end_state);
        self.accumulated_error + self.core.get_error(end_state)
    }

    fn depuncture_symbols(
        &mut self,
        punctured_symbols: &[i8],
        puncture_code: &[u8],
        requested_output_symbols: usize,
    ) -> DepunctureResult {
        assert!(requested_output_symbols % CODE_RATE == 0);
        assert!(!puncture_code.is_empty());

        if requested_output_symbols > self.depunctured_symbols.len() {
            self.depunctured_symbols.resize(requested_output_symbols, 0);
        }

        let mut index_punctured = 0usize;
        let mut index_code = 0usize;
        for index_output in 0..requested_output_symbols {
            let is_kept = puncture_code[index_code] != 0;
            self.depunctured_symbols[index_output] = if is_kept {
                let symbol = punctured_symbols[index_punctured];
                index_punctured += 1;
                i16::from(symbol)
            } else {
                SOFT_DECISION_PUNCTURED
            };
            index_code = (index_code + 1) % puncture_code.len();
        }

        DepunctureResult {
            total_output_symbols: requested_output_symbols,
            total_punctured_symbols: index_punctured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{encode_mother_code, CODE_RATE, SOFT_DECISION_HIGH, SOFT_DECISION_LOW};
    use super::*;

    fn to_soft_bits(symbols: &[u8]) -> Vec<i8> {
        symbols
            .iter()
            .map(|&bit| if bit == 1 { SOFT_DECISION_HIGH as i8 } else { SOFT_DECISION_LOW as i8 })
            .collect()
    }

    /// Keeps only the symbols selected by a repeating puncture code.
    fn puncture(symbols: &[i8], code: &[u8]) -> Vec<i8> {
        symbols
            .iter()
            .enumerate()
            .filter(|(i, _)| code[i % code.len()] != 0)
            .map(|(_, &s)| s)
            .collect()
    }

    #[test]
    fn decodes_unpunctured_stream_without_noise() {
        let message: Vec<u8> = (0..32).map(|i| (i * 37 + 11) as u8).collect();
        let encoded = encode_mother_code(&message);
        let soft = to_soft_bits(&encoded);

        let mut decoder = DabViterbiDecoder::new();
        decoder.set_traceback_length(message.len() * 8);
        decoder.reset(0);

        let keep_all = [1u8; 32];
        let consumed = decoder.update(&soft, &keep_all, soft.len());
        assert_eq!(consumed, soft.len());

        let mut decoded = vec![0u8; message.len()];
        let error = decoder.chainback(&mut decoded, 0);
        assert_eq!(decoded, message);
        assert_eq!(error, 0);
    }

    #[test]
    fn decodes_punctured_stream_without_noise() {
        // rate 1/2 pattern: keep the first two of every four symbols
        let code = [1u8, 1, 0, 0];
        let message: Vec<u8> = (0..24).map(|i| (i * 73 + 5) as u8).collect();
        let encoded = encode_mother_code(&message);
        let soft = to_soft_bits(&encoded);
        let punctured = puncture(&soft, &code);

        let mut decoder = DabViterbiDecoder::new();
        decoder.set_traceback_length(message.len() * 8);
        decoder.reset(0);

        let consumed = decoder.update(&punctured, &code, soft.len());
        assert_eq!(consumed, punctured.len());

        let mut decoded = vec![0u8; message.len()];
        decoder.chainback(&mut decoded, 0);
        assert_eq!(decoded, message);
    }

    #[test]
    fn corrects_corrupted_symbols() {
        let message: Vec<u8> = (0..16).map(|i| (0xA5u8).rotate_left(i as u32)).collect();
        let encoded = encode_mother_code(&message);
        let mut soft = to_soft_bits(&encoded);
        // flip a handful of well separated symbols
        for index in [3usize, 40, 81, 130, 200, 311] {
            soft[index] = -soft[index];
        }

        let mut decoder = DabViterbiDecoder::new();
        decoder.set_traceback_length(message.len() * 8);
        decoder.reset(0);
        let keep_all = [1u8; 32];
        decoder.update(&soft, &keep_all, soft.len());

        let mut decoded = vec![0u8; message.len()];
        let error = decoder.chainback(&mut decoded, 0);
        assert_eq!(decoded, message);
        assert!(error > 0);
    }

    #[test]
    fn update_can_be_split_across_calls() {
        let message: Vec<u8> = (0..16).map(|i| (i * 91 + 3) as u8).collect();
        let encoded = encode_mother_code(&message);
        let soft = to_soft_bits(&encoded);

        let mut decoder = DabViterbiDecoder::new();
        decoder.set_traceback_length(message.len() * 8);
        decoder.reset(0);

        let keep_all = [1u8; 32];
        let split = (soft.len() / 2 / CODE_RATE) * CODE_RATE;
        let consumed_a = decoder.update(&soft[..split], &keep_all, split);
        let consumed_b = decoder.update(&soft[split..], &keep_all, soft.len() - split);
        assert_eq!(consumed_a + consumed_b, soft.len());

        let mut decoded = vec![0u8; message.len()];
        decoder.chainback(&mut decoded, 0);
        assert_eq!(decoded, message);
    }
}
