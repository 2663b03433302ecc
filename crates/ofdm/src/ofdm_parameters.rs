/// Describes the structure of an OFDM transmission frame.
/// A frame consists of one NULL symbol and N data symbols, with the phase
/// reference symbol (PRS) as the first data symbol.
///
/// # Diagram
/// ```text
/// | Frame                  |
/// | NULL | SYM*N           |
/// | NULL | PRS | SYM*(N-1) |
/// ```
///
/// After differential demodulation we end up with N-1 data symbols, since
/// each data symbol is decoded against the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfdmParameters {
    /// Number of OFDM data symbols in a transmission frame.
    pub nb_symbols: usize,
    /// Duration of the NULL symbol in samples.
    pub nb_null_period: usize,
    /// Duration of an OFDM data symbol in samples.
    pub nb_symbol_period: usize,
    /// Duration of the cyclic prefix inside a data symbol.
    pub nb_cyclic_prefix: usize,
    /// FFT length of a data symbol.
    pub nb_fft: usize,
    /// Number of FFT bins that are data carriers centered around DC.
    pub nb_fft_data_carriers: usize,
    /// Number of differentially demodulated symbols per frame.
    pub nb_dqpsk_symbols: usize,
    /// Number of output DQPSK constellation points per frame.
    pub nb_output_samples: usize,
    /// Number of output soft decision bits per frame.
    pub nb_output_bits: usize,
    /// Number of complex input samples for the entire frame.
    pub nb_input_samples: usize,
}

impl OfdmParameters {
    /// Derives the full parameter set from the required subset.
    pub fn new(
        nb_symbols: usize,
        nb_null_period: usize,
        nb_symbol_period: usize,
        nb_fft: usize,
        nb_fft_data_carriers: usize,
    ) -> Self {
        assert!(nb_symbols >= 2, "Number of symbols must be at least 2 due to differential QPSK encoding");
        assert!(nb_symbol_period >= nb_fft, "Number of samples in symbol is less than FFT resolution");
        assert!(nb_fft >= nb_fft_data_carriers, "Number of data carriers is limited to FFT resolution");
        assert!(nb_fft_data_carriers % 2 == 0, "Data carriers must be split evenly around DC");

        let nb_input_samples = nb_null_period + nb_symbol_period*nb_symbols;
        let nb_cyclic_prefix = nb_symbol_period - nb_fft;
        let nb_dqpsk_symbols = nb_symbols-1;
        let nb_output_samples = nb_dqpsk_symbols*nb_fft_data_carriers;
        let nb_output_bits = nb_output_samples*2;

        Self {
            nb_symbols,
            nb_null_period,
            nb_symbol_period,
            nb_cyclic_prefix,
            nb_fft,
            nb_fft_data_carriers,
            nb_dqpsk_symbols,
            nb_output_samples,
            nb_output_bits,
            nb_input_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields() {
        // mode I shape
        let params = OfdmParameters::new(76, 2656, 2552, 2048, 1536);
        assert_eq!(params.nb_cyclic_prefix, 504);
        assert_eq!(params.nb_dqpsk_symbols, 75);
        assert_eq!(params.nb_output_bits, 75*1536*2);
        assert_eq!(params.nb_input_samples, 2656 + 76*2552);
    }
}
