use crate::dab_transmission_modes::DabTransmissionMode;

/// All constants are defined for the nominal baseband sampling frequency.
pub const SAMPLING_FREQUENCY_HZ: u32 = 2_048_000;

/// Static description of a DAB transmission frame for one transmission mode.
/// This contains the information required for both OFDM demodulation and
/// digital decoding of the fast information and main service channels.
///
/// # Diagram of a mode I frame
/// ```text
/// | Frame               |
/// | NULL | SYM*76       |
/// | NULL | PRS | SYM*75 |
///              | FIC   | MSC    |
///              | SYM*3 | SYM*72 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DabParameters {
    /// Number of OFDM data symbols in a transmission frame (PRS included).
    pub nb_symbols: usize,
    /// Duration of the NULL symbol in samples.
    pub nb_null_period: usize,
    /// Duration of an OFDM data symbol in samples (cyclic prefix included).
    pub nb_symbol_period: usize,
    /// FFT length of an OFDM data symbol.
    pub nb_fft: usize,
    /// Number of FFT bins that are data carriers centered around DC.
    pub nb_fft_data_carriers: usize,
    /// Number of demodulated symbols for the fast information channel (FIC).
    pub nb_fic_symbols: usize,
    /// Number of demodulated symbols for the main service channel (MSC).
    pub nb_msc_symbols: usize,
    /// Number of fast information blocks (FIB) in the FIC of one frame.
    pub nb_fibs_in_fic: usize,
    /// Number of common interleaved frames (CIF) in the MSC of one frame.
    pub nb_cifs_in_msc: usize,
}

impl DabParameters {
    /// Subcarrier spacing in Hz. This is the sampling frequency divided by
    /// the FFT length and is fixed per transmission mode.
    pub fn carrier_spacing_hz(&self) -> f32 {
        (SAMPLING_FREQUENCY_HZ as f32) / (self.nb_fft as f32)
    }

    /// Duration of the cyclic prefix of a data symbol in samples.
    pub fn nb_cyclic_prefix(&self) -> usize {
        self.nb_symbol_period - self.nb_fft
    }

    /// Total number of complex samples for an entire transmission frame.
    pub fn nb_frame_samples(&self) -> usize {
        self.nb_null_period + self.nb_symbol_period * self.nb_symbols
    }
}

/// Returns the frame structure for the given transmission mode.
pub fn get_dab_parameters(transmission_mode: DabTransmissionMode) -> DabParameters {
    let params = match transmission_mode {
        DabTransmissionMode::I => DabParameters {
            nb_symbols: 76,
            nb_null_period: 2656,
            nb_symbol_period: 2552,
            nb_fft: 2048,
            nb_fft_data_carriers: 1536,
            nb_fic_symbols: 3,
            nb_msc_symbols: 72,
            nb_fibs_in_fic: 12,
            nb_cifs_in_msc: 4,
        },
        DabTransmissionMode::II => DabParameters {
            nb_symbols: 76,
            nb_null_period: 664,
            nb_symbol_period: 638,
            nb_fft: 512,
            nb_fft_data_carriers: 384,
            nb_fic_symbols: 3,
            nb_msc_symbols: 72,
            nb_fibs_in_fic: 3,
            nb_cifs_in_msc: 1,
        },
        DabTransmissionMode::III => DabParameters {
            nb_symbols: 153,
            nb_null_period: 345,
            nb_symbol_period: 319,
            nb_fft: 256,
            nb_fft_data_carriers: 192,
            nb_fic_symbols: 8,
            nb_msc_symbols: 144,
            nb_fibs_in_fic: 4,
            nb_cifs_in_msc: 1,
        },
        DabTransmissionMode::IV => DabParameters {
            nb_symbols: 76,
            nb_null_period: 1328,
            nb_symbol_period: 1276,
            nb_fft: 1024,
            nb_fft_data_carriers: 768,
            nb_fic_symbols: 3,
            nb_msc_symbols: 72,
            nb_fibs_in_fic: 6,
            nb_cifs_in_msc: 2,
        },
    };

    assert!(params.nb_symbols >= 2, "Number of symbols must be at least 2 due to differential QPSK encoding");
    assert!(params.nb_symbol_period >= params.nb_fft, "Number of samples in symbol is less than FFT resolution");
    assert!(params.nb_fft >= params.nb_fft_data_carriers, "Number of data carriers is limited to FFT resolution");
    assert!((params.nb_symbols-1) == (params.nb_fic_symbols + params.nb_msc_symbols), "Number of data symbols after DQPSK doesn't match number of FIC and MSC symbols");
    assert!(params.nb_fibs_in_fic % params.nb_cifs_in_msc == 0, "The number of FIBs in the FIC must be a multiple of the number of CIFs in the MSC");

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_modes_are_internally_consistent() {
        for mode in [
            DabTransmissionMode::I,
            DabTransmissionMode::II,
            DabTransmissionMode::III,
            DabTransmissionMode::IV,
        ] {
            // the getter asserts the structural invariants itself
            let params = get_dab_parameters(mode);
            assert!(params.nb_cyclic_prefix() > 0);
            assert!(params.nb_frame_samples() > params.nb_fft);
        }
    }

    #[test]
    fn mode_i_carrier_spacing_is_1khz() {
        let params = get_dab_parameters(DabTransmissionMode::I);
        assert!((params.carrier_spacing_hz() - 1000.0).abs() < 1e-3);
    }
}
