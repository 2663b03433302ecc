use crate::dab_ofdm_carrier_map::get_dab_ofdm_carrier_map;
use crate::dab_ofdm_parameters::get_dab_ofdm_parameters;
use crate::dab_ofdm_phase_reference_symbol::get_dab_ofdm_phase_reference_symbol_fft;
use dab_core::dab_transmission_modes::DabTransmissionMode;
use ofdm::error::OfdmConfigError;
use ofdm::ofdm_demodulator::{OfdmDemodulator, OfdmDemodulatorSettings};

/// Builds an OFDM demodulator configured with the DAB reference tables for
/// the given transmission mode.
pub fn create_dab_ofdm_demodulator(
    transmission_mode: DabTransmissionMode,
    settings: OfdmDemodulatorSettings,
) -> Result<OfdmDemodulator, OfdmConfigError> {
    let params = get_dab_ofdm_parameters(transmission_mode);
    let carrier_map = get_dab_ofdm_carrier_map(params.nb_fft_data_carriers, params.nb_fft);
    let prs_fft = get_dab_ofdm_phase_reference_symbol_fft(transmission_mode, params.nb_fft);
    OfdmDemodulator::new(&params, &carrier_map, &prs_fft, settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_modes_construct() {
        for mode in [
            DabTransmissionMode::I,
            DabTransmissionMode::II,
            DabTransmissionMode::III,
            DabTransmissionMode::IV,
        ] {
            let settings = OfdmDemodulatorSettings { total_threads: 1, ..Default::default() };
            assert!(create_dab_ofdm_demodulator(mode, settings).is_ok());
        }
    }
}
