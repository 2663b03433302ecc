use dab_core::dab_parameters::get_dab_parameters;
use dab_core::dab_transmission_modes::DabTransmissionMode;

/// Bit-level layout of the demodulated DAB frame.
///
/// # Common acronyms
/// | Acronym | Phrase | Description |
/// | ------- | ------ | ----------- |
/// | FIC | Fast Information Channel | Carries metadata about the ensemble's structure including channel descriptions. |
/// | MSC | Main Service Channel | Carries radio data for the ensemble, including audio and slideshows. |
/// | CIF | Common Interleaved Frame | The MSC is transmitted as a series of interleaved frames. |
/// | FIB | Fast Information Block | The FIC is transmitted as groups of consecutive blocks. |
/// | FIG | Fast Information Group | A tagged record inside a FIB. |
///
/// # Diagram of a mode I frame after demodulation
/// ```text
/// | Frame              |
/// | SYM*75             |
/// | SYM*3     | SYM*72 |
/// | FIC       | MSC    |
/// | [FIB*3]*4 | CIF*4  |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DabRadioParameters {
    /// Number of demodulated data symbols per frame.
    pub nb_symbols: usize,
    /// Number of symbols carrying the fast information channel.
    pub nb_fic_symbols: usize,
    /// Number of symbols carrying the main service channel.
    pub nb_msc_symbols: usize,
    /// Number of fast information blocks per frame.
    pub nb_fibs_in_fic: usize,
    /// Number of common interleaved frames per frame.
    pub nb_cifs_in_msc: usize,
    /// Number of soft bits per demodulated symbol.
    pub nb_bits_per_symbol: usize,
    /// Number of soft bits per frame.
    pub nb_bits_per_frame: usize,
    /// Number of soft bits in the FIC.
    pub nb_bits_in_fic: usize,
    /// Number of soft bits in the MSC.
    pub nb_bits_in_msc: usize,
    /// Number of decoded bits per FIB.
    pub nb_bits_per_fib: usize,
    /// Number of soft bits per FIB group (one group per CIF).
    pub nb_bits_per_fib_group: usize,
    /// Number of soft bits per CIF.
    pub nb_bits_per_cif: usize,
}

/// Derives the decoder-facing bit counts for a transmission mode.
pub fn get_dab_radio_parameters(transmission_mode: DabTransmissionMode) -> DabRadioParameters {
    let params = get_dab_parameters(transmission_mode);

    let bits_per_carrier = 2;
    let nb_symbols = params.nb_symbols - 1;
    let nb_fic_symbols = params.nb_fic_symbols;
    let nb_msc_symbols = params.nb_msc_symbols;
    let nb_fibs_in_fic = params.nb_fibs_in_fic;
    let nb_cifs_in_msc = params.nb_cifs_in_msc;
    let nb_bits_per_symbol = params.nb_fft_data_carriers * bits_per_carrier;
    let nb_bits_per_frame = nb_bits_per_symbol * nb_symbols;
    let nb_bits_in_fic = nb_fic_symbols * nb_bits_per_symbol;
    let nb_bits_in_msc = nb_msc_symbols * nb_bits_per_symbol;
    let nb_bits_per_fib = 256;
    let nb_bits_per_fib_group = nb_bits_in_fic / nb_cifs_in_msc;
    let nb_bits_per_cif = nb_bits_in_msc / nb_cifs_in_msc;

    assert!(nb_symbols == nb_fic_symbols + nb_msc_symbols, "Number of data symbols in frame doesn't match number of FIC and MSC symbols");
    assert!(nb_fibs_in_fic % nb_cifs_in_msc == 0, "The number of FIBs in the FIC must be a multiple of the number of CIFs in the MSC");

    DabRadioParameters {
        nb_symbols,
        nb_fic_symbols,
        nb_msc_symbols,
        nb_fibs_in_fic,
        nb_cifs_in_msc,
        nb_bits_per_symbol,
        nb_bits_per_frame,
        nb_bits_in_fic,
        nb_bits_in_msc,
        nb_bits_per_fib,
        nb_bits_per_fib_group,
        nb_bits_per_cif,
    }
}
