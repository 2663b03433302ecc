/// Builds the frequency interleaving lookup table mapping each output
/// data carrier to its scrambled position in the DQPSK buffer.
///
/// DOC: ETSI EN 300 401
/// Referring to clause 14.6 - Frequency interleaving.
/// Before an OFDM symbol is packed, the order of the carriers is scrambled
/// so that selective fading doesn't destroy contiguous runs of bits.
pub fn get_dab_ofdm_carrier_map(total_carriers: usize, total_fft: usize) -> Vec<usize> {
    assert!(total_carriers > 0);
    assert!(total_fft % 4 == 0, "FFT length must be a multiple of 4");
    assert!(total_carriers <= total_fft, "Number of requested carriers must be less than or equal to total fft bins");

    let fft_index_dc = total_fft / 2;
    let fft_index_start = fft_index_dc - total_carriers / 2;
    let fft_index_end = fft_index_dc + total_carriers / 2;

    let mut carrier_map = Vec::with_capacity(total_carriers);
    let mut pi_value: usize = 0;
    for _ in 0..total_fft {
        // Referring to clause 14.6.1
        // The generating equation for the PI table, a 1 to 1 mapping over
        // the N-point FFT.
        let fft_index = pi_value;
        let k = total_fft / 4;
        pi_value = (13 * pi_value + k - 1) % total_fft;

        // Only FFT bins transmitted in the OFDM symbol are of interest:
        // -F <= f <= F where f != 0
        if fft_index < fft_index_start || fft_index > fft_index_end || fft_index == fft_index_dc {
            continue;
        }

        let carrier_out_index = if fft_index < fft_index_dc {
            fft_index - fft_index_start
        } else {
            // the DC bin is skipped, so bins above DC shift down by one
            fft_index - fft_index_start - 1
        };
        carrier_map.push(carrier_out_index);
    }

    assert!(carrier_map.len() == total_carriers, "Carrier map generator must visit every active carrier");
    carrier_map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_map_is_a_bijection() {
        for (total_carriers, total_fft) in [(1536, 2048), (768, 1024), (384, 512), (192, 256)] {
            let carrier_map = get_dab_ofdm_carrier_map(total_carriers, total_fft);
            assert_eq!(carrier_map.len(), total_carriers);
            let mut seen = vec![false; total_carriers];
            for &index in &carrier_map {
                assert!(index < total_carriers);
                assert!(!seen[index], "duplicate carrier index {}", index);
                seen[index] = true;
            }
        }
    }
}
