//! Small DSP helpers shared by the demodulator stages.

use num::complex::Complex32;

/// Average L1 norm (|I|+|Q|) of a block of samples.
pub fn calculate_l1_average(block: &[Complex32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let l1_sum: f32 = block.iter().map(|x| x.l1_norm()).sum();
    l1_sum / (block.len() as f32)
}

/// Replaces each sample with the conjugate product against its successor.
/// arg(~z0*z1) = arg(z1)-arg(z0), which removes any common phase shift
/// before correlating magnitude spectra.
pub fn calculate_relative_phase(x: &mut [Complex32]) {
    let length = x.len();
    for i in 0..(length - 1) {
        let delta = x[i].conj() * x[i + 1];
        x[i] = delta;
    }
    x[length - 1] = Complex32::default();
}

/// Converts an FFT buffer into a dB magnitude spectrum with DC moved to
/// the centre bin.
pub fn calculate_magnitude_spectrum(x: &[Complex32], y: &mut [f32]) {
    assert!(x.len() == y.len());
    let n = x.len();
    let m = n / 2;
    for i in 0..n {
        let j = (i + m) % n;
        y[i] = 20.0 * x[j].norm().log10();
    }
}

// SOURCE: https://mooooo.ooo/chebyshev-sine-approximation
//         Chebyshev polynomial that approximates f(x) = sin(2*pi*x) accurately within [-0.75,+0.75]
pub fn fast_sine(x: f32) -> f32 {
    const A0: f32 = -25.1327419281005859375;
    const A1: f32 =  64.83582305908203125;
    const A2: f32 = -67.076629638671875;
    const A3: f32 =  38.495880126953125;
    const A4: f32 = -14.049663543701171875;
    const A5: f32 =  3.161602020263671875;

    // Evaluate g(x) = a5*x^10 + a4*x^8 + a3*x^6 + a2*x^4 + a1*x^2 + a0 via Horner's method
    let z = x*x;
    let b5 = A5;
    let b4 = b5*z + A4;
    let b3 = b4*z + A3;
    let b2 = b3*z + A2;
    let b1 = b2*z + A1;
    let b0 = b1*z + A0;

    // f(x) = g(x) * (x-0.5) * (x+0.5) * x = g(x) * (z-0.25) * x
    b0 * (z-0.25) * x
}

/// Mixes the buffer with a complex oscillator at the given normalised
/// frequency offset, where 1.0 corresponds to the sampling frequency.
/// `sample_offset` is the index of the first sample relative to the start
/// of the oscillator, so disjoint chunks of one symbol stream can be
/// rotated independently by worker threads.
pub fn apply_pll(x: &mut [Complex32], freq_offset_normalised: f32, sample_offset: usize) {
    x.iter_mut().enumerate().for_each(|(i, x)| {
        let dt = ((i + sample_offset) as f32)*freq_offset_normalised;
        // translate to [-0.5,+0.5] without calling the slower f32::round()
        let dt_offset = (dt.abs() - 0.5).ceil()*dt.signum();
        let dt = dt - dt_offset;
        let sin = fast_sine(dt);        // occupies [-0.5,+0.5]
        let cos = fast_sine(dt + 0.25); // occupies [-0.25,+0.75]
        *x *= Complex32::new(cos, sin);
    });
}

/// Phase error between the cyclic prefix and the symbol tail it repeats.
/// A residual fractional frequency offset shows up as a constant phase
/// rotation over one FFT period.
pub fn calculate_cyclic_phase_error(x: &[Complex32], prefix_length: usize) -> f32 {
    let length = x.len();
    assert!(length >= prefix_length);

    let prefix = &x[..prefix_length];
    let suffix = &x[length - prefix_length..];

    let conjugate_sum: Complex32 = prefix
        .iter()
        .zip(suffix.iter())
        .map(|(p, s)| s * p.conj())
        .sum();

    conjugate_sum.im.atan2(conjugate_sum.re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn fast_sine_matches_reference_inside_domain() {
        for i in -75..=75 {
            let x = (i as f32) / 100.0;
            let expected = (2.0 * PI * x).sin();
            assert_relative_eq!(fast_sine(x), expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn pll_rotates_at_requested_rate() {
        let freq = 0.01;
        let mut x = vec![Complex32::new(1.0, 0.0); 32];
        apply_pll(&mut x, freq, 0);
        for (i, value) in x.iter().enumerate() {
            let expected = 2.0 * PI * freq * (i as f32);
            let got = value.im.atan2(value.re);
            // compare on the unit circle to dodge wrap-around
            assert_relative_eq!(got.cos(), expected.cos(), epsilon = 1e-3);
            assert_relative_eq!(got.sin(), expected.sin(), epsilon = 1e-3);
        }
    }

    #[test]
    fn pll_chunks_agree_with_whole_buffer() {
        let freq = 0.003;
        let make = |n: usize| (0..n).map(|i| Complex32::new(i as f32, 1.0)).collect::<Vec<_>>();
        let mut whole = make(64);
        apply_pll(&mut whole, freq, 0);

        let mut split = make(64);
        let (a, b) = split.split_at_mut(40);
        apply_pll(a, freq, 0);
        apply_pll(b, freq, 40);
        for (x, y) in whole.iter().zip(split.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-3);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-3);
        }
    }

    #[test]
    fn cyclic_phase_error_detects_rotation() {
        // A pure tone whose period divides the FFT length has zero error
        let nb_fft = 64;
        let prefix = 16;
        let mut symbol = vec![Complex32::default(); nb_fft + prefix];
        for (i, value) in symbol.iter_mut().enumerate() {
            let phase = 2.0 * PI * 4.0 * (i as f32) / (nb_fft as f32);
            *value = Complex32::new(phase.cos(), phase.sin());
        }
        let error = calculate_cyclic_phase_error(&symbol, prefix);
        assert_relative_eq!(error, 0.0, epsilon = 1e-3);

        // A fractional carrier offset shows up as the expected phase slip
        let offset = 0.25 / (nb_fft as f32);
        apply_pll(&mut symbol, offset, 0);
        let error = calculate_cyclic_phase_error(&symbol, prefix);
        assert_relative_eq!(error, 2.0 * PI * offset * (nb_fft as f32), epsilon = 1e-2);
    }
}
