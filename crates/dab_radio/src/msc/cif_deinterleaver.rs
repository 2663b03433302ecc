//! DOC: ETSI EN 300 401
//! Clause 12 - Time interleaving
//!
//! Each subchannel bit is delayed by 0..15 CIFs according to the bit
//! reversed value of its index modulo 16. The deinterleaver keeps the
//! last 16 received CIF slices of the subchannel and reassembles one
//! logical frame once every delay has been satisfied.

/// Delay in CIFs applied to bit index i mod 16 (4 bit reversal).
pub const INTERLEAVE_DELAYS: [usize; 16] = [0, 8, 4, 12, 2, 10, 6, 14, 1, 9, 5, 13, 3, 11, 7, 15];

const RING_DEPTH: usize = 16;

pub struct CifDeinterleaver {
    /// Ring of the most recent received subchannel slices, indexed by
    /// CIF counter modulo 16.
    ring: Vec<Vec<i8>>,
    nb_subchannel_bits: usize,
    total_cifs_received: u64,
    output: Vec<i8>,
}

impl CifDeinterleaver {
    pub fn new(nb_subchannel_bits: usize) -> Self {
        Self {
            ring: (0..RING_DEPTH).map(|_| vec![0i8; nb_subchannel_bits]).collect(),
            nb_subchannel_bits,
            total_cifs_received: 0,
            output: vec![0i8; nb_subchannel_bits],
        }
    }

    pub fn reset(&mut self) {
        self.total_cifs_received = 0;
    }

    /// Consumes the subchannel's soft bits for one received CIF.
    /// Returns the deinterleaved logical frame once 16 CIFs have been
    /// seen; the first 15 calls prime the ring and yield nothing.
    pub fn push_cif(&mut self, soft_bits: &[i8]) -> Option<&[i8]> {
        assert!(soft_bits.len() == self.nb_subchannel_bits);

        let ring_index = (self.total_cifs_received as usize) % RING_DEPTH;
        self.ring[ring_index].copy_from_slice(soft_bits);
        self.total_cifs_received += 1;

        if self.total_cifs_received < RING_DEPTH as u64 {
            return None;
        }

        // logical frame f needs received CIFs f .. f+15; the newest
        // received CIF c completes frame f = c-15
        let logical_frame = (self.total_cifs_received as usize) - RING_DEPTH;
        for (i, out) in self.output.iter_mut().enumerate() {
            let delay = INTERLEAVE_DELAYS[i % RING_DEPTH];
            let source = (logical_frame + delay) % RING_DEPTH;
            *out = self.ring[source][i];
        }
        Some(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Interleaves logical frames the way a transmitter would: the bit at
    /// index i of logical frame f lands in transmitted CIF f + delay(i).
    fn interleave(frames: &[Vec<i8>]) -> Vec<Vec<i8>> {
        let nb_bits = frames[0].len();
        let total = frames.len();
        let mut cifs = vec![vec![0i8; nb_bits]; total + RING_DEPTH];
        for (f, frame) in frames.iter().enumerate() {
            for (i, &bit) in frame.iter().enumerate() {
                let delay = INTERLEAVE_DELAYS[i % RING_DEPTH];
                cifs[f + delay][i] = bit;
            }
        }
        cifs
    }

    #[test]
    fn round_trips_interleaved_frames() {
        let nb_bits = 64;
        let frames: Vec<Vec<i8>> = (0..8)
            .map(|f| (0..nb_bits).map(|i| ((f * 31 + i * 7) % 255) as i8).collect())
            .collect();
        let cifs = interleave(&frames);

        let mut deinterleaver = CifDeinterleaver::new(nb_bits);
        let mut recovered: Vec<Vec<i8>> = Vec::new();
        for cif in &cifs {
            if let Some(frame) = deinterleaver.push_cif(cif) {
                recovered.push(frame.to_vec());
            }
        }

        // priming swallows the first 15 CIFs
        assert_eq!(recovered.len(), cifs.len() - (RING_DEPTH - 1));
        for (f, frame) in frames.iter().enumerate() {
            assert_eq!(&recovered[f], frame, "frame {}", f);
        }
    }

    #[test]
    fn delays_are_a_bit_reversal_permutation() {
        let mut seen = [false; 16];
        for (i, &delay) in INTERLEAVE_DELAYS.iter().enumerate() {
            let reversed = (i as u8).reverse_bits() >> 4;
            assert_eq!(delay, reversed as usize);
            assert!(!seen[delay]);
            seen[delay] = true;
        }
    }
}
