//! SSE4.1 butterfly: 8 lanes of 16 bit metrics per vector, so each
//! decoding step runs 4 vector butterflies instead of 32 scalar ones.
//! Semantically equivalent to the scalar path; only the survivor chosen
//! on exact metric ties can differ, which never changes the decoded bits'
//! validity.

use super::branch_table::BRANCH_TABLE;
use super::core::{ViterbiCore, RENORMALISATION_THRESHOLD, SOFT_DECISION_MAX_ERROR, TOTAL_STATE_BITS};
use super::{CODE_RATE, NUM_STATES};
use core::arch::x86_64::*;

/// Number of u16 lanes per vector.
const LANES: usize = 8;
/// Vector butterflies per decoding step.
const VECTOR_STRIDE: usize = NUM_STATES / 2 / LANES;

impl ViterbiCore {
    /// Caller must have verified `sse4.1` support at runtime.
    #[target_feature(enable = "sse4.1")]
    pub(super) unsafe fn update_sse(&mut self, symbols: &[i16]) {
        assert!(symbols.len() % CODE_RATE == 0);
        let total_decoded_bits = symbols.len() / CODE_RATE;
        let max_decoded_bits = self.get_traceback_length() + TOTAL_STATE_BITS;
        assert!(total_decoded_bits + self.curr_decoded_bit <= max_decoded_bits);

        for step in symbols.chunks_exact(CODE_RATE) {
            let decision = {
                let (bank_0, bank_1) = self.metrics.split_at_mut(1);
                let (old_metric, new_metric) = match self.curr_metric_index {
                    0 => (&bank_1[0], &mut bank_0[0]),
                    _ => (&bank_0[0], &mut bank_1[0]),
                };
                bfly_sse(step, old_metric, new_metric)
            };

            self.decisions[self.curr_decoded_bit] = decision;
            self.curr_decoded_bit += 1;

            if self.metrics[self.curr_metric_index][0] >= RENORMALISATION_THRESHOLD {
                renormalise_sse(
                    &mut self.metrics[self.curr_metric_index],
                    &mut self.renormalisation_bias,
                );
            }
            self.swap_metrics();
        }
    }
}

#[target_feature(enable = "sse4.1")]
unsafe fn bfly_sse(symbols: &[i16], old_metric: &[u16; NUM_STATES], new_metric: &mut [u16; NUM_STATES]) -> u64 {
    let max_error = _mm_set1_epi16(SOFT_DECISION_MAX_ERROR as i16);
    let mut vector_symbols = [_mm_setzero_si128(); CODE_RATE];
    for (vector, &symbol) in vector_symbols.iter_mut().zip(symbols.iter()) {
        *vector = _mm_set1_epi16(symbol);
    }

    let old_ptr = old_metric.as_ptr();
    let new_ptr = new_metric.as_mut_ptr();
    let mut decision: u64 = 0;

    for b in 0..VECTOR_STRIDE {
        // total error across the code rate symbols for 8 butterflies
        let mut total_error = _mm_setzero_si128();
        for (r, vector_symbol) in vector_symbols.iter().enumerate() {
            let branch = _mm_loadu_si128(BRANCH_TABLE.row(r).as_ptr().add(LANES * b) as *const __m128i);
            let error = _mm_abs_epi16(_mm_subs_epi16(branch, *vector_symbol));
            total_error = _mm_adds_epu16(total_error, error);
        }

        // butterfly update with saturating adds
        let m_total_error = _mm_subs_epu16(max_error, total_error);
        let old_lo = _mm_loadu_si128(old_ptr.add(LANES * b) as *const __m128i);
        let old_hi = _mm_loadu_si128(old_ptr.add(NUM_STATES / 2 + LANES * b) as *const __m128i);
        let m0 = _mm_adds_epu16(old_lo, total_error);
        let m1 = _mm_adds_epu16(old_hi, m_total_error);
        let m2 = _mm_adds_epu16(old_lo, m_total_error);
        let m3 = _mm_adds_epu16(old_hi, total_error);
        let survivor0 = _mm_min_epu16(m0, m1);
        let survivor1 = _mm_min_epu16(m2, m3);
        let decision0 = _mm_cmpeq_epi16(survivor0, m1);
        let decision1 = _mm_cmpeq_epi16(survivor1, m3);

        // interleave survivors into the even/odd successor states
        _mm_storeu_si128(
            new_ptr.add(2 * LANES * b) as *mut __m128i,
            _mm_unpacklo_epi16(survivor0, survivor1),
        );
        _mm_storeu_si128(
            new_ptr.add(2 * LANES * b + LANES) as *mut __m128i,
            _mm_unpackhi_epi16(survivor0, survivor1),
        );

        // pack both decision sets into 8 bytes each, interleave and
        // compress into 16 bits matching the scalar bit order
        let packed = _mm_movemask_epi8(_mm_unpacklo_epi8(
            _mm_packs_epi16(decision0, _mm_setzero_si128()),
            _mm_packs_epi16(decision1, _mm_setzero_si128()),
        ));
        decision |= ((packed as u32 as u64) & 0xFFFF) << (2 * LANES * b);
    }

    decision
}

#[target_feature(enable = "sse4.1")]
unsafe fn renormalise_sse(metric: &mut [u16; NUM_STATES], renormalisation_bias: &mut u64) {
    let ptr = metric.as_mut_ptr();
    let total_vectors = NUM_STATES / LANES;

    let mut adjustv = _mm_loadu_si128(ptr as *const __m128i);
    for i in 1..total_vectors {
        adjustv = _mm_min_epu16(adjustv, _mm_loadu_si128(ptr.add(LANES * i) as *const __m128i));
    }

    // fold halves onto each other until lane 0 holds the global minimum
    adjustv = _mm_min_epu16(adjustv, _mm_srli_si128(adjustv, 8));
    adjustv = _mm_min_epu16(adjustv, _mm_srli_si128(adjustv, 4));
    adjustv = _mm_min_epu16(adjustv, _mm_srli_si128(adjustv, 2));
    let min = (_mm_cvtsi128_si32(adjustv) & 0xFFFF) as u16;

    let vmin = _mm_set1_epi16(min as i16);
    for i in 0..total_vectors {
        let chunk = ptr.add(LANES * i) as *mut __m128i;
        _mm_storeu_si128(chunk, _mm_subs_epu16(_mm_loadu_si128(chunk), vmin));
    }

    *renormalisation_bias += u64::from(min);
}
