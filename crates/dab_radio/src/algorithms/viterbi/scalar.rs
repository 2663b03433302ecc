use super::branch_table::{BRANCH_TABLE, STRIDE};
use super::core::{ViterbiCore, RENORMALISATION_THRESHOLD, SOFT_DECISION_MAX_ERROR, TOTAL_STATE_BITS};
use super::{CODE_RATE, NUM_STATES};

impl ViterbiCore {
    /// Portable butterfly update. Processes `CODE_RATE` symbols per
    /// decoded bit. Saturating arithmetic mirrors the SIMD variant.
    pub(super) fn update_scalar(&mut self, symbols: &[i16]) {
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
                bfly(step, old_metric, new_metric)
            };

            self.decisions[self.curr_decoded_bit] = decision;
            self.curr_decoded_bit += 1;

            if self.metrics[self.curr_metric_index][0] >= RENORMALISATION_THRESHOLD {
                self.renormalise_scalar();
            }
            self.swap_metrics();
        }
    }

    /// Normalises error metrics so the minimum value is 0, tracking the
    /// subtracted amount as an absolute error bias.
    fn renormalise_scalar(&mut self) {
        let metric = &mut self.metrics[self.curr_metric_index];
        let min = *metric.iter().min().expect("metric bank is never empty");
        for value in metric.iter_mut() {
            *value -= min;
        }
        self.renormalisation_bias += u64::from(min);
    }
}

/// Processes CODE_RATE symbols for one decoded bit, returning the packed
/// predecessor decisions for all states.
#[inline]
fn bfly(symbols: &[i16], old_metric: &[u16; NUM_STATES], new_metric: &mut [u16; NUM_STATES]) -> u64 {
    let mut decision: u64 = 0;
    for curr_state in 0..STRIDE {
        // error of this butterfly's branch against the received symbols
        let mut total_error: u16 = 0;
        for (i, &symbol) in symbols.iter().enumerate() {
            let expected = BRANCH_TABLE.row(i)[curr_state];
            let error = (i32::from(expected) - i32::from(symbol)).unsigned_abs() as u16;
            total_error += error;
        }
        debug_assert!(total_error <= SOFT_DECISION_MAX_ERROR);

        // Both predecessors differ in every coded symbol, so the opposite
        // branch error is the complement against the maximum.
        let m_total_error = SOFT_DECISION_MAX_ERROR - total_error;
        let m0 = old_metric[curr_state].saturating_add(total_error);
        let m1 = old_metric[curr_state + NUM_STATES/2].saturating_add(m_total_error);
        let m2 = old_metric[curr_state].saturating_add(m_total_error);
        let m3 = old_metric[curr_state + NUM_STATES/2].saturating_add(total_error);
        let d0 = m0 > m1;
        let d1 = m2 > m3;

        new_metric[2*curr_state]     = if d0 { m1 } else { m0 };
        new_metric[2*curr_state + 1] = if d1 { m3 } else { m2 };

        let bits = (d0 as u64) | ((d1 as u64) << 1);
        decision |= bits << (2*curr_state);
    }
    decision
}
