use crate::circular_bucket::CircularBucket;
use crate::dsp::{
    apply_pll, calculate_cyclic_phase_error, calculate_l1_average, calculate_magnitude_spectrum,
    calculate_relative_phase,
};
use crate::error::OfdmConfigError;
use crate::linear_bucket::LinearBucket;
use crate::ofdm_parameters::OfdmParameters;
use itertools::izip;
use num::complex::Complex32;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::cmp::Ordering;
use std::sync::Arc;

/// Largest positive soft decision magnitude handed to the Viterbi decoder.
pub const SOFT_DECISION_HIGH: i8 = 127;

#[derive(Debug, Clone)]
pub struct OfdmDemodulatorSettings {
    /// The rate at which to update the L1 power average of the signal.
    /// This is a number from 0 to 1 where 1 is the fastest update rate.
    pub null_power_update_beta: f32,
    /// The number of samples in a block to calculate the L1 power average.
    pub null_power_total_samples: usize,
    /// The number of blocks we stride where we only analyse one block.
    pub null_power_decimation_factor: usize,
    /// The amount of the L1 power average that the signal needs to fall below to detect the start of the NULL symbol.
    pub null_power_threshold_start: f32,
    /// The amount of the L1 power average that the signal needs to rise above to detect the end of the NULL symbol.
    pub null_power_threshold_end: f32,
    /// The rate to update the fine frequency offset during each OFDM frame.
    /// Fine frequency offsets are smaller than the frequency spacing of one FFT bin.
    pub fine_frequency_update_beta: f32,
    /// Whether we perform coarse frequency correction.
    /// Coarse frequency offsets are larger than the frequency spacing of one FFT bin.
    pub coarse_frequency_is_enabled: bool,
    /// The maximum coarse frequency offset the correction step searches for,
    /// normalised so 1 is half the sampling frequency.
    pub coarse_frequency_max_range: f32,
    /// The rate to update the coarse frequency offset once it has stabilised.
    pub coarse_frequency_slow_update_beta: f32,
    /// Required height in dB of the fine time impulse peak over the
    /// impulse response average for the PRS lock to be considered valid.
    pub fine_time_impulse_peak_threshold_db: f32,
    /// How strongly an impulse peak is discounted by its distance from the
    /// expected PRS position. Prevents spurious locks onto far away noise
    /// peaks while we are still acquiring.
    pub fine_time_impulse_peak_distance_probability: f32,
    /// Number of worker threads for per-symbol processing. 0 selects the
    /// available hardware parallelism.
    pub total_threads: usize,
}

impl Default for OfdmDemodulatorSettings {
    fn default() -> Self {
        Self {
            null_power_update_beta: 0.95,
            null_power_total_samples: 100,
            null_power_decimation_factor: 5,
            null_power_threshold_start: 0.35,
            null_power_threshold_end: 0.75,
            fine_frequency_update_beta: 0.95,
            coarse_frequency_is_enabled: true,
            coarse_frequency_max_range: 0.1,
            coarse_frequency_slow_update_beta: 0.1,
            fine_time_impulse_peak_threshold_db: 20.0,
            fine_time_impulse_peak_distance_probability: 0.15,
            total_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfdmDemodulatorState {
    /// Finding the NULL symbol by analysing the average L1 power of blocks in the signal.
    FindingNullPowerDip,
    /// Once the NULL symbol has been detected we read the NULL and PRS symbol.
    ReadingNullAndPrs,
    /// Compensating for large frequency offsets that are greater than one FFT bin.
    RunningCoarseFrequencySync,
    /// Compensating for sample offsets in the detected NULL and PRS symbols.
    /// This step can fail if the impulse peak is too weak, in which case the
    /// demodulator falls back to NULL power detection.
    RunningFineTimeSync,
    /// Reading in the rest of the OFDM frame.
    ReadingSymbols,
    /// DQPSK demodulation, fine frequency compensation and carrier remapping.
    ProcessingSymbols,
}

type FrameSink = Box<dyn FnMut(&[i8]) + Send>;

pub struct OfdmDemodulator {
    pub state: OfdmDemodulatorState,
    pub settings: OfdmDemodulatorSettings,
    pub params: OfdmParameters,
    /// The number of OFDM frames read successfully.
    pub total_frames_read: u64,
    /// The number of frames abandoned because the detected NULL and PRS
    /// symbols were too offset in time.
    pub total_frames_desync: u64,
    is_found_coarse_frequency_offset: bool,
    /// The current coarse frequency offset normalised to the sampling frequency.
    pub coarse_frequency_offset: f32,
    /// The current fine frequency offset normalised to the sampling frequency.
    pub fine_frequency_offset: f32,
    /// The number of samples the incoming OFDM frame is offset by in time.
    pub fine_time_offset: isize,
    is_null_start_found: bool,
    is_null_end_found: bool,
    /// The current L1 signal average of the receiving signal.
    pub signal_l1_average: f32,
    // fft
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    pool: rayon::ThreadPool,
    temp_fft_buffer: Vec<Complex32>,
    // reference data
    carrier_mapper_data: Vec<usize>,
    correlation_prs_fft_data: Vec<Complex32>,
    correlation_prs_time_data: Vec<Complex32>,
    // buffers
    null_power_dip_buffer: CircularBucket<Complex32>,
    null_prs_buffer: LinearBucket<Complex32>,
    /// Fine time impulse response. One dominant peak with small sidelobes
    /// marks the start of the PRS.
    pub fine_time_impulse_response_buffer: Vec<f32>,
    /// Coarse frequency impulse response. The largest peak indicates the
    /// integer-bin carrier offset; sample spacing is one FFT bin.
    pub coarse_frequency_impulse_response_buffer: Vec<f32>,
    data_time_buffer: LinearBucket<Complex32>,
    data_fft_buffer: Vec<Complex32>,
    data_dqpsk_buffer: Vec<Complex32>,
    data_out_bits_buffer: Vec<i8>,
    frame_sinks: Vec<FrameSink>,
}

impl OfdmDemodulator {
    /// Builds a demodulator for the given frame structure using the
    /// reference carrier permutation and PRS FFT tables. All worker
    /// threads are created here and reused for every frame.
    pub fn new(
        params: &OfdmParameters,
        carrier_mapper: &[usize],
        prs_fft: &[Complex32],
        settings: OfdmDemodulatorSettings,
    ) -> Result<Self, OfdmConfigError> {
        if carrier_mapper.len() != params.nb_fft_data_carriers {
            return Err(OfdmConfigError::CarrierMapLengthMismatch {
                expected: params.nb_fft_data_carriers,
                got: carrier_mapper.len(),
            });
        }
        if prs_fft.len() != params.nb_fft {
            return Err(OfdmConfigError::PrsLengthMismatch {
                expected: params.nb_fft,
                got: prs_fft.len(),
            });
        }
        for (index, &value) in carrier_mapper.iter().enumerate() {
            if value >= params.nb_fft_data_carriers {
                return Err(OfdmConfigError::CarrierMapOutOfRange {
                    index,
                    value,
                    limit: params.nb_fft_data_carriers,
                });
            }
        }

        let total_threads = match settings.total_threads {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(total_threads)
            .build()
            .map_err(|err| OfdmConfigError::ThreadPool(err.to_string()))?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(params.nb_fft);
        let ifft = planner.plan_fft_inverse(params.nb_fft);

        let mut demodulator = Self {
            state: OfdmDemodulatorState::FindingNullPowerDip,
            settings,
            params: *params,
            total_frames_read: 0,
            total_frames_desync: 0,
            is_found_coarse_frequency_offset: false,
            coarse_frequency_offset: 0.0,
            fine_frequency_offset: 0.0,
            fine_time_offset: 0,
            is_null_start_found: false,
            is_null_end_found: false,
            signal_l1_average: 0.0,
            fft,
            ifft,
            pool,
            carrier_mapper_data: carrier_mapper.to_vec(),
            correlation_prs_fft_data: vec![Complex32::default(); params.nb_fft],
            correlation_prs_time_data: vec![Complex32::default(); params.nb_fft],
            null_power_dip_buffer: CircularBucket::new(params.nb_null_period),
            null_prs_buffer: LinearBucket::new(params.nb_null_period + params.nb_symbol_period),
            fine_time_impulse_response_buffer: vec![0.0; params.nb_fft],
            coarse_frequency_impulse_response_buffer: vec![0.0; params.nb_fft],
            temp_fft_buffer: vec![Complex32::default(); params.nb_fft],
            data_time_buffer: LinearBucket::new(params.nb_input_samples),
            data_fft_buffer: vec![Complex32::default(); params.nb_symbols * params.nb_fft],
            data_dqpsk_buffer: vec![Complex32::default(); params.nb_output_samples],
            data_out_bits_buffer: vec![0i8; params.nb_output_bits],
            frame_sinks: vec![],
        };
        demodulator.build_correlation_references(prs_fft);
        Ok(demodulator)
    }

    fn build_correlation_references(&mut self, prs_fft: &[Complex32]) {
        // Correlation in either time or frequency domain requires the
        // conjugate product in the opposite domain.
        self.correlation_prs_time_data.copy_from_slice(prs_fft);
        calculate_relative_phase(&mut self.correlation_prs_time_data);
        self.ifft.process(&mut self.correlation_prs_time_data);
        // used in coarse frequency correction
        for value in &mut self.correlation_prs_time_data {
            *value = value.conj();
        }
        // used in fine time correction
        for (reference, value) in izip!(self.correlation_prs_fft_data.iter_mut(), prs_fft.iter()) {
            *reference = value.conj();
        }
    }

    /// Registers a synchronous sink invoked with the soft decision bits of
    /// each successfully demodulated OFDM frame. Bits are signed 8 bit
    /// values between -127 and +127, laid out per DQPSK symbol as all real
    /// components followed by all imaginary components.
    pub fn subscribe_frame(&mut self, sink: impl FnMut(&[i8]) + Send + 'static) {
        self.frame_sinks.push(Box::new(sink));
    }

    /// Consumes an arbitrarily sized chunk of complex baseband samples.
    /// Frame sinks are invoked zero or more times. Under-run is not a
    /// failure; the state machine is preserved across calls.
    pub fn process(&mut self, buf: &[Complex32]) {
        self.update_signal_power_average(buf);

        let mut curr_buf = buf;
        while !curr_buf.is_empty() {
            let total_read = match self.state {
                OfdmDemodulatorState::FindingNullPowerDip    =>   self.find_null_power_dip(curr_buf),
                OfdmDemodulatorState::ReadingNullAndPrs      =>   self.read_null_prs(curr_buf),
                OfdmDemodulatorState::RunningCoarseFrequencySync => { self.run_coarse_frequency_sync(); 0 },
                OfdmDemodulatorState::RunningFineTimeSync    => { self.run_fine_time_sync(); 0 },
                OfdmDemodulatorState::ReadingSymbols         =>   self.read_symbols(curr_buf),
                OfdmDemodulatorState::ProcessingSymbols      => { self.process_symbols(); 0 },
            };
            curr_buf = &curr_buf[total_read..];
        }
    }

    /// Drops all accumulated synchronisation state and returns to
    /// acquisition. Safe to call at any time; frame counters are kept.
    pub fn reset(&mut self) {
        self.state = OfdmDemodulatorState::FindingNullPowerDip;
        self.null_prs_buffer.reset();
        self.null_power_dip_buffer.reset();
        self.data_time_buffer.reset();
        self.is_null_start_found = false;
        self.is_null_end_found = false;
        self.signal_l1_average = 0.0;
        self.is_found_coarse_frequency_offset = false;
        self.fine_frequency_offset = 0.0;
        self.coarse_frequency_offset = 0.0;
        self.fine_time_offset = 0;
    }

    fn reset_from_desync(&mut self) {
        // An incorrect fine frequency estimate degrades the next impulse
        // response, so sync state is dropped wholesale.
        tracing::debug!(target: "ofdm-demod", "fine time impulse peak too weak, resyncing");
        self.reset();
    }

    fn find_null_power_dip(&mut self, buf: &[Complex32]) -> usize {
        // Clause 3.12.2 - Frame synchronisation using power detection
        // Run when we have no estimate of the PRS position. This happens
        // when the demodulator starts and after a failed fine time sync.
        let null_start_threshold = self.signal_l1_average * self.settings.null_power_threshold_start;
        let null_end_threshold   = self.signal_l1_average * self.settings.null_power_threshold_end;

        // analyse the average power of the signal in blocks
        let block_size = self.settings.null_power_total_samples;
        let mut total_read = 0;
        for block in buf.chunks_exact(block_size) {
            let l1_average = calculate_l1_average(block);
            total_read += block_size;
            if self.is_null_start_found {
                if l1_average > null_end_threshold {
                    self.is_null_end_found = true;
                    break;
                }
            } else if l1_average < null_start_threshold {
                self.is_null_start_found = true;
            }
        }

        // Ignore the remaining buffer until there are enough samples for analysis
        if !self.is_null_end_found {
            self.null_power_dip_buffer.consume_overwrite(buf);
            return buf.len();
        }

        // Copy the retained null symbol into the correlation window. The
        // captured null may already contain part of the PRS, which
        // guarantees the full PRS start survives fine time sync.
        let consumed_blocks = &buf[..total_read];
        self.null_power_dip_buffer.consume_overwrite(consumed_blocks);
        self.null_prs_buffer.reset();
        self.null_prs_buffer.consume_from_iterator(self.null_power_dip_buffer.iter().copied());

        self.is_null_start_found = false;
        self.is_null_end_found = false;
        self.null_power_dip_buffer.reset();
        self.state = OfdmDemodulatorState::ReadingNullAndPrs;

        total_read
    }

    fn read_null_prs(&mut self, buf: &[Complex32]) -> usize {
        let total_read = self.null_prs_buffer.consume(buf);
        if self.null_prs_buffer.is_full() {
            self.state = OfdmDemodulatorState::RunningCoarseFrequencySync;
        }
        total_read
    }

    fn run_coarse_frequency_sync(&mut self) {
        // Clause 3.13.2 - Integral frequency offset estimation
        if !self.settings.coarse_frequency_is_enabled {
            self.coarse_frequency_offset = 0.0;
            self.state = OfdmDemodulatorState::RunningFineTimeSync;
            return;
        }

        let prs = &self.null_prs_buffer[span(self.params.nb_null_period, self.params.nb_symbol_period)];
        let prs_fft = &prs[self.params.nb_cyclic_prefix..];

        // To mitigate the effect of phase shifts we correlate the complex
        // difference between consecutive FFT bins instead of the bins
        // themselves: arg(~z0*z1) = arg(z1)-arg(z0)
        self.temp_fft_buffer.copy_from_slice(prs_fft);
        self.fft.process(&mut self.temp_fft_buffer);
        calculate_relative_phase(&mut self.temp_fft_buffer);
        self.ifft.process(&mut self.temp_fft_buffer);

        // Correlation in frequency domain is multiplication in time domain.
        // The PRS time reference was conjugated at construction.
        for (x, y) in izip!(
            self.correlation_prs_time_data.iter(),
            self.temp_fft_buffer.iter_mut(),
        ) {
            *y *= *x;
        }
        self.fft.process(&mut self.temp_fft_buffer);
        calculate_magnitude_spectrum(&self.temp_fft_buffer, &mut self.coarse_frequency_impulse_response_buffer);

        assert!(self.settings.coarse_frequency_max_range < 1.0);
        let dc_bin = (self.params.nb_fft/2) as i32;
        let max_carrier_offset_bins = (0.5 * self.settings.coarse_frequency_max_range * self.params.nb_fft as f32).floor() as i32;
        let carrier_offset_bin = (-max_carrier_offset_bins..=max_carrier_offset_bins)
            .map(|offset| {
                let fft_bin = (offset + dc_bin) as usize;
                (offset, self.coarse_frequency_impulse_response_buffer[fft_bin])
            })
            .max_by(|(_, x), (_, y)| x.partial_cmp(y).unwrap_or(Ordering::Less))
            .map(|(offset, _)| offset)
            .unwrap_or(0);

        let current_coarse_frequency_offset = (-carrier_offset_bin as f32) / (self.params.nb_fft as f32);
        let delta_coarse_frequency_offset = current_coarse_frequency_offset - self.coarse_frequency_offset;

        // Large jumps are applied immediately; small refinements are
        // low-pass filtered so a noisy estimate cannot jitter the carrier.
        let large_offset_threshold = 1.5 / (self.params.nb_fft as f32);
        let is_large_offset = delta_coarse_frequency_offset.abs() > large_offset_threshold;
        let is_fast_update = is_large_offset || !self.is_found_coarse_frequency_offset;
        let update_beta = if is_fast_update { 1.0 } else { self.settings.coarse_frequency_slow_update_beta };
        let delta = update_beta * delta_coarse_frequency_offset;

        self.is_found_coarse_frequency_offset = true;
        self.coarse_frequency_offset += delta;
        self.update_fine_frequency_offset(-delta);
        self.state = OfdmDemodulatorState::RunningFineTimeSync;
    }

    fn run_fine_time_sync(&mut self) {
        let prs_data = &self.null_prs_buffer[span(self.params.nb_null_period, self.params.nb_fft)];

        let total_frequency_offset = self.coarse_frequency_offset + self.fine_frequency_offset;
        self.temp_fft_buffer.copy_from_slice(prs_data);
        apply_pll(&mut self.temp_fft_buffer, total_frequency_offset, 0);

        // Impulse correlation in time domain via multiplication in the
        // frequency domain. The PRS FFT reference was conjugated at construction.
        self.fft.process(&mut self.temp_fft_buffer);
        for (x, y) in izip!(
            self.correlation_prs_fft_data.iter(),
            self.temp_fft_buffer.iter_mut(),
        ) {
            *y *= *x;
        }
        self.ifft.process(&mut self.temp_fft_buffer);
        for (x, y) in izip!(
            self.temp_fft_buffer.iter(),
            self.fine_time_impulse_response_buffer.iter_mut(),
        ) {
            *y = x.norm().log10() * 20.0;
        }

        let (impulse_peak_index, impulse_peak_value) = self.fine_time_impulse_response_buffer
            .iter()
            .enumerate()
            .map(|(i, peak_value)| {
                // The correlation peak should be near the expected PRS
                // position. While still locking on, frequency offsets smear
                // the impulse response into several peaks, so peaks are
                // discounted by their distance from the expectation.
                let expected_peak_x = self.params.nb_cyclic_prefix;
                let distance_from_expectation = (expected_peak_x as i32 - i as i32).abs();
                let norm_distance = (distance_from_expectation as f32) / (self.params.nb_symbol_period as f32);
                let decay_weight = 1.0 - self.settings.fine_time_impulse_peak_distance_probability;
                let probability = 1.0 - decay_weight * norm_distance;
                (i, probability * peak_value)
            })
            .max_by(|(_, x), (_, y)| x.partial_cmp(y).unwrap_or(Ordering::Less))
            .expect("The fine time impulse buffer cannot be empty");

        let impulse_sum: f32 = self.fine_time_impulse_response_buffer.iter().sum();
        let impulse_average = impulse_sum / (self.params.nb_fft as f32);

        // An insufficiently powerful main lobe means a severe desync;
        // restart acquisition from power detection.
        let impulse_peak_height = impulse_peak_value - impulse_average;
        if impulse_peak_height < self.settings.fine_time_impulse_peak_threshold_db {
            self.reset_from_desync();
            self.total_frames_desync += 1;
            return;
        }

        // | [NULL] | [Cyclic prefix] | [PRS FFT]
        // The correlation lobe sits just after the cyclic prefix; adjust
        // back to the start of the prefix.
        let prs_start_offset = impulse_peak_index as isize - self.params.nb_cyclic_prefix as isize;
        let prs_start_index = isize::max(self.params.nb_null_period as isize + prs_start_offset, 0) as usize;
        let prs_length = isize::max(self.params.nb_symbol_period as isize - prs_start_offset, 0) as usize;
        let prs_partial_buffer = &self.null_prs_buffer[span(prs_start_index, prs_length)];

        self.data_time_buffer.reset();
        self.data_time_buffer.consume(prs_partial_buffer);

        self.null_prs_buffer.reset();
        self.fine_time_offset = prs_start_offset;
        self.state = OfdmDemodulatorState::ReadingSymbols;
    }

    fn read_symbols(&mut self, buf: &[Complex32]) -> usize {
        let total_read = self.data_time_buffer.consume(buf);
        if self.data_time_buffer.is_full() {
            self.state = OfdmDemodulatorState::ProcessingSymbols;
        }
        total_read
    }

    fn process_symbols(&mut self) {
        let params = self.params;

        // Keep the trailing null symbol so the next frame skips power detection
        let null_symbol_offset = params.nb_symbols * params.nb_symbol_period;
        let null_symbol = &self.data_time_buffer[span(null_symbol_offset, params.nb_null_period)];
        self.null_prs_buffer.reset();
        self.null_prs_buffer.consume(null_symbol);

        let net_frequency_offset = self.fine_frequency_offset + self.coarse_frequency_offset;
        let fft = &self.fft;
        let carrier_mapper = &self.carrier_mapper_data;
        let time_buffer = self.data_time_buffer.as_mut_slice();
        let fft_buffer = &mut self.data_fft_buffer;
        let dqpsk_buffer = &mut self.data_dqpsk_buffer;
        let out_bits_buffer = &mut self.data_out_bits_buffer;

        // Per-symbol processing is independent, so fan it out over the
        // worker pool. Each stage joins before the next begins.
        let average_phase_error = self.pool.install(|| {
            // Clause 3.13 - Frequency offset estimation and correction
            let total_phase_error: f32 = time_buffer[..params.nb_symbols * params.nb_symbol_period]
                .par_chunks_exact_mut(params.nb_symbol_period)
                .enumerate()
                .map(|(i, symbol)| {
                    apply_pll(symbol, net_frequency_offset, i * params.nb_symbol_period);
                    // Clause 3.13.1 - Fractional frequency offset estimation
                    calculate_cyclic_phase_error(symbol, params.nb_cyclic_prefix)
                })
                .sum();

            // Clause 3.14.2 - FFT
            fft_buffer
                .par_chunks_exact_mut(params.nb_fft)
                .enumerate()
                .for_each(|(i, fft_out)| {
                    let symbol_in = &time_buffer[chunk(i, params.nb_symbol_period)];
                    fft_out.copy_from_slice(&symbol_in[params.nb_cyclic_prefix..]);
                    fft.process(fft_out);
                });

            // Clause 3.15 - Differential demodulator
            dqpsk_buffer
                .par_chunks_exact_mut(params.nb_fft_data_carriers)
                .enumerate()
                .for_each(|(i, dqpsk_out)| {
                    let x0 = &fft_buffer[chunk(i, params.nb_fft)];
                    let x1 = &fft_buffer[chunk(i + 1, params.nb_fft)];
                    calculate_dqpsk(&params, x0, x1, dqpsk_out);
                });

            // Clause 3.16 - Data demapper
            out_bits_buffer
                .par_chunks_exact_mut(params.nb_fft_data_carriers * 2)
                .enumerate()
                .for_each(|(i, bits_out)| {
                    let dqpsk = &dqpsk_buffer[chunk(i, params.nb_fft_data_carriers)];
                    calculate_soft_bits(carrier_mapper, dqpsk, bits_out);
                });

            total_phase_error / (params.nb_symbols as f32)
        });

        // Clause 3.13.1 - Fractional frequency offset estimation
        {
            use std::f32::consts::PI;
            let fft_bin_spacing = 1.0 / (params.nb_fft as f32);
            let fine_frequency_error = fft_bin_spacing / 2.0 * average_phase_error / PI;
            let beta = self.settings.fine_frequency_update_beta;
            self.update_fine_frequency_offset(-beta * fine_frequency_error);
        }

        for sink in &mut self.frame_sinks {
            sink(&self.data_out_bits_buffer);
        }

        self.total_frames_read += 1;
        self.state = OfdmDemodulatorState::ReadingNullAndPrs;
    }

    fn update_signal_power_average(&mut self, buf: &[Complex32]) {
        let block_size = self.settings.null_power_total_samples;
        let stride = self.settings.null_power_decimation_factor;

        let (total_blocks, power_sum) = buf
            .chunks_exact(block_size)
            .enumerate()
            .filter(|(index, _)| index % stride == 0)
            .map(|(_, block)| calculate_l1_average(block))
            .fold((0usize, 0.0f32), |(total, sum), y| (total + 1, sum + y));

        if total_blocks == 0 {
            return;
        }

        let l1_average = power_sum / (total_blocks as f32);
        let beta = self.settings.null_power_update_beta;
        self.signal_l1_average = beta*l1_average + (1.0-beta)*self.signal_l1_average;
    }

    fn update_fine_frequency_offset(&mut self, delta: f32) {
        // The fine offset is bounded to half an FFT bin; anything larger
        // belongs to the coarse correction.
        let fft_bin_spacing = 1.0 / (self.params.nb_fft as f32) * 0.5;
        let fft_bin_margin = 1.01;
        let fft_bin_wrap = fft_bin_spacing * fft_bin_margin;
        self.fine_frequency_offset += delta;
        self.fine_frequency_offset %= fft_bin_wrap;
    }
}

fn calculate_dqpsk(params: &OfdmParameters, x0: &[Complex32], x1: &[Complex32], y: &mut [Complex32]) {
    let nb_fft = params.nb_fft;
    let nb_data = params.nb_fft_data_carriers;
    let nb_data_half = nb_data / 2;

    assert!(x0.len() == nb_fft);
    assert!(x1.len() == nb_fft);
    assert!(y.len() == nb_data);

    // x0,x1 are FFTs where bins [0,N) cover [0,Fs)
    // y is the DQPSK for the carriers [-Fa,0) then (0,Fa], skipping DC

    // [-Fa,0) maps to the top of the FFT
    for i in 0..nb_data_half {
        let fft_index = nb_fft - nb_data_half + i;
        y[i] = x0[fft_index] * x1[fft_index].conj();
    }
    // (0,Fa] sits just above DC
    for i in 0..nb_data_half {
        let fft_index = 1 + i;
        y[i + nb_data_half] = x0[fft_index] * x1[fft_index].conj();
    }
}

fn calculate_soft_bits(carrier_mapper: &[usize], x: &[Complex32], y: &mut [i8]) {
    assert!(carrier_mapper.len() == x.len());
    assert!(x.len() * 2 == y.len());

    let length = carrier_mapper.len();

    // Clause 3.16 - Data demapper
    for i in 0..length {
        let mut vec = x[carrier_mapper[i]];

        // Normalise by the L-infinity norm so that real=imag produces
        // full-scale soft bits on both axes, unlike the L2 norm which
        // would scale both down by 0.707.
        let amplitude = vec.re.abs().max(vec.im.abs());
        vec /= amplitude;

        y[i]          = quantise_to_soft_bit( vec.re);
        y[i + length] = quantise_to_soft_bit(-vec.im);
    }
}

#[inline(always)]
fn quantise_to_soft_bit(x: f32) -> i8 {
    // Clause 3.4.2 - QPSK symbol mapper
    // phi = (1-2*b0) + (1-2*b1)*1j, so b = (1-x)/2.
    // The Viterbi decoder maps bits b => b' : (0,1) => (-A,+A)
    // b' = (2*b-1)*A = -A*x
    let y = -x * (SOFT_DECISION_HIGH as f32);
    y as i8
}

#[inline(always)]
fn span(start: usize, length: usize) -> std::ops::Range<usize> {
    start..start + length
}

#[inline(always)]
fn chunk(index: usize, length: usize) -> std::ops::Range<usize> {
    span(index * length, length)
}
