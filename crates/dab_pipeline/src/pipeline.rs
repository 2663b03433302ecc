//! The three stage receiver pipeline: a producer thread reading baseband
//! samples, the OFDM demodulator thread, and the radio decoder thread,
//! linked by a sample channel and a soft bit double buffer.
//!
//! Shutdown is cooperative: the source running dry, `shutdown()`, or
//! dropping either buffer side drains the downstream stages.

use crate::double_buffer::{create_double_buffer, Consumer};
use crossbeam_channel::{bounded, Receiver, Sender};
use dab_radio::radio::BasicRadio;
use num::complex::Complex32;
use ofdm::ofdm_demodulator::OfdmDemodulator;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

const TARGET: &str = "pipeline";

/// Encoding of the baseband sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Interleaved unsigned 8 bit I/Q centred on 127.5.
    Uint8,
    /// Interleaved little endian f32 I/Q.
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Uint8 => 2,
            Self::Float32 => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Complex samples per producer chunk.
    pub chunk_samples: usize,
    pub sample_format: SampleFormat,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_samples: 65536,
            sample_format: SampleFormat::Uint8,
        }
    }
}

pub struct RadioPipeline {
    is_running: Arc<AtomicBool>,
    producer_handle: JoinHandle<()>,
    demodulator_handle: JoinHandle<OfdmDemodulator>,
    decoder_handle: JoinHandle<BasicRadio>,
}

impl RadioPipeline {
    /// Spawns the pipeline threads. The demodulator must be configured
    /// for the same transmission mode as the radio; its frame size
    /// determines the double buffer length.
    pub fn start(
        source: Box<dyn Read + Send>,
        mut demodulator: OfdmDemodulator,
        radio: BasicRadio,
        settings: PipelineSettings,
    ) -> Self {
        assert!(settings.chunk_samples > 0);
        assert!(
            demodulator.params.nb_output_bits == radio.params().nb_bits_per_frame,
            "demodulator frame of {} bits doesn't match radio frame of {} bits",
            demodulator.params.nb_output_bits,
            radio.params().nb_bits_per_frame,
        );

        let is_running = Arc::new(AtomicBool::new(true));
        let (sample_tx, sample_rx) = bounded::<Vec<Complex32>>(2);
        let (frame_producer, frame_consumer) = create_double_buffer::<i8>(demodulator.params.nb_output_bits);

        let producer_handle = std::thread::Builder::new()
            .name("sample-producer".to_string())
            .spawn({
                let is_running = is_running.clone();
                move || run_producer(source, sample_tx, settings, is_running)
            })
            .expect("spawning the producer thread");

        // the demodulator's frame callback publishes into the double
        // buffer; the flip happens on the demodulator thread
        let mut frame_producer = frame_producer;
        demodulator.subscribe_frame(move |soft_bits| {
            let Some(buffer) = frame_producer.acquire_inactive() else {
                return;
            };
            buffer.copy_from_slice(soft_bits);
            frame_producer.release_inactive();
        });

        let demodulator_handle = std::thread::Builder::new()
            .name("ofdm-demodulator".to_string())
            .spawn(move || run_demodulator(sample_rx, demodulator))
            .expect("spawning the demodulator thread");

        let decoder_handle = std::thread::Builder::new()
            .name("radio-decoder".to_string())
            .spawn(move || run_decoder(frame_consumer, radio))
            .expect("spawning the decoder thread");

        Self {
            is_running,
            producer_handle,
            demodulator_handle,
            decoder_handle,
        }
    }

    /// Requests cooperative shutdown; stages drain their queues and exit.
    pub fn shutdown(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    /// Waits for the pipeline to finish, returning the demodulator and
    /// radio for inspection of their counters and database.
    pub fn wait(self) -> (OfdmDemodulator, BasicRadio) {
        if let Err(panic) = self.producer_handle.join() {
            tracing::error!(target: TARGET, "producer thread panicked: {:?}", panic);
            std::panic::resume_unwind(panic);
        }
        let demodulator = self.demodulator_handle.join().expect("demodulator thread panicked");
        let radio = self.decoder_handle.join().expect("decoder thread panicked");
        (demodulator, radio)
    }
}

fn run_producer(
    mut source: Box<dyn Read + Send>,
    sample_tx: Sender<Vec<Complex32>>,
    settings: PipelineSettings,
    is_running: Arc<AtomicBool>,
) {
    let bytes_per_sample = settings.sample_format.bytes_per_sample();
    let mut byte_buffer = vec![0u8; settings.chunk_samples * bytes_per_sample];
    while is_running.load(Ordering::SeqCst) {
        // refill as much of the chunk as the source allows
        let mut filled = 0usize;
        while filled < byte_buffer.len() {
            match source.read(&mut byte_buffer[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!(target: TARGET, "error reading samples: {}", err);
                    return;
                }
            }
        }
        let total_samples = filled / bytes_per_sample;
        if total_samples == 0 {
            tracing::info!(target: TARGET, "sample source finished");
            return;
        }

        let samples = convert_samples(&byte_buffer[..total_samples * bytes_per_sample], settings.sample_format);
        if sample_tx.send(samples).is_err() {
            return;
        }
    }
}

/// Converts raw bytes into complex baseband samples.
pub fn convert_samples(bytes: &[u8], format: SampleFormat) -> Vec<Complex32> {
    match format {
        SampleFormat::Uint8 => bytes
            .chunks_exact(2)
            .map(|iq| {
                // 8 bit unsigned samples are centred on 127.5
                const DC_OFFSET: f32 = 127.5;
                Complex32::new(f32::from(iq[0]) - DC_OFFSET, f32::from(iq[1]) - DC_OFFSET)
            })
            .collect(),
        SampleFormat::Float32 => bytes
            .chunks_exact(8)
            .map(|iq| {
                let re = f32::from_le_bytes([iq[0], iq[1], iq[2], iq[3]]);
                let im = f32::from_le_bytes([iq[4], iq[5], iq[6], iq[7]]);
                Complex32::new(re, im)
            })
            .collect(),
    }
}

fn run_demodulator(sample_rx: Receiver<Vec<Complex32>>, mut demodulator: OfdmDemodulator) -> OfdmDemodulator {
    while let Ok(samples) = sample_rx.recv() {
        demodulator.process(&samples);
    }
    tracing::info!(
        target: TARGET,
        "demodulator finished: {} frames read, {} desyncs",
        demodulator.total_frames_read, demodulator.total_frames_desync,
    );
    demodulator
}

fn run_decoder(mut frame_consumer: Consumer<i8>, mut radio: BasicRadio) -> BasicRadio {
    loop {
        // a None frame is the shutdown sentinel
        let Some(frame) = frame_consumer.acquire_active() else {
            break;
        };
        radio.process(frame);
        frame_consumer.release_active();
    }
    tracing::info!(target: TARGET, "decoder finished");
    radio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint8_samples_are_centred() {
        let samples = convert_samples(&[0, 128, 255, 127], SampleFormat::Uint8);
        assert_eq!(samples.len(), 2);
        assert!((samples[0].re + 127.5).abs() < 1e-6);
        assert!((samples[0].im - 0.5).abs() < 1e-6);
        assert!((samples[1].re - 127.5).abs() < 1e-6);
        assert!((samples[1].im + 0.5).abs() < 1e-6);
    }

    #[test]
    fn float32_samples_pass_through() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.5f32).to_le_bytes());
        let samples = convert_samples(&bytes, SampleFormat::Float32);
        assert_eq!(samples, vec![Complex32::new(0.25, -0.5)]);
    }
}
