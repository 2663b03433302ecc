//! Demodulates a raw IQ capture into DAB soft decision bits.
//!
//! Reads interleaved 8 bit unsigned I/Q samples at 2.048 Msps from a file
//! or stdin and writes one soft bit frame per OFDM frame to a file or
//! stdout. The output feeds the radio decoder or offline analysis.

use clap::Parser;
use dab_core::dab_transmission_modes::DabTransmissionMode;
use dab_ofdm::dab_ofdm_demodulator::create_dab_ofdm_demodulator;
use dab_pipeline::pipeline::{convert_samples, SampleFormat};
use ofdm::ofdm_demodulator::OfdmDemodulatorSettings;
use std::io::{BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// DAB transmission mode. Valid modes are [1,2,3,4]
    #[arg(short, long, default_value_t = 1)]
    mode: u32,
    /// Number of complex samples to read per chunk
    #[arg(short = 'b', long, default_value_t = 4096 * 8)]
    block_size: usize,
    /// Input filepath; stdin when omitted
    #[arg(short, long)]
    input: Option<String>,
    /// Output filepath; stdout when omitted
    #[arg(short, long)]
    output: Option<String>,
    /// Number of demodulator worker threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    threads: usize,
    /// Disable coarse frequency correction
    #[arg(long)]
    disable_coarse_freq: bool,
}

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let transmission_mode = DabTransmissionMode::try_from(args.mode).map_err(|err| err.to_string())?;
    if args.block_size == 0 {
        return Err("Block size cannot be zero".into());
    }

    let mut input: Box<dyn Read> = match &args.input {
        None => Box::new(std::io::stdin().lock()),
        Some(path) => match std::fs::File::open(path) {
            Ok(file) => Box::new(file),
            Err(err) => return Err(format!("Failed to open input file {}: {}", path, err)),
        },
    };
    let output: Box<dyn Write + Send> = match &args.output {
        None => Box::new(std::io::stdout()),
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => Box::new(file),
            Err(err) => return Err(format!("Failed to open output file {}: {}", path, err)),
        },
    };

    let settings = OfdmDemodulatorSettings {
        coarse_frequency_is_enabled: !args.disable_coarse_freq,
        total_threads: args.threads,
        ..Default::default()
    };
    let mut demodulator =
        create_dab_ofdm_demodulator(transmission_mode, settings).map_err(|err| err.to_string())?;

    let is_output_open = Arc::new(AtomicBool::new(true));
    let mut writer = BufWriter::new(output);
    demodulator.subscribe_frame({
        let is_output_open = is_output_open.clone();
        move |soft_bits| {
            // i8 soft bits reinterpreted as raw bytes
            let bytes: Vec<u8> = soft_bits.iter().map(|&bit| bit as u8).collect();
            if let Err(err) = writer.write_all(&bytes) {
                tracing::error!("error writing soft bits: {}", err);
                is_output_open.store(false, Ordering::SeqCst);
            }
        }
    });

    let bytes_per_sample = SampleFormat::Uint8.bytes_per_sample();
    let mut byte_buffer = vec![0u8; args.block_size * bytes_per_sample];
    while is_output_open.load(Ordering::SeqCst) {
        let total_read = match input.read(&mut byte_buffer) {
            Ok(0) => break,
            Ok(total) => total,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::error!("error reading samples: {}", err);
                break;
            }
        };
        let samples = convert_samples(&byte_buffer[..total_read - total_read % bytes_per_sample], SampleFormat::Uint8);
        demodulator.process(&samples);
    }

    tracing::info!(
        "finished: {} frames read, {} desyncs",
        demodulator.total_frames_read,
        demodulator.total_frames_desync,
    );
    Ok(())
}
