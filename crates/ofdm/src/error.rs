use thiserror::Error;

/// Construction-time configuration errors for the OFDM demodulator.
/// Signal-level failures (desync, weak impulse peak) never surface as
/// errors; they are handled by the state machine and counted instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OfdmConfigError {
    #[error("carrier map has {got} entries but parameters declare {expected} data carriers")]
    CarrierMapLengthMismatch { expected: usize, got: usize },
    #[error("PRS reference has {got} samples but parameters declare an FFT length of {expected}")]
    PrsLengthMismatch { expected: usize, got: usize },
    #[error("carrier map entry {value} at index {index} is outside the FFT data carrier range {limit}")]
    CarrierMapOutOfRange { index: usize, value: usize, limit: usize },
    #[error("failed to build demodulator worker pool: {0}")]
    ThreadPool(String),
}
