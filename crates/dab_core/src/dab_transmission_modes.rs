/// The four DAB transmission modes defined by the standard.
/// Mode I is used for terrestrial VHF broadcasts and is the only mode still
/// deployed, but the demodulator supports all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DabTransmissionMode {
    I,
    II,
    III,
    IV,
}

/// Error returned when an integer mode index is outside 1..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransmissionMode(pub u32);

impl std::fmt::Display for InvalidTransmissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid transmission mode index {} (expected 1..=4)", self.0)
    }
}

impl std::error::Error for InvalidTransmissionMode {}

impl TryFrom<u32> for DabTransmissionMode {
    type Error = InvalidTransmissionMode;
    fn try_from(index: u32) -> Result<Self, Self::Error> {
        match index {
            1 => Ok(Self::I),
            2 => Ok(Self::II),
            3 => Ok(Self::III),
            4 => Ok(Self::IV),
            index => Err(InvalidTransmissionMode(index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_index_conversion() {
        assert_eq!(DabTransmissionMode::try_from(1), Ok(DabTransmissionMode::I));
        assert_eq!(DabTransmissionMode::try_from(4), Ok(DabTransmissionMode::IV));
        assert!(DabTransmissionMode::try_from(0).is_err());
        assert!(DabTransmissionMode::try_from(5).is_err());
    }
}
