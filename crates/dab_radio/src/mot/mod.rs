pub mod assembler;
pub mod processor;
pub mod slideshow;

pub type TransportId = u16;

/// MOT UTC timestamp attached to header parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MotTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub milliseconds: u16,
}

/// An unrecognised header extension parameter kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotHeaderParameter {
    pub param_id: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MotHeader {
    pub body_size: u32,
    pub header_size: u16,
    pub content_type: u8,
    pub content_subtype: u16,
    pub content_name: Option<(u8, String)>,
    pub trigger_time: Option<MotTime>,
    pub expire_time: Option<MotTime>,
    /// Application specific parameters, e.g. slideshow extensions.
    pub user_app_parameters: Vec<MotHeaderParameter>,
}

/// A fully reassembled MOT object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotEntity {
    pub transport_id: TransportId,
    pub header: MotHeader,
    pub body: Vec<u8>,
}
