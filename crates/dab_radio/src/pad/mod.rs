pub mod dynamic_label;
pub mod pad_processor;

use crate::mot::MotEntity;

/// Events surfaced from programme associated data.
#[derive(Debug, Clone, PartialEq)]
pub enum PadEvent {
    DynamicLabel { text: String, charset: u8 },
    DynamicLabelClear,
    MotEntity(MotEntity),
}
