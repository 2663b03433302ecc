//! Slideshow user application decode over MOT.
//!
//! DOC: ETSI TS 101 499
//! Clause 6.2 - MOT parameters for the slideshow application

use super::{MotEntity, MotTime, TransportId};
use crate::constants::charsets::convert_charset_to_utf8;
use crate::constants::mot_content_types::{get_mot_content_subtype, MotContentSubtype};

const TARGET: &str = "mot-slideshow";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideshowImageType {
    Jpeg,
    Png,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideshowAlert {
    NotUsed,
    Emergency,
    ReservedFutureUse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slideshow {
    pub transport_id: TransportId,
    pub image_type: SlideshowImageType,
    pub image_data: Vec<u8>,
    pub name: Option<String>,
    pub trigger_time: Option<MotTime>,
    pub expire_time: Option<MotTime>,
    pub category_id: u8,
    pub slide_id: u8,
    pub category_title: Option<String>,
    pub click_through_url: Option<String>,
    pub alt_location_url: Option<String>,
    pub alert: SlideshowAlert,
}

/// Interprets a MOT entity as a slideshow. Returns None for entities of
/// any other content type, which the caller surfaces raw instead.
pub fn process_mot_entity(entity: &MotEntity) -> Option<Slideshow> {
    // Clause 6.2.3: MOT ContentTypes used by slideshows
    let image_type = match get_mot_content_subtype(entity.header.content_type, entity.header.content_subtype) {
        MotContentSubtype::ImageJpeg => SlideshowImageType::Jpeg,
        MotContentSubtype::ImagePng => SlideshowImageType::Png,
        _ => return None,
    };

    let mut slideshow = Slideshow {
        transport_id: entity.transport_id,
        image_type,
        image_data: entity.body.clone(),
        name: entity.header.content_name.as_ref().map(|(_, name)| name.clone()),
        trigger_time: entity.header.trigger_time,
        expire_time: entity.header.expire_time,
        category_id: 0,
        slide_id: 0,
        category_title: None,
        click_through_url: None,
        alt_location_url: None,
        alert: SlideshowAlert::NotUsed,
    };

    for parameter in &entity.header.user_app_parameters {
        apply_slideshow_parameter(&mut slideshow, parameter.param_id, &parameter.data);
    }

    tracing::info!(
        target: TARGET,
        "slideshow tid={} type={:?} name={:?} {} bytes",
        slideshow.transport_id, slideshow.image_type, slideshow.name, slideshow.image_data.len(),
    );
    Some(slideshow)
}

/// Clause 6.2.1, table 3: slideshow header extension parameters.
fn apply_slideshow_parameter(slideshow: &mut Slideshow, param_id: u8, data: &[u8]) {
    match param_id {
        // Clause 6.2.6: CategoryID/SlideID
        0x25 => {
            if data.len() != 2 {
                tracing::warn!(target: TARGET, "unexpected category/slide id length {}", data.len());
                return;
            }
            slideshow.category_id = data[0];
            slideshow.slide_id = data[1];
        }
        // Clause 6.2.7: CategoryTitle
        0x26 => {
            if data.is_empty() {
                tracing::warn!(target: TARGET, "empty category title");
                return;
            }
            slideshow.category_title = Some(convert_charset_to_utf8(data, 0b1111));
        }
        // Clause 6.2.8: ClickThroughURL
        0x27 => {
            if data.is_empty() {
                tracing::warn!(target: TARGET, "empty click through url");
                return;
            }
            slideshow.click_through_url = Some(convert_charset_to_utf8(data, 0b1111));
        }
        // Clause 6.2.9: AlternativeLocationURL
        0x28 => {
            if data.is_empty() {
                tracing::warn!(target: TARGET, "empty alternative location url");
                return;
            }
            slideshow.alt_location_url = Some(convert_charset_to_utf8(data, 0b1111));
        }
        // Clause 6.2.10: Alert
        0x29 => {
            if data.len() != 1 {
                tracing::warn!(target: TARGET, "unexpected alert length {}", data.len());
                return;
            }
            slideshow.alert = match data[0] {
                0x00 => SlideshowAlert::NotUsed,
                0x01 => SlideshowAlert::Emergency,
                _ => SlideshowAlert::ReservedFutureUse,
            };
        }
        param_id => {
            tracing::debug!(target: TARGET, "unknown slideshow parameter {:#04X}", param_id);
        }
    }
}
