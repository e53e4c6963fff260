//! Barcode input helpers for the checkout.
//!
//! - `BarcodeBuffer`: tells scanner bursts apart from typing by key cadence
//! - `decode_scale_barcode`: reads item code and weight/price from EAN-13
//!   labels printed by retail scales

pub mod buffer;
pub mod scale;

pub use buffer::{BarcodeBuffer, Key};
pub use scale::{
    decode_scale_barcode, ean13_check_digit, is_scale_barcode, validate_ean13, BarcodeError,
    ScaleBarcode, ScaleKind,
};
