//! Host metadata used to decorate API requests.
//!
//! - `DeviceIdResolver`: asks a platform bridge for the device id (with a
//!   timeout) or falls back to a synthesized id kept in the config directory
//! - `ClientContext`: timestamp, timezone, UTC offset and locale headers

pub mod context;
pub mod id;

pub use context::ClientContext;
pub use id::{
    load_or_create_device_id, synthesize_device_id, DeviceIdProvider, DeviceIdResolver,
    MachineIdProvider,
};
