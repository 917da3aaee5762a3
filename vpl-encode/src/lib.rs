//! Push captured frames through a oneVPL / Intel Media SDK style encoder
//! and write the raw elementary stream to disk.

pub mod bitstream;
pub mod config;
pub mod device;
pub mod driver;
pub mod encode_loop;
pub mod error;
pub mod format;
pub mod frame;
pub mod loader;
pub mod metrics;
pub mod module;
pub mod queue;
pub mod session;
pub mod status;
pub mod surface;

#[cfg(test)]
mod testutil;

pub use config::{Codec, EncoderConfig, Implementation, RateControlMethod};
pub use device::{AllocRequest, Device, SyncPoint};
pub use driver::{EncodeDriver, EncodeOutcome, EncodeStats};
pub use error::{Error, Result};
pub use format::FourCc;
pub use frame::{Frame, PixelLayout};
pub use module::EncodeModule;
pub use session::SessionState;
pub use status::Status;
