//! kvmfw-core: firmware update engine for MS2109-based KVM bridges.
//!
//! Resolves the latest published firmware, downloads it, and writes it to
//! the bridge's EEPROM through a slow, command-oriented channel with
//! deterministic progress and failure reporting.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Firmware**: Descriptor, image, chunk and write-cursor types
//! - **Net**: HTTP fetch abstraction (reqwest, mock)
//! - **Device**: EEPROM write abstraction (HID bridge, file, mock, timeout adapter)
//! - **Resolver**: Latest-descriptor lookup and image download
//! - **Writer**: Sequential chunked EEPROM writes
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Single-flight lifecycle state machine
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kvmfw_core::{HidEeprom, ReqwestFetcher, UpdateConfig, UpdateSession};
//!
//! let config = UpdateConfig::default();
//! let fetcher = ReqwestFetcher::new(config.fetch_timeout()).expect("HTTP client");
//! let device = Arc::new(HidEeprom::open().expect("KVM bridge"));
//!
//! let session = UpdateSession::new(config, fetcher, device).expect("valid config");
//! session.run().expect("firmware update failed");
//! ```

pub mod cancel;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod firmware;
pub mod net;
pub mod resolver;
pub mod session;
pub mod writer;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use config::{UpdateConfig, WriteStrategy};
pub use device::{DeviceError, EepromDevice, FileEeprom, HidEeprom, MockEeprom, TimeoutDevice};
pub use error::UpdateError;
pub use events::{
    ChannelObserver, NullObserver, TracingObserver, UpdateEvent, UpdateObserver, UpdateState,
};
pub use firmware::{Chunk, EEPROM_CAPACITY, FirmwareDescriptor, FirmwareImage, WriteCursor};
pub use net::{FetchError, HttpFetch, HttpResponse, MockFetcher, ReqwestFetcher};
pub use resolver::{ImageResolver, ResolvedFirmware};
pub use session::{RunHandle, SessionSnapshot, UpdateSession};
pub use writer::{ChunkWriter, WriteSummary};
