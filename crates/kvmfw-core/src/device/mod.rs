//! EEPROM device layer.

pub mod file;
pub mod hid;
pub mod mock;
pub mod timeout;
pub mod traits;

pub use file::FileEeprom;
pub use hid::HidEeprom;
pub use mock::MockEeprom;
pub use timeout::TimeoutDevice;
pub use traits::{DeviceError, EepromDevice};
