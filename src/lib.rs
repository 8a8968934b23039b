pub mod assembler;
pub mod device;
pub mod error;
pub mod protocol;
pub mod settings;
pub mod transfer;
pub mod transport;

pub use device::Spectrometer;
pub use error::{Error, ResponseStage};
pub use protocol::{Command, DeviceConfiguration, Direction, ResponseHeader};
pub use settings::{DeviceSelector, Timing};
pub use transport::{HidTransport, Transport};
