// network/mod.rs - Capture device handling and packet decoding
pub mod capture;
pub mod packet;
pub mod types;

pub use capture::{scan_frames, CaptureSession};
pub use packet::{IpPacket, PacketError};
pub use types::{IpVersion, Transport};
