//! A Rust cross-platform userspace driver for early Canon PowerShot and EOS
//! digital cameras speaking the legacy remote protocol, over RS-232 serial or
//! USB.
//!
//! The protocol was reverse engineered; it covers the filesystem operations
//! (listing, download, upload, delete, attributes), camera housekeeping
//! (clock, owner, disk and power queries) and, on supported EOS bodies,
//! remote capture and shooting-parameter control.
//!
//! USB transport uses the [nusb] library; serial transport uses
//! [tokio-serial]. The camera must be in its PC connection mode.
//!
//! [nusb]: https://github.com/kevinmehall/nusb
//! [tokio-serial]: https://github.com/berkowski/tokio-serial
//!
//! ## Example
//!
//! More examples are provided in the `demos/` folder.
//!
//! ```no_run
//! use pscam_lib_rs::cam::CameraSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cam = CameraSession::open_usb().await?;
//!
//!     println!("Camera: {:#?}", cam.identify().await?);
//!     for entry in cam.list_dir("DCIM").await? {
//!         println!("{}", entry);
//!     }
//!
//!     cam.close().await?;
//!     Ok(())
//! }
//! ```

/// Wire constants: delimiters, message envelopes, timeouts, chunk sizes.
pub mod consts;

/// 16-bit CRC over frame content.
pub mod checksum;

/// Byte-stuffed frame layer of the serial transport.
pub mod frame;

/// Serial packet/message state machine and the serial-side operations.
pub mod serial;

/// USB command layer and the USB-side operations.
pub mod usb;

/// Directory listing decoder and camera path handling.
pub mod dirlist;

/// Chunked file transfer bookkeeping shared by both transports.
pub mod transfer;

/// Shooting-parameter engine for the supported EOS bodies.
pub mod params;

/// Custom-function engine for the supported EOS bodies.
pub mod custom;

/// The main session struct tying a transport to the high-level API.
pub mod cam;

mod util;

/// Crate-specific error enum.
/// Every function interacting with the camera returns a Result with this
/// error type.
#[derive(thiserror::Error, Debug)]
pub enum CamError {
    #[error("Error while transfering USB data")]
    UsbTransfer(#[from] nusb::transfer::TransferError),

    #[error("Internal I/O error occured")]
    Io(#[from] std::io::Error),

    #[error("Timeout occured during I/O operation")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Serial port error")]
    Serial(#[from] tokio_serial::Error),

    #[error(transparent)]
    Param(#[from] params::ParamError),

    #[error("Packet out of sequence (expected: {expected}, received: {received})")]
    OutOfSequence { expected: u8, received: u8 },

    #[error("Unknown packet type {0:#04x}")]
    UnknownPacketType(u8),

    #[error("The camera left PC connection mode")]
    LinkLost,

    #[error("Unable to synchronize with the camera, attempts: {tries}")]
    SyncFailed { tries: u32 },

    #[error("Frame exceeds the maximum decoded size")]
    FrameTooLarge,

    #[error("Invalid response format")]
    InvalidFormat,

    #[error("Invalid response length (expected: {expected}, received: {received})")]
    InvalidLength { expected: usize, received: usize },

    #[error("No such file or directory on the camera")]
    NotFound,

    #[error("The camera rejected the command, status code: {status:#04x}")]
    CommandFailed { status: u8 },

    #[error("No supported camera found on the USB bus")]
    NoCameraFound,

    #[error("Operation not supported by this transport or camera model")]
    Unsupported,
}

pub type CamResult<T> = Result<T, CamError>;
