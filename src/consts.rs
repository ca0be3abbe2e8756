use std::time::Duration;

/// Default timeout for a serial frame receive once a session is up.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a single serial frame receive during session establishment.
pub const SYNC_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay between wake sequences while polling for the first frame.
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Same, for A50/Pro70 compatibility mode. These cameras need more slack.
pub const SYNC_POLL_INTERVAL_A50: Duration = Duration::from_millis(900);

/// Ping attempts after the speed switch before the sync is declared dead.
pub const SYNC_PING_RETRY_LIMIT: u32 = 10;

/// Timeout for USB transfers during the initial handshake.
pub const USB_SYNC_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout for USB transfers after the handshake.
pub const USB_TRANSFER_TIMEOUT: Duration = Duration::from_millis(3000);

/// Frame delimiters and the escape marker of the serial wire format.
/// Any content byte equal to one of these goes out as `0x7E, byte ^ 0x20`.
pub const FRAME_START: u8 = 0xC0;
pub const FRAME_END: u8 = 0xC1;
pub const FRAME_ESCAPE: u8 = 0x7E;
pub const ESCAPE_MASK: u8 = 0x20;

/// Upper bound on the de-escaped size of a single frame. A frame exceeding
/// this is a fatal protocol error, not a retryable one.
pub const MAX_FRAME_SIZE: usize = 4096;

pub const CHECKSUM_LEN: usize = 2;

/// Packet header layout inside a de-escaped frame.
pub const SEQ_OFFSET: usize = 0;
pub const TYPE_OFFSET: usize = 1;
pub const LEN_OFFSET: usize = 2;
pub const ACK_ERR_OFFSET: usize = 2;
pub const DATA_OFFSET: usize = 4;

/// Largest message payload carried by one fragment frame.
pub const FRAG_CAPACITY: usize = MAX_FRAME_SIZE - DATA_OFFSET - CHECKSUM_LEN;

/// ACK error codes. `0x01..=0x08` are specific retransmit requests the
/// camera may send; this side only ever emits none or retry-all.
pub const ACK_ERROR_NONE: u8 = 0x00;
pub const ACK_ERROR_RETRY_ALL: u8 = 0xFF;

/// Wake bytes transmitted repeatedly until the camera answers.
pub const WAKE_SEQUENCE: [u8; 4] = *b"UUUU";

/// A frame starting with these bytes means the camera has left PC mode.
pub const PC_MODE_LEFT_SENTINEL: [u8; 13] = [
    0x00, 0x00, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x04, 0x00, 0x10,
];

/// Switch-off sequence, written raw exactly as the camera expects it.
pub const SWITCH_OFF_PART1: [u8; 6] = [0xC0, 0x00, 0x02, 0x55, 0x2C, 0xC1];
pub const SWITCH_OFF_PART2: [u8; 8] = [0xC0, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00, 0x24];

/// Serial uploads go out in 800-byte slices, one message exchange each.
pub const SERIAL_UPLOAD_CHUNK: usize = 800;

/// USB uploads read 0x1400 bytes of the local file per bulk envelope.
pub const USB_UPLOAD_CHUNK: usize = 0x1400;

/// USB downloads arrive in page-multiple bulk reads.
pub const BULK_CHUNK_SIZE: usize = 0x1000;

/// USB command header geometry.
pub const USB_HEADER_SIZE: usize = 0x50;
pub const USB_COMMAND_SIZE: usize = 0x4C;
pub const USB_BUFFER_SIZE: usize = USB_HEADER_SIZE + USB_COMMAND_SIZE;

pub const VENDOR_ID_CANON: u16 = 0x04A9;

/// Per-message-type envelope constants of the serial protocol.
/// Byte format: message type, PC-to-camera direction byte, camera-to-PC
/// direction byte, then four bytes of fixed salt nobody has decoded.
pub mod serial_msg {
    pub const CAMERA_ID: [u8; 7] = [0x01, 0x12, 0x22, 0x14, 0xF7, 0x8A, 0x00];
    pub const IMAGE: [u8; 7] = [0x01, 0x11, 0x21, 0x6A, 0x08, 0x79, 0x04];
    /// Never sent; thumbnails use the IMAGE envelope with request byte 1.
    pub const THUMB: [u8; 7] = [0x01, 0x11, 0x21, 0xEA, 0x0C, 0xB1, 0x02];
    pub const SET_DATE: [u8; 7] = [0x04, 0x12, 0x00, 0x08, 0xD3, 0x9D, 0x00];
    pub const CH_OWNER: [u8; 7] = [0x05, 0x12, 0x00, 0xFC, 0xD2, 0x9D, 0x00];
    pub const DISK_INFO: [u8; 7] = [0x09, 0x11, 0x21, 0xD8, 0xF7, 0x8A, 0x00];
    pub const GET_DISK: [u8; 7] = [0x0A, 0x11, 0x21, 0xDC, 0xF7, 0x8A, 0x00];
    pub const LIST_WITHOUT_DATE: [u8; 7] = [0x0B, 0x11, 0x21, 0x94, 0xF6, 0x8A, 0x00];
    pub const LIST_WITH_DATE: [u8; 7] = [0x0B, 0x11, 0x21, 0xA8, 0xF6, 0x8A, 0x00];
    pub const DELETE: [u8; 7] = [0x0D, 0x11, 0x21, 0x8C, 0xF4, 0x7B, 0x00];
    pub const POWER_STATUS: [u8; 7] = [0x0A, 0x12, 0x22, 0x70, 0xF6, 0x8A, 0x00];
    pub const GET_DATE: [u8; 7] = [0x03, 0x12, 0x12, 0x78, 0xF3, 0x64, 0x01];
    pub const SET_ATTRIB: [u8; 7] = [0x0E, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00];
    pub const MKDIR: [u8; 7] = [0x05, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00];
    pub const RMDIR: [u8; 7] = [0x06, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00];
    pub const UPLOAD: [u8; 7] = [0x03, 0x11, 0x21, 0x00, 0x00, 0x00, 0x00];
}

/// Speed-switch commands, pre-framed (checksum and delimiters included)
/// because they go out right before the line speed changes.
pub mod speed {
    pub const B9600: &[u8] = &[
        0xC0, 0x00, 0x03, 0x02, 0x02, 0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x7E, 0xE0, 0x39, 0xC1,
    ];
    pub const B19200: &[u8] = &[
        0xC0, 0x00, 0x03, 0x08, 0x02, 0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x13, 0x1F, 0xC1,
    ];
    pub const B38400: &[u8] = &[
        0xC0, 0x00, 0x03, 0x20, 0x02, 0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x5F, 0x84, 0xC1,
    ];
    pub const B57600: &[u8] = &[
        0xC0, 0x00, 0x03, 0x40, 0x02, 0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x5E, 0x57, 0xC1,
    ];
    pub const B115200: &[u8] = &[
        0xC0, 0x00, 0x03, 0x80, 0x02, 0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x4D, 0xF9, 0xC1,
    ];
}
