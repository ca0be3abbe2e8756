//! Byte-stuffed frame layer of the serial transport.
//!
//! A frame on the wire is `0xC0`, escaped content, `0xC1`. The content is
//! the packet plus a trailing little-endian CRC; any content byte equal to
//! one of the three markers is sent as `0x7E` followed by the byte XOR
//! `0x20`. Checksum verification is left to the caller so that a corrupted
//! fragment can be retried instead of aborting the session.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPort, SerialStream};

use crate::consts::{
    CHECKSUM_LEN, ESCAPE_MASK, FRAME_END, FRAME_ESCAPE, FRAME_START, MAX_FRAME_SIZE,
    PC_MODE_LEFT_SENTINEL, SERIAL_READ_TIMEOUT,
};
use crate::{checksum, CamError, CamResult};

fn needs_escape(byte: u8) -> bool {
    byte == FRAME_ESCAPE || byte == FRAME_START || byte == FRAME_END
}

/// Line-speed control, separated out so the session machine can run over an
/// in-memory stream in tests.
pub trait LineControl {
    fn set_line_speed(&mut self, baud: u32) -> CamResult<()>;
}

impl LineControl for SerialStream {
    fn set_line_speed(&mut self, baud: u32) -> CamResult<()> {
        self.set_baud_rate(baud)?;
        Ok(())
    }
}

#[cfg(test)]
impl LineControl for tokio::io::DuplexStream {
    fn set_line_speed(&mut self, _baud: u32) -> CamResult<()> {
        Ok(())
    }
}

/// Framing over any async byte stream. The real transport is a
/// [`SerialStream`]; tests drive it over `tokio::io::duplex`.
pub struct SerialFramer<S> {
    port: S,
    read_timeout: Duration,
    /// A50/Pro70 compatibility: write one byte at a time.
    byte_at_a_time: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SerialFramer<S> {
    pub fn new(port: S, byte_at_a_time: bool) -> Self {
        Self {
            port,
            read_timeout: SERIAL_READ_TIMEOUT,
            byte_at_a_time,
        }
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    pub fn is_byte_at_a_time(&self) -> bool {
        self.byte_at_a_time
    }

    /// Writes bytes with no framing. Used for the wake sequence, the
    /// pre-framed speed-switch commands and the switch-off sequence.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> CamResult<()> {
        if self.byte_at_a_time {
            for &byte in bytes {
                self.port.write_all(&[byte]).await?;
                self.port.flush().await?;
            }
        } else {
            self.port.write_all(bytes).await?;
            self.port.flush().await?;
        }
        Ok(())
    }

    /// Appends the checksum to `content`, escapes it and writes one frame.
    pub async fn send_frame(&mut self, content: &[u8]) -> CamResult<()> {
        let mut protected = content.to_vec();
        checksum::append(&mut protected);

        let mut wire = Vec::with_capacity(protected.len() + 8);
        wire.push(FRAME_START);
        for &byte in &protected {
            if needs_escape(byte) {
                wire.push(FRAME_ESCAPE);
                wire.push(byte ^ ESCAPE_MASK);
            } else {
                wire.push(byte);
            }
        }
        wire.push(FRAME_END);

        log::debug!("TX frame ({} bytes): {:02x?}", wire.len(), wire);
        self.write_raw(&wire).await
    }

    /// Receives one frame and returns the de-escaped content with the
    /// checksum still attached. Bytes before the start marker are noise
    /// (line glitches, echoes of the wake sequence) and are skipped.
    pub async fn recv_frame(&mut self) -> CamResult<Vec<u8>> {
        loop {
            if self.read_byte().await? == FRAME_START {
                break;
            }
        }

        let mut content = Vec::new();
        loop {
            let byte = match self.read_byte().await? {
                FRAME_END => break,
                FRAME_ESCAPE => self.read_byte().await? ^ ESCAPE_MASK,
                byte => byte,
            };
            content.push(byte);
            if content.len() > MAX_FRAME_SIZE {
                return Err(CamError::FrameTooLarge);
            }
        }

        log::debug!("RX frame ({} bytes): {:02x?}", content.len(), content);

        if content.len() >= PC_MODE_LEFT_SENTINEL.len()
            && content[..PC_MODE_LEFT_SENTINEL.len()] == PC_MODE_LEFT_SENTINEL
        {
            return Err(CamError::LinkLost);
        }
        if content.len() < CHECKSUM_LEN {
            return Err(CamError::InvalidLength {
                expected: CHECKSUM_LEN,
                received: content.len(),
            });
        }
        Ok(content)
    }

    /// Reads and discards whatever is sitting in the input buffer.
    pub async fn drain_input(&mut self) {
        let mut scratch = [0u8; 256];
        while let Ok(Ok(n)) = timeout(Duration::from_millis(50), self.port.read(&mut scratch)).await
        {
            if n == 0 {
                break;
            }
        }
    }

    async fn read_byte(&mut self) -> CamResult<u8> {
        Ok(timeout(self.read_timeout, self.port.read_u8()).await??)
    }
}

impl<S: LineControl> SerialFramer<S> {
    /// Changes the local line speed, after the matching speed-switch
    /// command has been acknowledged by the camera.
    pub fn set_line_speed(&mut self, baud: u32) -> CamResult<()> {
        self.port.set_line_speed(baud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use pretty_assertions::assert_eq;

    fn pair() -> (SerialFramer<tokio::io::DuplexStream>, SerialFramer<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (SerialFramer::new(a, false), SerialFramer::new(b, false))
    }

    #[tokio::test]
    async fn roundtrip_with_reserved_bytes() {
        let (mut tx, mut rx) = pair();
        let payload = [0x00, 0x7E, 0xC0, 0xC1, 0x5E, 0xFF];
        tx.send_frame(&payload).await.unwrap();

        let frame = rx.recv_frame().await.unwrap();
        assert_eq!(checksum::verify(&frame), Some(&payload[..]));
    }

    #[tokio::test]
    async fn noise_before_start_is_skipped() {
        let (mut tx, mut rx) = pair();
        tx.write_raw(b"UUUU").await.unwrap();
        tx.send_frame(&[0x01, 0x02]).await.unwrap();

        let frame = rx.recv_frame().await.unwrap();
        assert_eq!(checksum::verify(&frame), Some(&[0x01, 0x02][..]));
    }

    #[tokio::test]
    async fn oversize_frame_is_fatal() {
        let (mut tx, mut rx) = pair();
        // 0x55 needs no escaping, so decoded size == written size.
        let mut wire = vec![FRAME_START];
        wire.extend(std::iter::repeat(0x55).take(MAX_FRAME_SIZE + 2));
        wire.push(FRAME_END);
        let (sent, received) = tokio::join!(tx.write_raw(&wire), rx.recv_frame());
        sent.unwrap();
        assert!(matches!(received, Err(CamError::FrameTooLarge)));
    }

    #[tokio::test]
    async fn remote_mode_exit_sentinel_is_link_lost() {
        let (mut tx, mut rx) = pair();
        let mut content = PC_MODE_LEFT_SENTINEL.to_vec();
        checksum::append(&mut content);
        // Build the wire image by hand; the sentinel contains no reserved bytes.
        let mut wire = vec![FRAME_START];
        wire.extend_from_slice(&content);
        wire.push(FRAME_END);
        tx.write_raw(&wire).await.unwrap();

        assert!(matches!(rx.recv_frame().await, Err(CamError::LinkLost)));
    }

    #[tokio::test]
    async fn corrupted_frame_fails_checksum_but_not_receive() {
        let (mut tx, mut rx) = pair();
        let mut content = vec![0x03, 0x00, 0x04, 0x00, 0xDE, 0xAD, 0xBE, 0xEF];
        checksum::append(&mut content);
        content[4] ^= 0x01;
        let mut wire = vec![FRAME_START];
        for &byte in &content {
            if needs_escape(byte) {
                wire.push(FRAME_ESCAPE);
                wire.push(byte ^ ESCAPE_MASK);
            } else {
                wire.push(byte);
            }
        }
        wire.push(FRAME_END);
        tx.write_raw(&wire).await.unwrap();

        let frame = rx.recv_frame().await.unwrap();
        assert_eq!(checksum::verify(&frame), None);
    }
}
