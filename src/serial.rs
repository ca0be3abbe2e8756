//! Packet and message layers of the serial transport, plus the operations
//! the camera exposes over it.
//!
//! On top of the frame layer sits a packet layer with four packet types.
//! A logical message is split into MSG fragments followed by an EOT; the
//! receiving side answers with an ACK whose error byte can request a full
//! retransmission of the fragment group. Two sequence counters (one per
//! direction) track the EOT/ACK exchanges; they only advance on successful
//! exchanges, so a retransmitted group reuses its numbers.

use int_enum::IntEnum;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::sleep;
use tokio_serial::SerialStream;

use std::time::Duration;

use crate::cam::{CameraId, DiskInfo, PowerStatus};
use crate::consts::{
    self, serial_msg, ACK_ERROR_NONE, ACK_ERROR_RETRY_ALL, DATA_OFFSET, FRAG_CAPACITY, LEN_OFFSET,
    SEQ_OFFSET, SERIAL_READ_TIMEOUT, SERIAL_UPLOAD_CHUNK, SWITCH_OFF_PART1, SWITCH_OFF_PART2,
    SYNC_PING_RETRY_LIMIT, SYNC_POLL_INTERVAL, SYNC_POLL_INTERVAL_A50, SYNC_READ_TIMEOUT,
    TYPE_OFFSET, WAKE_SEQUENCE,
};
use crate::frame::{LineControl, SerialFramer};
use crate::transfer::{ProgressReporter, TransferKind, TransferState};
use crate::{checksum, util, CamError, CamResult};

/// Listing requests carry a recursion byte; only flat listings are used.
const DL_NO_RECURSION: u8 = 0x00;

/// Offset of the status byte inside a response message.
const MSG_STATUS_OFFSET: usize = 16;

/// Size of the per-block header on the first fragment of a download group.
const DOWNLOAD_HEADER_LEN: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum PacketType {
    Message = 0x00,
    Eot = 0x04,
    Ack = 0x05,
    Init = 0x06,
}

/// The serial message types, each tied to its envelope constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    CameraId,
    Image,
    DiskInfo,
    GetDisk,
    ListWithDate,
    Delete,
    PowerStatus,
    GetDate,
    SetAttrib,
    Mkdir,
    Rmdir,
    Upload,
}

impl MessageType {
    fn envelope(self) -> &'static [u8; 7] {
        match self {
            Self::CameraId => &serial_msg::CAMERA_ID,
            Self::Image => &serial_msg::IMAGE,
            Self::DiskInfo => &serial_msg::DISK_INFO,
            Self::GetDisk => &serial_msg::GET_DISK,
            Self::ListWithDate => &serial_msg::LIST_WITH_DATE,
            Self::Delete => &serial_msg::DELETE,
            Self::PowerStatus => &serial_msg::POWER_STATUS,
            Self::GetDate => &serial_msg::GET_DATE,
            Self::SetAttrib => &serial_msg::SET_ATTRIB,
            Self::Mkdir => &serial_msg::MKDIR,
            Self::Rmdir => &serial_msg::RMDIR,
            Self::Upload => &serial_msg::UPLOAD,
        }
    }
}

/// The line speed negotiated right after the wake handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialSpeed {
    B9600,
    B19200,
    B38400,
    B57600,
    #[default]
    B115200,
}

impl SerialSpeed {
    pub fn baud(self) -> u32 {
        match self {
            Self::B9600 => 9600,
            Self::B19200 => 19200,
            Self::B38400 => 38400,
            Self::B57600 => 57600,
            Self::B115200 => 115200,
        }
    }

    fn switch_command(self) -> &'static [u8] {
        match self {
            Self::B9600 => consts::speed::B9600,
            Self::B19200 => consts::speed::B19200,
            Self::B38400 => consts::speed::B38400,
            Self::B57600 => consts::speed::B57600,
            Self::B115200 => consts::speed::B115200,
        }
    }
}

/// One parsed packet. `cksum_ok` is reported instead of enforced because a
/// corrupted fragment inside a group is recovered by retransmission, not by
/// failing the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u8,
    pub cksum_ok: bool,
    pub body: PacketBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Message(Vec<u8>),
    Init(Vec<u8>),
    Eot(u8),
    Ack(u8),
}

impl Packet {
    /// Parses a de-escaped frame (checksum still attached).
    fn parse(frame: &[u8]) -> CamResult<Packet> {
        if frame.len() < DATA_OFFSET + consts::CHECKSUM_LEN {
            return Err(CamError::InvalidLength {
                expected: DATA_OFFSET + consts::CHECKSUM_LEN,
                received: frame.len(),
            });
        }
        let mut cksum_ok = checksum::verify(frame).is_some();
        let content = &frame[..frame.len() - consts::CHECKSUM_LEN];

        let seq = content[SEQ_OFFSET];
        let raw_type = content[TYPE_OFFSET];
        let packet_type = PacketType::try_from(raw_type)
            .map_err(|_| CamError::UnknownPacketType(raw_type))?;

        let body = match packet_type {
            PacketType::Message | PacketType::Init => {
                let len =
                    u16::from_le_bytes([content[LEN_OFFSET], content[LEN_OFFSET + 1]]) as usize;
                let data = match content.get(DATA_OFFSET..DATA_OFFSET + len) {
                    Some(data) => data.to_vec(),
                    None => {
                        // A length field pointing past the frame poisons the
                        // fragment the same way a bad checksum does.
                        cksum_ok = false;
                        content[DATA_OFFSET..].to_vec()
                    }
                };
                if packet_type == PacketType::Message {
                    PacketBody::Message(data)
                } else {
                    PacketBody::Init(data)
                }
            }
            PacketType::Eot => PacketBody::Eot(content[LEN_OFFSET]),
            PacketType::Ack => PacketBody::Ack(content[consts::ACK_ERR_OFFSET]),
        };

        Ok(Packet {
            seq,
            cksum_ok,
            body,
        })
    }
}

/// Outcome of receiving one EOT-terminated fragment group. The matching
/// ACK has already been sent when this is returned.
enum Group {
    Clean(Vec<Vec<u8>>),
    Corrupted,
}

pub struct SerialProtocol<S> {
    framer: SerialFramer<S>,
    frag_sequence: u8,
    eot_sequence: u8,
    ack_sequence: u8,
}

impl SerialProtocol<SerialStream> {
    /// Opens the port at the wake speed (9600 8N1). `establish` negotiates
    /// the real speed afterwards.
    pub fn open(device: &str, byte_at_a_time: bool) -> CamResult<Self> {
        let builder = tokio_serial::new(device, 9600);
        let stream = SerialStream::open(&builder)?;
        Ok(Self::new(SerialFramer::new(stream, byte_at_a_time)))
    }
}

impl<S: AsyncRead + AsyncWrite + LineControl + Unpin> SerialProtocol<S> {
    pub fn new(framer: SerialFramer<S>) -> Self {
        Self {
            framer,
            frag_sequence: 0,
            eot_sequence: 0,
            ack_sequence: 0,
        }
    }

    async fn send_ack(&mut self, error: u8) -> CamResult<()> {
        let ack = [
            self.ack_sequence,
            PacketType::Ack as u8,
            error,
            0x00,
            0x00,
            0x00,
        ];
        if error == ACK_ERROR_NONE {
            self.ack_sequence = self.ack_sequence.wrapping_add(1);
        }
        self.framer.send_frame(&ack).await
    }

    async fn send_eot(&mut self) -> CamResult<()> {
        let eot = [
            self.eot_sequence,
            PacketType::Eot as u8,
            0x01,
            0x00,
            0x00,
            0x00,
        ];
        self.eot_sequence = self.eot_sequence.wrapping_add(1);
        self.framer.send_frame(&eot).await
    }

    async fn send_ping(&mut self) -> CamResult<()> {
        let ping = [
            self.eot_sequence,
            PacketType::Eot as u8,
            0x00,
            0x00,
            0x00,
            0x00,
        ];
        self.eot_sequence = self.eot_sequence.wrapping_add(1);
        self.framer.send_frame(&ping).await
    }

    async fn recv_packet(&mut self) -> CamResult<Packet> {
        let frame = self.framer.recv_frame().await?;
        Packet::parse(&frame)
    }

    /// Waits for the ACK matching the EOT just sent.
    async fn await_ack(&mut self) -> CamResult<u8> {
        let expected = self.eot_sequence.wrapping_sub(1);
        let pkt = self.recv_packet().await?;
        let PacketBody::Ack(error) = pkt.body else {
            return Err(CamError::InvalidFormat);
        };
        if pkt.seq != expected {
            return Err(CamError::OutOfSequence {
                expected,
                received: pkt.seq,
            });
        }
        Ok(error)
    }

    /// Waits for the EOT closing the camera's response.
    async fn await_eot(&mut self) -> CamResult<()> {
        let pkt = self.recv_packet().await?;
        let PacketBody::Eot(_) = pkt.body else {
            return Err(CamError::InvalidFormat);
        };
        if pkt.seq != self.ack_sequence {
            return Err(CamError::OutOfSequence {
                expected: self.ack_sequence,
                received: pkt.seq,
            });
        }
        Ok(())
    }

    /// Sends one logical message: envelope, fragments, EOT, ACK wait.
    async fn send_message(&mut self, mtype: MessageType, payload: &[u8]) -> CamResult<()> {
        let envelope = mtype.envelope();
        let mut message = Vec::with_capacity(16 + payload.len());
        message.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        message.push(envelope[0]);
        message.extend_from_slice(&[0x00, 0x00]);
        message.push(envelope[1]); // direction: PC to camera
        message.extend_from_slice(&((payload.len() + 16) as u16).to_le_bytes());
        message.extend_from_slice(&[0x00, 0x00]);
        message.extend_from_slice(&envelope[3..7]);
        message.extend_from_slice(payload);

        self.frag_sequence = 0;
        for chunk in message.chunks(FRAG_CAPACITY) {
            let mut fragment = Vec::with_capacity(DATA_OFFSET + chunk.len());
            fragment.push(self.frag_sequence);
            fragment.push(PacketType::Message as u8);
            fragment.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
            fragment.extend_from_slice(chunk);
            self.frag_sequence = self.frag_sequence.wrapping_add(1);
            self.framer.send_frame(&fragment).await?;
        }

        self.send_eot().await?;
        let ack = self.await_ack().await?;
        if ack != ACK_ERROR_NONE {
            log::warn!("camera acknowledged {mtype:?} with error {ack:#04x}");
        }
        Ok(())
    }

    /// Receives one clean data message. Small operations get single-fragment
    /// responses, so there is no retransmission path here.
    async fn recv_message(&mut self) -> CamResult<Vec<u8>> {
        let pkt = self.recv_packet().await?;
        if !pkt.cksum_ok {
            return Err(CamError::InvalidFormat);
        }
        match pkt.body {
            PacketBody::Message(data) | PacketBody::Init(data) => Ok(data),
            _ => Err(CamError::InvalidFormat),
        }
    }

    /// One full request/response exchange for the small operations.
    async fn exchange(&mut self, mtype: MessageType, payload: &[u8]) -> CamResult<Vec<u8>> {
        self.send_message(mtype, payload).await?;
        let data = self.recv_message().await?;
        self.await_eot().await?;
        self.send_ack(ACK_ERROR_NONE).await?;
        Ok(data)
    }

    /// Receives fragments until the camera's EOT and acknowledges the group:
    /// retry-all if any fragment arrived corrupted, clean otherwise.
    async fn recv_group(&mut self) -> CamResult<Group> {
        let mut fragments = Vec::new();
        let mut corrupted = false;
        loop {
            let pkt = self.recv_packet().await?;
            match pkt.body {
                PacketBody::Message(data) => {
                    if pkt.cksum_ok {
                        fragments.push(data);
                    } else {
                        corrupted = true;
                    }
                }
                PacketBody::Eot(_) => {
                    if corrupted {
                        self.send_ack(ACK_ERROR_RETRY_ALL).await?;
                        return Ok(Group::Corrupted);
                    }
                    self.send_ack(ACK_ERROR_NONE).await?;
                    return Ok(Group::Clean(fragments));
                }
                _ => return Err(CamError::InvalidFormat),
            }
        }
    }

    /// Wakes the camera, negotiates the line speed and verifies the link.
    /// This must run before any other operation.
    pub async fn establish(&mut self, speed: SerialSpeed) -> CamResult<()> {
        let a50 = self.framer.is_byte_at_a_time();
        self.framer.drain_input().await;
        self.framer.set_read_timeout(if a50 {
            SYNC_POLL_INTERVAL_A50
        } else {
            SYNC_POLL_INTERVAL
        });

        log::info!("waking the camera");
        let mut tries = 0;
        let init = loop {
            self.framer.write_raw(&WAKE_SEQUENCE).await?;
            match self.recv_packet().await {
                Ok(pkt) => break pkt,
                Err(CamError::Timeout(_)) => {
                    tries += 1;
                    if tries == SYNC_PING_RETRY_LIMIT * 4 {
                        return Err(CamError::SyncFailed { tries });
                    }
                }
                Err(e) => return Err(e),
            }
        };
        if let PacketBody::Init(data) | PacketBody::Message(data) = &init.body {
            if let Ok(id) = util::cstr(data, 22) {
                log::info!("camera answered: {id}");
            }
        }
        let _ = self.framer.recv_frame().await?; // the EOT after the greeting
        self.send_ack(ACK_ERROR_NONE).await?;

        log::info!("switching to {} baud", speed.baud());
        self.framer.write_raw(speed.switch_command()).await?;
        self.send_eot().await?;
        let _ = self.framer.recv_frame().await;

        self.framer.set_line_speed(speed.baud())?;
        if speed == SerialSpeed::B115200 {
            // Applied twice; some cameras miss the first reconfiguration.
            self.framer.set_line_speed(speed.baud())?;
        }
        if a50 {
            sleep(Duration::from_secs(1)).await;
        }

        self.framer.set_read_timeout(SYNC_READ_TIMEOUT);
        let mut tries = 0;
        loop {
            self.send_ping().await?;
            match self.framer.recv_frame().await {
                Ok(_) => break,
                Err(CamError::Timeout(_)) => {
                    // The ping went unanswered; reuse its sequence number.
                    self.eot_sequence = self.eot_sequence.wrapping_sub(1);
                    tries += 1;
                    if tries == SYNC_PING_RETRY_LIMIT {
                        return Err(CamError::SyncFailed { tries });
                    }
                }
                Err(e) => return Err(e),
            }
        }

        self.framer.set_read_timeout(SERIAL_READ_TIMEOUT);
        log::info!("serial link established");
        Ok(())
    }

    /// Powers the camera down. The sequence is not a regular message and
    /// gets no reply.
    pub async fn switch_off(&mut self) -> CamResult<()> {
        self.framer.write_raw(&SWITCH_OFF_PART1).await?;
        self.framer.write_raw(&SWITCH_OFF_PART2).await?;
        sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    pub async fn ping(&mut self) -> CamResult<()> {
        self.send_ping().await?;
        self.framer.recv_frame().await?;
        Ok(())
    }

    pub async fn identify(&mut self) -> CamResult<CameraId> {
        let data = self.exchange(MessageType::CameraId, &[]).await?;
        let model = util::cstr(&data, 28)?;
        let firmware = format!(
            "{}.{}.{}.{}",
            util::byte(&data, 27)?,
            util::byte(&data, 26)?,
            util::byte(&data, 25)?,
            util::byte(&data, 24)?
        );
        Ok(CameraId {
            model,
            firmware,
            owner: None,
        })
    }

    /// Returns the camera's disk, e.g. `D:\`.
    pub async fn get_disk(&mut self) -> CamResult<String> {
        let data = self.exchange(MessageType::GetDisk, &[]).await?;
        util::cstr(&data, 20)
    }

    pub async fn disk_info(&mut self, drive: char) -> CamResult<DiskInfo> {
        let payload = [drive as u8, b':', b'\\', 0x00];
        let data = self.exchange(MessageType::DiskInfo, &payload).await?;
        if util::byte(&data, MSG_STATUS_OFFSET)? == 0x87 {
            return Err(CamError::NotFound);
        }
        Ok(DiskInfo {
            capacity: util::be32(&data, 20)?,
            available: util::be32(&data, 24)?,
        })
    }

    pub async fn power_status(&mut self) -> CamResult<PowerStatus> {
        let data = self.exchange(MessageType::PowerStatus, &[]).await?;
        Ok(PowerStatus {
            good: util::byte(&data, 20)? == 0x06,
            ac: util::byte(&data, 23)? == 0x10,
        })
    }

    /// The camera clock as seconds since the epoch, in the camera's local
    /// time.
    pub async fn get_date(&mut self) -> CamResult<i64> {
        let data = self.exchange(MessageType::GetDate, &[]).await?;
        Ok(util::be32(&data, 20)? as i64)
    }

    pub async fn mkdir(&mut self, path: &str) -> CamResult<()> {
        let data = self
            .exchange(MessageType::Mkdir, &nul_terminated(path))
            .await?;
        match util::byte(&data, MSG_STATUS_OFFSET)? {
            0x00 => Ok(()),
            status => Err(CamError::CommandFailed { status }),
        }
    }

    pub async fn rmdir(&mut self, path: &str) -> CamResult<()> {
        let data = self
            .exchange(MessageType::Rmdir, &nul_terminated(path))
            .await?;
        match util::byte(&data, MSG_STATUS_OFFSET)? {
            0x00 => Ok(()),
            status => Err(CamError::CommandFailed { status }),
        }
    }

    pub async fn delete(&mut self, path: &str) -> CamResult<()> {
        // The response to a deletion carries no usable status.
        let _ = self
            .exchange(MessageType::Delete, &nul_terminated(path))
            .await?;
        Ok(())
    }

    pub async fn set_attributes(&mut self, path: &str, attributes: u8) -> CamResult<()> {
        let mut payload = vec![attributes, 0x00, 0x00, 0x00];
        payload.extend_from_slice(&nul_terminated(path));
        let _ = self.exchange(MessageType::SetAttrib, &payload).await?;
        Ok(())
    }

    /// Fetches the raw listing blob for `path`; the caller decodes it.
    pub async fn list(&mut self, path: &str) -> CamResult<Vec<u8>> {
        let mut payload = vec![DL_NO_RECURSION];
        payload.extend_from_slice(path.as_bytes());
        payload.extend_from_slice(&[0x00, 0x00, 0x00]);
        self.send_message(MessageType::ListWithDate, &payload).await?;

        loop {
            match self.recv_group().await? {
                Group::Corrupted => {
                    log::warn!("corrupted listing group, retransmission requested");
                }
                Group::Clean(fragments) => {
                    let blob = fragments.concat();
                    if util::byte(&blob, 21)? != 0x80 {
                        return Err(CamError::NotFound);
                    }
                    return Ok(blob);
                }
            }
        }
    }

    /// Downloads a file or its thumbnail; the request byte alone selects
    /// which, the envelope is the same for both. Data arrives as a series
    /// of fragment groups; each group's first fragment carries a block
    /// header with the total size. A corrupted group is retransmitted and
    /// the output rolled back to the last acknowledged block boundary.
    pub async fn download(
        &mut self,
        path: &str,
        kind: TransferKind,
        progress: &mut ProgressReporter,
    ) -> CamResult<Vec<u8>> {
        let mut request = vec![0u8; 8];
        request[0] = kind as u8;
        request[5] = (path.len() + 1) as u8;
        request.extend_from_slice(path.as_bytes());
        request.push(0x00);
        self.send_message(MessageType::Image, &request).await?;

        let mut out: Vec<u8> = Vec::new();
        let mut state: Option<TransferState> = None;
        let mut first_group = true;
        loop {
            match self.recv_group().await? {
                Group::Corrupted => {
                    log::warn!("corrupted download group, retransmission requested");
                    if let Some(state) = state.as_mut() {
                        out.truncate(state.rollback() as usize);
                    }
                }
                Group::Clean(fragments) => {
                    for (i, fragment) in fragments.iter().enumerate() {
                        let payload = if i == 0 {
                            if first_group && util::byte(fragment, MSG_STATUS_OFFSET)? != 0 {
                                return Err(CamError::NotFound);
                            }
                            let total = util::be32(fragment, 20)?;
                            if state.is_none() {
                                log::info!("downloading {path}, {total} bytes");
                                state = Some(TransferState::new(total as u64));
                                out.reserve(total as usize);
                            }
                            fragment
                                .get(DOWNLOAD_HEADER_LEN..)
                                .ok_or(CamError::InvalidFormat)?
                        } else {
                            &fragment[..]
                        };
                        out.extend_from_slice(payload);
                        let state = state.as_mut().ok_or(CamError::InvalidFormat)?;
                        state.advance(payload.len() as u64);
                        progress.report(state.received(), state.total());
                    }
                    let state = state.as_mut().ok_or(CamError::InvalidFormat)?;
                    state.commit();
                    first_group = false;
                    if state.is_complete() {
                        out.truncate(state.total() as usize);
                        return Ok(out);
                    }
                }
            }
        }
    }

    /// Uploads `content` to `target` on the camera, one exchange per
    /// 800-byte slice.
    pub async fn upload(
        &mut self,
        target: &str,
        content: &[u8],
        progress: &mut ProgressReporter,
    ) -> CamResult<()> {
        let total = content.len() as u64;
        let mut offset: u32 = 0;
        for chunk in content.chunks(SERIAL_UPLOAD_CHUNK) {
            let mut payload = Vec::with_capacity(12 + target.len() + 1 + chunk.len());
            payload.extend_from_slice(&2u32.to_be_bytes());
            payload.extend_from_slice(&offset.to_be_bytes());
            payload.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            payload.extend_from_slice(&nul_terminated(target));
            payload.extend_from_slice(chunk);
            let _ = self.exchange(MessageType::Upload, &payload).await?;

            offset += chunk.len() as u32;
            progress.report(offset as u64, total);
        }
        Ok(())
    }
}

fn nul_terminated(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0x00);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{ESCAPE_MASK, FRAME_END, FRAME_ESCAPE, FRAME_START};
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn protocol() -> (SerialProtocol<DuplexStream>, DuplexStream) {
        let (ours, peer) = tokio::io::duplex(64 * 1024);
        (SerialProtocol::new(SerialFramer::new(ours, false)), peer)
    }

    fn escape_into(wire: &mut Vec<u8>, content: &[u8]) {
        for &byte in content {
            if byte == FRAME_ESCAPE || byte == FRAME_START || byte == FRAME_END {
                wire.push(FRAME_ESCAPE);
                wire.push(byte ^ ESCAPE_MASK);
            } else {
                wire.push(byte);
            }
        }
    }

    /// Wire image of a well-formed frame for the given content.
    fn frame_bytes(content: &[u8]) -> Vec<u8> {
        let mut protected = content.to_vec();
        checksum::append(&mut protected);
        let mut wire = vec![FRAME_START];
        escape_into(&mut wire, &protected);
        wire.push(FRAME_END);
        wire
    }

    /// Same, but with the checksum damaged.
    fn corrupt_frame_bytes(content: &[u8]) -> Vec<u8> {
        let mut protected = content.to_vec();
        checksum::append(&mut protected);
        let crc_pos = protected.len() - 1;
        protected[crc_pos] ^= 0xFF;
        let mut wire = vec![FRAME_START];
        escape_into(&mut wire, &protected);
        wire.push(FRAME_END);
        wire
    }

    fn msg_fragment(seq: u8, data: &[u8]) -> Vec<u8> {
        let mut content = vec![seq, PacketType::Message as u8];
        content.extend_from_slice(&(data.len() as u16).to_le_bytes());
        content.extend_from_slice(data);
        content
    }

    fn eot(seq: u8) -> Vec<u8> {
        vec![seq, PacketType::Eot as u8, 0x01, 0x00, 0x00, 0x00]
    }

    fn ack(seq: u8, error: u8) -> Vec<u8> {
        vec![seq, PacketType::Ack as u8, error, 0x00, 0x00, 0x00]
    }

    /// Reads one frame from the peer side and returns its content without
    /// the checksum, asserting the checksum was valid.
    async fn peer_read_frame(peer: &mut DuplexStream) -> Vec<u8> {
        loop {
            if peer.read_u8().await.unwrap() == FRAME_START {
                break;
            }
        }
        let mut content = Vec::new();
        loop {
            match peer.read_u8().await.unwrap() {
                FRAME_END => break,
                FRAME_ESCAPE => content.push(peer.read_u8().await.unwrap() ^ ESCAPE_MASK),
                byte => content.push(byte),
            }
        }
        checksum::verify(&content)
            .expect("peer received a frame with a bad checksum")
            .to_vec()
    }

    /// Response message with `data.len() + 16` bytes: the 16-byte envelope
    /// echo (zeroed) followed by `data` at offset 16.
    fn response_body(data: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 16];
        body.extend_from_slice(data);
        body
    }

    #[tokio::test]
    async fn exchange_runs_the_full_sequence() {
        let (mut proto, mut peer) = protocol();

        let camera = async {
            // Request: one fragment, then our EOT.
            let frag = peer_read_frame(&mut peer).await;
            assert_eq!(frag[0], 0); // fragment sequence restarts per message
            assert_eq!(frag[1], PacketType::Message as u8);
            assert_eq!(frag[4], 0x02); // envelope marker
            assert_eq!(frag[8], serial_msg::GET_DISK[0]); // message type byte
            let sent_eot = peer_read_frame(&mut peer).await;
            assert_eq!(sent_eot, eot(0));

            peer.write_all(&frame_bytes(&ack(0, ACK_ERROR_NONE)))
                .await
                .unwrap();

            let mut body = response_body(&[0, 0, 0, 0]);
            body.extend_from_slice(b"D:\\\0");
            peer.write_all(&frame_bytes(&msg_fragment(0, &body)))
                .await
                .unwrap();
            peer.write_all(&frame_bytes(&eot(0))).await.unwrap();

            let our_ack = peer_read_frame(&mut peer).await;
            assert_eq!(our_ack, ack(0, ACK_ERROR_NONE));
        };

        let (_, disk) = tokio::join!(camera, proto.get_disk());
        assert_eq!(disk.unwrap(), "D:\\");
        // Both counters advanced exactly once.
        assert_eq!(proto.eot_sequence, 1);
        assert_eq!(proto.ack_sequence, 1);
    }

    #[tokio::test]
    async fn out_of_sequence_ack_is_an_error() {
        let (mut proto, mut peer) = protocol();

        let camera = async {
            let _ = peer_read_frame(&mut peer).await; // fragment
            let _ = peer_read_frame(&mut peer).await; // eot
            peer.write_all(&frame_bytes(&ack(7, ACK_ERROR_NONE)))
                .await
                .unwrap();
        };

        let (_, result) = tokio::join!(camera, proto.get_disk());
        assert!(matches!(
            result,
            Err(CamError::OutOfSequence {
                expected: 0,
                received: 7
            })
        ));
    }

    #[tokio::test]
    async fn corrupted_group_is_retransmitted_exactly_once() {
        let (mut proto, mut peer) = protocol();

        // 5-byte file in a single group: 36-byte block header + payload.
        let mut first_frag = vec![0u8; DOWNLOAD_HEADER_LEN];
        first_frag[20..24].copy_from_slice(&5u32.to_be_bytes()); // total
        first_frag[28..32].copy_from_slice(&5u32.to_be_bytes()); // block size
        first_frag.extend_from_slice(b"hello");

        let camera = async {
            let _ = peer_read_frame(&mut peer).await; // request fragment
            let _ = peer_read_frame(&mut peer).await; // our eot
            peer.write_all(&frame_bytes(&ack(0, ACK_ERROR_NONE)))
                .await
                .unwrap();

            // First attempt arrives corrupted.
            peer.write_all(&corrupt_frame_bytes(&msg_fragment(0, &first_frag)))
                .await
                .unwrap();
            peer.write_all(&frame_bytes(&eot(0))).await.unwrap();
            let retry = peer_read_frame(&mut peer).await;
            assert_eq!(retry, ack(0, ACK_ERROR_RETRY_ALL));

            // Retransmission is clean.
            peer.write_all(&frame_bytes(&msg_fragment(0, &first_frag)))
                .await
                .unwrap();
            peer.write_all(&frame_bytes(&eot(0))).await.unwrap();
            let fin = peer_read_frame(&mut peer).await;
            assert_eq!(fin, ack(0, ACK_ERROR_NONE));
        };

        let mut progress = ProgressReporter::default();
        let (_, data) = tokio::join!(
            camera,
            proto.download("D:\\DCIM\\IMG_0001.JPG", TransferKind::Image, &mut progress)
        );
        assert_eq!(data.unwrap(), b"hello");
        // The retry-all ACK did not advance the counter.
        assert_eq!(proto.ack_sequence, 1);
    }

    #[tokio::test]
    async fn missing_file_download_is_not_found() {
        let (mut proto, mut peer) = protocol();

        let mut first_frag = vec![0u8; DOWNLOAD_HEADER_LEN];
        first_frag[MSG_STATUS_OFFSET] = 0x87;

        let camera = async {
            let _ = peer_read_frame(&mut peer).await;
            let _ = peer_read_frame(&mut peer).await;
            peer.write_all(&frame_bytes(&ack(0, ACK_ERROR_NONE)))
                .await
                .unwrap();
            peer.write_all(&frame_bytes(&msg_fragment(0, &first_frag)))
                .await
                .unwrap();
            peer.write_all(&frame_bytes(&eot(0))).await.unwrap();
            let _ = peer_read_frame(&mut peer).await; // clean-group ack
        };

        let mut progress = ProgressReporter::default();
        let (_, result) = tokio::join!(
            camera,
            proto.download("D:\\NOPE.JPG", TransferKind::Image, &mut progress)
        );
        assert!(matches!(result, Err(CamError::NotFound)));
    }

    #[tokio::test]
    async fn thumbnail_request_uses_the_image_envelope() {
        let (mut proto, mut peer) = protocol();

        let mut first_frag = vec![0u8; DOWNLOAD_HEADER_LEN];
        first_frag[20..24].copy_from_slice(&3u32.to_be_bytes());
        first_frag[28..32].copy_from_slice(&3u32.to_be_bytes());
        first_frag.extend_from_slice(b"jpg");

        let camera = async {
            let frag = peer_read_frame(&mut peer).await;
            // Envelope salt: thumbnails go out under the image envelope,
            // only the request byte differs.
            assert_eq!(&frag[16..20], &serial_msg::IMAGE[3..7]);
            assert_eq!(frag[8], serial_msg::IMAGE[0]);
            assert_eq!(frag[20], 0x01); // thumbnail request byte
            let _ = peer_read_frame(&mut peer).await; // our eot
            peer.write_all(&frame_bytes(&ack(0, ACK_ERROR_NONE)))
                .await
                .unwrap();
            peer.write_all(&frame_bytes(&msg_fragment(0, &first_frag)))
                .await
                .unwrap();
            peer.write_all(&frame_bytes(&eot(0))).await.unwrap();
            let _ = peer_read_frame(&mut peer).await; // clean-group ack
        };

        let mut progress = ProgressReporter::default();
        let (_, data) = tokio::join!(
            camera,
            proto.download("D:\\DCIM\\IMG_0001.JPG", TransferKind::Thumbnail, &mut progress)
        );
        assert_eq!(data.unwrap(), b"jpg");
    }

    #[tokio::test]
    async fn establish_negotiates_speed_and_pings() {
        let (mut proto, mut peer) = protocol();

        let camera = async {
            // Wake: swallow the UUUU burst, then greet.
            let mut wake = [0u8; 4];
            peer.read_exact(&mut wake).await.unwrap();
            assert_eq!(&wake, b"UUUU");
            let mut greeting = vec![0, PacketType::Init as u8, 60, 0];
            greeting.resize(4 + 60, 0);
            greeting[26..26 + 8].copy_from_slice(b"Canon\0\0\0");
            peer.write_all(&frame_bytes(&greeting)).await.unwrap();
            peer.write_all(&frame_bytes(&eot(0))).await.unwrap();
            let first_ack = peer_read_frame(&mut peer).await;
            assert_eq!(first_ack, ack(0, ACK_ERROR_NONE));

            // Speed switch: magic bytes arrive raw, then our EOT.
            let mut magic = vec![0u8; consts::speed::B115200.len()];
            peer.read_exact(&mut magic).await.unwrap();
            assert_eq!(&magic, consts::speed::B115200);
            let sent_eot = peer_read_frame(&mut peer).await;
            assert_eq!(sent_eot, eot(0));
            peer.write_all(&frame_bytes(&ack(0, ACK_ERROR_NONE)))
                .await
                .unwrap();

            // Ping after the speed change.
            let ping = peer_read_frame(&mut peer).await;
            assert_eq!(ping, vec![1, PacketType::Eot as u8, 0, 0, 0, 0]);
            peer.write_all(&frame_bytes(&ack(1, ACK_ERROR_NONE)))
                .await
                .unwrap();
        };

        let (_, result) = tokio::join!(camera, proto.establish(SerialSpeed::B115200));
        result.unwrap();
        assert_eq!(proto.eot_sequence, 2);
        assert_eq!(proto.ack_sequence, 1);
    }
}
