//! loralink wire format: on-air frames for every radio exchange.
//!
//! These types ARE the protocol. Every frame is a one-byte type tag
//! followed by a fixed-layout payload whose shape is decided by the tag.
//! Nothing is self-describing beyond the tag and nothing is length
//! prefixed except the body chunk's `len` byte.
//!
//! The packed frame structs are private to this module: callers work with
//! [`Message`], and only [`Message::encode`] / [`Message::decode`] touch raw
//! bytes. Multi-byte fields are little-endian on the wire, enforced with
//! zerocopy's byteorder types, so the layout is identical on every host.

use std::fmt;
use std::mem::size_of;

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, F32, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::identity::{DeviceId, MAC_LEN};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum file bytes carried by one FileBody frame.
pub const CHUNK_SIZE: usize = 200;

/// Filename field width in a FileMeta frame (NUL-padded).
pub const MAX_FILENAME_LEN: usize = 40;

/// Device name field width in a Pairing frame (NUL-padded).
pub const MAX_DEVICE_NAME_LEN: usize = 10;

/// Channels in a vibrating-wire reading.
pub const VM_CHANNELS: usize = 3;

/// Channels in an ADC reading.
pub const ADC_CHANNELS: usize = 16;

/// Largest frame the codec ever produces.
pub const MAX_FRAME_LEN: usize = size_of::<FileBodyFrame>();

// ── Message Type ──────────────────────────────────────────────────────────────

/// Frame type tag, byte 0 of every frame.
///
/// Numbering is fixed by deployed firmware; gaps are tags that exist on
/// the air but have no layout this codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Pairing = 0,
    VmData = 1,
    AdcData = 2,
    FileMeta = 5,
    FileBody = 6,
    FileEnd = 7,
    Ack = 8,
    Reject = 9,
    TimeSync = 11,
    PollData = 12,
    PollConfig = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pairing),
            1 => Ok(Self::VmData),
            2 => Ok(Self::AdcData),
            5 => Ok(Self::FileMeta),
            6 => Ok(Self::FileBody),
            7 => Ok(Self::FileEnd),
            8 => Ok(Self::Ack),
            9 => Ok(Self::Reject),
            11 => Ok(Self::TimeSync),
            12 => Ok(Self::PollData),
            13 => Ok(Self::PollConfig),
            // 3, 4, 10, 14 and 15 are reserved: no fixed layout
            other => Err(WireError::UnknownTag(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// Frames that carry only the sender address: FileEnd, Ack, Reject,
/// PollData, PollConfig. Wire size: 7 bytes.
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct AddressFrame {
    msg_type: u8,
    mac: [u8; MAC_LEN],
}

assert_eq_size!(AddressFrame, [u8; 7]);

/// Wire size: 51 bytes.
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct FileMetaFrame {
    msg_type: u8,
    mac: [u8; MAC_LEN],
    filename: [u8; MAX_FILENAME_LEN],
    filesize: U32<LittleEndian>,
}

assert_eq_size!(FileMetaFrame, [u8; 51]);

/// Wire size: 208 bytes. `data` is always sent in full; only the first
/// `len` bytes are meaningful.
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct FileBodyFrame {
    msg_type: u8,
    mac: [u8; MAC_LEN],
    data: [u8; CHUNK_SIZE],
    len: u8,
}

assert_eq_size!(FileBodyFrame, [u8; 208]);

/// Broadcast pairing request, and the gateway's echoed response.
/// Wire size: 27 bytes.
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct PairingFrame {
    msg_type: u8,
    mac_origin: [u8; MAC_LEN],
    mac_master: [u8; MAC_LEN],
    pairing_key: U32<LittleEndian>,
    device_name: [u8; MAX_DEVICE_NAME_LEN],
}

assert_eq_size!(PairingFrame, [u8; 27]);

#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct VmReadingFrame {
    freq: F32<LittleEndian>,
    temp: F32<LittleEndian>,
}

/// Wire size: 35 bytes.
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct VmDataFrame {
    msg_type: u8,
    mac: [u8; MAC_LEN],
    timestamp: U32<LittleEndian>,
    readings: [VmReadingFrame; VM_CHANNELS],
}

assert_eq_size!(VmDataFrame, [u8; 35]);

/// Wire size: 75 bytes.
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct AdcDataFrame {
    msg_type: u8,
    mac: [u8; MAC_LEN],
    timestamp: U32<LittleEndian>,
    adc: [F32<LittleEndian>; ADC_CHANNELS],
}

assert_eq_size!(AdcDataFrame, [u8; 75]);

/// Gateway clock broadcast. Wire size: 12 bytes.
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct TimeSyncFrame {
    msg_type: u8,
    pairing_key: U32<LittleEndian>,
    year: U16<LittleEndian>,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

assert_eq_size!(TimeSyncFrame, [u8; 12]);

// ── Messages ──────────────────────────────────────────────────────────────────

/// Announces a file transfer: name and total size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub mac: DeviceId,
    filename: String,
    pub filesize: u32,
}

impl FileMeta {
    /// Fails if `filename` does not fit the 40-byte field.
    pub fn new(mac: DeviceId, filename: impl Into<String>, filesize: u32) -> Result<Self, WireError> {
        let filename = filename.into();
        check_text_len("filename", &filename, MAX_FILENAME_LEN)?;
        Ok(Self { mac, filename, filesize })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

/// One chunk of file data.
#[derive(Clone, PartialEq, Eq)]
pub struct FileBody {
    pub mac: DeviceId,
    data: [u8; CHUNK_SIZE],
    len: u8,
}

impl FileBody {
    /// Fails if `data` is longer than [`CHUNK_SIZE`].
    pub fn new(mac: DeviceId, data: &[u8]) -> Result<Self, WireError> {
        if data.len() > CHUNK_SIZE {
            return Err(WireError::FieldTooLong {
                field: "data",
                len: data.len(),
                max: CHUNK_SIZE,
            });
        }
        let mut buf = [0u8; CHUNK_SIZE];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            mac,
            data: buf,
            len: data.len() as u8,
        })
    }

    /// The meaningful bytes of this chunk.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for FileBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBody")
            .field("mac", &self.mac)
            .field("len", &self.len)
            .finish()
    }
}

/// Pairing request (node → broadcast) or response (gateway → node).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub mac_origin: DeviceId,
    pub mac_master: DeviceId,
    pub pairing_key: u32,
    device_name: String,
}

impl Pairing {
    /// A node's broadcast request. `mac_master` is left as broadcast until
    /// a gateway answers.
    pub fn request(origin: DeviceId, pairing_key: u32, device_name: impl Into<String>) -> Result<Self, WireError> {
        let device_name = device_name.into();
        check_text_len("device_name", &device_name, MAX_DEVICE_NAME_LEN)?;
        Ok(Self {
            mac_origin: origin,
            mac_master: DeviceId::BROADCAST,
            pairing_key,
            device_name,
        })
    }

    /// True for requests that no gateway has answered yet.
    pub fn is_request(&self) -> bool {
        self.mac_master.is_broadcast()
    }

    /// The gateway's echo of this request, stamped with the gateway address.
    pub fn response(&self, gateway: DeviceId) -> Self {
        Self {
            mac_master: gateway,
            ..self.clone()
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmReading {
    pub freq: f32,
    pub temp: f32,
}

/// Vibrating-wire sensor sample, one reading per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct VmData {
    pub mac: DeviceId,
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    pub readings: [VmReading; VM_CHANNELS],
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdcData {
    pub mac: DeviceId,
    pub timestamp: u32,
    pub adc: [f32; ADC_CHANNELS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSync {
    pub pairing_key: u32,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Every frame the radio link carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Pairing(Pairing),
    VmData(VmData),
    AdcData(AdcData),
    FileMeta(FileMeta),
    FileBody(FileBody),
    FileEnd { mac: DeviceId },
    Ack { mac: DeviceId },
    Reject { mac: DeviceId },
    TimeSync(TimeSync),
    PollData { mac: DeviceId },
    PollConfig { mac: DeviceId },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Pairing(_) => MessageType::Pairing,
            Message::VmData(_) => MessageType::VmData,
            Message::AdcData(_) => MessageType::AdcData,
            Message::FileMeta(_) => MessageType::FileMeta,
            Message::FileBody(_) => MessageType::FileBody,
            Message::FileEnd { .. } => MessageType::FileEnd,
            Message::Ack { .. } => MessageType::Ack,
            Message::Reject { .. } => MessageType::Reject,
            Message::TimeSync(_) => MessageType::TimeSync,
            Message::PollData { .. } => MessageType::PollData,
            Message::PollConfig { .. } => MessageType::PollConfig,
        }
    }

    /// The device address carried in the frame. For Pairing this is the
    /// originating node; TimeSync carries none.
    pub fn device(&self) -> Option<DeviceId> {
        match self {
            Message::Pairing(p) => Some(p.mac_origin),
            Message::VmData(v) => Some(v.mac),
            Message::AdcData(a) => Some(a.mac),
            Message::FileMeta(m) => Some(m.mac),
            Message::FileBody(b) => Some(b.mac),
            Message::FileEnd { mac }
            | Message::Ack { mac }
            | Message::Reject { mac }
            | Message::PollData { mac }
            | Message::PollConfig { mac } => Some(*mac),
            Message::TimeSync(_) => None,
        }
    }

    /// Serialize to the exact fixed-layout frame for this variant.
    pub fn encode(&self) -> Vec<u8> {
        let tag = u8::from(self.message_type());
        match self {
            Message::FileEnd { mac }
            | Message::Ack { mac }
            | Message::Reject { mac }
            | Message::PollData { mac }
            | Message::PollConfig { mac } => AddressFrame {
                msg_type: tag,
                mac: mac.0,
            }
            .as_bytes()
            .to_vec(),

            Message::FileMeta(m) => FileMetaFrame {
                msg_type: tag,
                mac: m.mac.0,
                filename: pad_text(&m.filename),
                filesize: U32::new(m.filesize),
            }
            .as_bytes()
            .to_vec(),

            Message::FileBody(b) => FileBodyFrame {
                msg_type: tag,
                mac: b.mac.0,
                data: b.data,
                len: b.len,
            }
            .as_bytes()
            .to_vec(),

            Message::Pairing(p) => PairingFrame {
                msg_type: tag,
                mac_origin: p.mac_origin.0,
                mac_master: p.mac_master.0,
                pairing_key: U32::new(p.pairing_key),
                device_name: pad_text(&p.device_name),
            }
            .as_bytes()
            .to_vec(),

            Message::VmData(v) => VmDataFrame {
                msg_type: tag,
                mac: v.mac.0,
                timestamp: U32::new(v.timestamp),
                readings: v.readings.map(|r| VmReadingFrame {
                    freq: F32::new(r.freq),
                    temp: F32::new(r.temp),
                }),
            }
            .as_bytes()
            .to_vec(),

            Message::AdcData(a) => AdcDataFrame {
                msg_type: tag,
                mac: a.mac.0,
                timestamp: U32::new(a.timestamp),
                adc: a.adc.map(F32::new),
            }
            .as_bytes()
            .to_vec(),

            Message::TimeSync(t) => TimeSyncFrame {
                msg_type: tag,
                pairing_key: U32::new(t.pairing_key),
                year: U16::new(t.year),
                month: t.month,
                day: t.day,
                hour: t.hour,
                minute: t.minute,
                second: t.second,
            }
            .as_bytes()
            .to_vec(),
        }
    }

    /// Parse a received frame.
    ///
    /// The tag is validated before any payload byte is interpreted. Bytes
    /// past the variant's fixed size are ignored; a frame shorter than that
    /// size is rejected rather than over-read.
    pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
        let tag = *bytes.first().ok_or(WireError::Empty)?;
        let msg_type = MessageType::try_from(tag)?;

        match msg_type {
            MessageType::FileEnd
            | MessageType::Ack
            | MessageType::Reject
            | MessageType::PollData
            | MessageType::PollConfig => {
                let frame: AddressFrame = read_frame(msg_type, bytes)?;
                let mac = DeviceId(frame.mac);
                Ok(match msg_type {
                    MessageType::FileEnd => Message::FileEnd { mac },
                    MessageType::Ack => Message::Ack { mac },
                    MessageType::Reject => Message::Reject { mac },
                    MessageType::PollData => Message::PollData { mac },
                    _ => Message::PollConfig { mac },
                })
            }

            MessageType::FileMeta => {
                let frame: FileMetaFrame = read_frame(msg_type, bytes)?;
                Ok(Message::FileMeta(FileMeta {
                    mac: DeviceId(frame.mac),
                    filename: unpad_text(&frame.filename)?,
                    filesize: frame.filesize.get(),
                }))
            }

            MessageType::FileBody => {
                let frame: FileBodyFrame = read_frame(msg_type, bytes)?;
                if frame.len as usize > CHUNK_SIZE {
                    return Err(WireError::BodyLengthOverflow(frame.len));
                }
                Ok(Message::FileBody(FileBody {
                    mac: DeviceId(frame.mac),
                    data: frame.data,
                    len: frame.len,
                }))
            }

            MessageType::Pairing => {
                let frame: PairingFrame = read_frame(msg_type, bytes)?;
                Ok(Message::Pairing(Pairing {
                    mac_origin: DeviceId(frame.mac_origin),
                    mac_master: DeviceId(frame.mac_master),
                    pairing_key: frame.pairing_key.get(),
                    device_name: unpad_text(&frame.device_name)?,
                }))
            }

            MessageType::VmData => {
                let frame: VmDataFrame = read_frame(msg_type, bytes)?;
                let readings = frame.readings;
                Ok(Message::VmData(VmData {
                    mac: DeviceId(frame.mac),
                    timestamp: frame.timestamp.get(),
                    readings: readings.map(|r| VmReading {
                        freq: r.freq.get(),
                        temp: r.temp.get(),
                    }),
                }))
            }

            MessageType::AdcData => {
                let frame: AdcDataFrame = read_frame(msg_type, bytes)?;
                let adc = frame.adc;
                Ok(Message::AdcData(AdcData {
                    mac: DeviceId(frame.mac),
                    timestamp: frame.timestamp.get(),
                    adc: adc.map(|v| v.get()),
                }))
            }

            MessageType::TimeSync => {
                let frame: TimeSyncFrame = read_frame(msg_type, bytes)?;
                Ok(Message::TimeSync(TimeSync {
                    pairing_key: frame.pairing_key.get(),
                    year: frame.year.get(),
                    month: frame.month,
                    day: frame.day,
                    hour: frame.hour,
                    minute: frame.minute,
                    second: frame.second,
                }))
            }
        }
    }
}

/// Fixed on-air size of a message type.
pub fn frame_len(msg_type: MessageType) -> usize {
    match msg_type {
        MessageType::FileEnd
        | MessageType::Ack
        | MessageType::Reject
        | MessageType::PollData
        | MessageType::PollConfig => size_of::<AddressFrame>(),
        MessageType::FileMeta => size_of::<FileMetaFrame>(),
        MessageType::FileBody => size_of::<FileBodyFrame>(),
        MessageType::Pairing => size_of::<PairingFrame>(),
        MessageType::VmData => size_of::<VmDataFrame>(),
        MessageType::AdcData => size_of::<AdcDataFrame>(),
        MessageType::TimeSync => size_of::<TimeSyncFrame>(),
    }
}

fn read_frame<F: FromBytes>(msg_type: MessageType, bytes: &[u8]) -> Result<F, WireError> {
    F::read_from_prefix(bytes).ok_or(WireError::Truncated {
        msg_type,
        expected: frame_len(msg_type),
        actual: bytes.len(),
    })
}

fn check_text_len(field: &'static str, text: &str, max: usize) -> Result<(), WireError> {
    if text.len() > max {
        return Err(WireError::FieldTooLong {
            field,
            len: text.len(),
            max,
        });
    }
    Ok(())
}

/// Copy into a NUL-padded field. Length was checked at construction.
fn pad_text<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = text.as_bytes();
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Read a NUL-padded field. A field filled to the brim has no terminator.
fn unpad_text(field: &[u8]) -> Result<String, WireError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|_| WireError::InvalidText)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when building or interpreting frames.
///
/// Receivers never answer a frame that fails to decode; these exist for
/// logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    #[error("{msg_type:?} frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        msg_type: MessageType,
        expected: usize,
        actual: usize,
    },

    #[error("file body length {0} exceeds the 200-byte chunk")]
    BodyLengthOverflow(u8),

    #[error("text field is not valid UTF-8")]
    InvalidText,

    #[error("{field} is {len} bytes, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
