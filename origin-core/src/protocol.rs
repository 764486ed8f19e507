//! Wire model for the intercepted client connection.
//!
//! The transport library parses raw frames into [`Packet`]s made of ordered
//! fields and delivers them, together with room-manager events, as a stream
//! of [`TransportEvent`]s. Outbound traffic is handed back as structured
//! [`OutboundPacket`]s through a [`PacketSender`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors raised while reading fields out of a packet.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("packet exhausted while reading {expected}")]
    Exhausted { expected: &'static str },

    #[error("expected {expected} field, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid user index: {0:?}")]
    InvalidIndex(String),
}

/// Errors raised by the transport when sending.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("packet rejected: {0}")]
    Rejected(String),
}

/// Messages sent by the server that the engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Incoming {
    /// Room talk: (index, message).
    Chat,
    /// Whisper: (index, message).
    Whisper,
    /// Shout: (index, message).
    Shout,
    /// Room entry acknowledged.
    RoomReady,
    /// Count-prefixed list of [`RoomUser`] records.
    Users,
    /// A user left; carries the index as text.
    UserLeft,
    /// Header 4069: chat muted for a number of seconds.
    Muted,
    /// Header 3285: chat attempted while still muted.
    StillMuted,
    /// Anything else, by header id.
    Other(u16),
}

/// Messages sent by the client that the engine intercepts or emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outgoing {
    Chat,
    Shout,
    Whisper,
    Move,
    UpdateFigure,
    GetFlatInfo,
    GoToFlat,
    Other(u16),
}

/// Packet header, tagged by direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Header {
    In(Incoming),
    Out(Outgoing),
}

/// A single decoded field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Int(i32),
    Str(String),
    Bytes(Vec<u8>),
}

impl Field {
    fn kind(&self) -> &'static str {
        match self {
            Field::Int(_) => "int",
            Field::Str(_) => "string",
            Field::Bytes(_) => "bytes",
        }
    }
}

/// A parsed packet with a read cursor over its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub header: Header,
    #[serde(default)]
    fields: Vec<Field>,
    #[serde(skip)]
    position: usize,
}

impl Packet {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            fields: Vec::new(),
            position: 0,
        }
    }

    pub fn incoming(header: Incoming) -> Self {
        Self::new(Header::In(header))
    }

    pub fn outgoing(header: Outgoing) -> Self {
        Self::new(Header::Out(header))
    }

    /// Append an integer field.
    pub fn int(mut self, value: i32) -> Self {
        self.fields.push(Field::Int(value));
        self
    }

    /// Append a string field.
    pub fn string(mut self, value: impl Into<String>) -> Self {
        self.fields.push(Field::Str(value.into()));
        self
    }

    /// Append a raw byte field.
    pub fn bytes(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.fields.push(Field::Bytes(value.into()));
        self
    }

    fn next(&mut self, expected: &'static str) -> Result<&Field, ProtocolError> {
        let field = self
            .fields
            .get(self.position)
            .ok_or(ProtocolError::Exhausted { expected })?;
        self.position += 1;
        Ok(field)
    }

    pub fn read_int(&mut self) -> Result<i32, ProtocolError> {
        match self.next("int")? {
            Field::Int(v) => Ok(*v),
            other => Err(ProtocolError::TypeMismatch {
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        match self.next("string")? {
            Field::Str(s) => Ok(s.clone()),
            other => Err(ProtocolError::TypeMismatch {
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    /// Read a raw field. String fields are returned as their UTF-8 bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        match self.next("bytes")? {
            Field::Bytes(b) => Ok(b.clone()),
            Field::Str(s) => Ok(s.as_bytes().to_vec()),
            other => Err(ProtocolError::TypeMismatch {
                expected: "bytes",
                found: other.kind(),
            }),
        }
    }
}

/// Outcome of an intercepted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Block,
}

/// A packet held by the transport until its handler returns.
#[derive(Debug)]
pub struct Intercept {
    pub packet: Packet,
    blocked: bool,
    reply: Option<oneshot::Sender<Verdict>>,
}

impl Intercept {
    pub fn new(packet: Packet) -> Self {
        Self {
            packet,
            blocked: false,
            reply: None,
        }
    }

    /// Attach a channel on which the final verdict is reported.
    pub fn with_reply(mut self, reply: oneshot::Sender<Verdict>) -> Self {
        self.reply = Some(reply);
        self
    }

    /// Veto propagation of this packet.
    pub fn block(&mut self) {
        self.blocked = true;
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Release the packet, reporting the verdict to the transport.
    pub fn finish(self) -> Verdict {
        let verdict = if self.blocked {
            Verdict::Block
        } else {
            Verdict::Forward
        };
        if let Some(reply) = self.reply {
            let _ = reply.send(verdict);
        }
        verdict
    }
}

/// Entity kind code carried by room user records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Player,
    Other(i32),
}

impl EntityKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => EntityKind::Player,
            other => EntityKind::Other(other),
        }
    }
}

/// One record of the "users" packet.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomUser {
    pub index: i32,
    pub name: String,
    pub figure: String,
    pub gender: String,
    pub custom: String,
    pub x: i32,
    pub y: i32,
    pub z: f64,
    pub pool_figure: String,
    pub badge_code: String,
    pub kind: EntityKind,
}

impl RoomUser {
    /// Read one record in wire order.
    pub fn read(packet: &mut Packet) -> Result<Self, ProtocolError> {
        let index = packet.read_int()?;
        let name = packet.read_string()?;
        let figure = packet.read_string()?;
        let gender = packet.read_string()?;
        let custom = packet.read_string()?;
        let x = packet.read_int()?;
        let y = packet.read_int()?;
        let z = packet.read_string()?.trim().parse().unwrap_or(0.0);
        let pool_figure = packet.read_string()?;
        let badge_code = packet.read_string()?;
        let kind = EntityKind::from_code(packet.read_int()?);

        Ok(Self {
            index,
            name,
            figure,
            gender,
            custom,
            x,
            y,
            z,
            pool_figure,
            badge_code,
            kind,
        })
    }

    /// Append this record to a packet in wire order.
    pub fn write(&self, packet: Packet) -> Packet {
        let kind = match self.kind {
            EntityKind::Player => 1,
            EntityKind::Other(code) => code,
        };
        packet
            .int(self.index)
            .string(&self.name)
            .string(&self.figure)
            .string(&self.gender)
            .string(&self.custom)
            .int(self.x)
            .int(self.y)
            .string(self.z.to_string())
            .string(&self.pool_figure)
            .string(&self.badge_code)
            .int(kind)
    }

    pub fn is_player(&self) -> bool {
        self.kind == EntityKind::Player
    }
}

/// Tile coordinates of a room entity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Tile {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub z: f64,
}

/// An entity as tracked by the transport's room manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEntity {
    pub index: i32,
    pub name: String,
    #[serde(default)]
    pub figure: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default)]
    pub tile: Tile,
}

/// The operator's own profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub figure: String,
}

/// Client details reported on connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub identifier: String,
    pub version: String,
}

/// Everything the transport delivers to the engine.
#[derive(Debug)]
pub enum TransportEvent {
    Initialized { connected: bool },
    Activated,
    Connected {
        host: String,
        port: u16,
        client: ClientInfo,
    },
    Disconnected,
    Intercept(Intercept),
    EntitiesAdded(Vec<RoomEntity>),
    EntityUpdated(RoomEntity),
    ProfileUpdated(Profile),
}

/// An argument of an outbound packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    Str(String),
    Short(i16),
    Bytes(Vec<u8>),
}

/// A structured packet for the transport to encode and send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPacket {
    pub header: Outgoing,
    pub args: Vec<Arg>,
}

impl OutboundPacket {
    pub fn new(header: Outgoing, args: Vec<Arg>) -> Self {
        Self { header, args }
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self::new(Outgoing::Chat, vec![Arg::Str(text.into())])
    }

    pub fn shout(text: impl Into<String>) -> Self {
        Self::new(Outgoing::Shout, vec![Arg::Str(text.into())])
    }

    pub fn whisper(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            Outgoing::Whisper,
            vec![Arg::Str(recipient.into()), Arg::Str(text.into())],
        )
    }

    pub fn move_to(x: i16, y: i16) -> Self {
        Self::new(Outgoing::Move, vec![Arg::Short(x), Arg::Short(y)])
    }

    pub fn update_figure(figure: impl Into<String>) -> Self {
        Self::new(Outgoing::UpdateFigure, vec![Arg::Str(figure.into())])
    }

    pub fn go_to_flat(room_id: impl Into<Vec<u8>>) -> Self {
        Self::new(Outgoing::GoToFlat, vec![Arg::Bytes(room_id.into())])
    }
}

/// Outbound half of the transport.
///
/// Sends must not block; the transport queues the packet and returns.
pub trait PacketSender: Send + Sync {
    fn send(&self, packet: OutboundPacket) -> Result<(), TransportError>;
}
