use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Top level error for everything that can go wrong while reading a replay.
///
/// The input-format variants cover the outer `.dem` framing; everything that
/// happens further down (bit decoding, table flattening, entity updates)
/// arrives wrapped in the matching subsystem variant so callers can tell at
/// which stage a replay went bad.
#[derive(PartialEq, Debug, Clone)]
pub enum ParseError {
    /// The replay could not be opened at the given path
    FileNotAccessible(String),
    /// The file is smaller than the fixed demo header
    FileTooSmall(u64),
    /// The demo header id did not match the expected magic
    HeaderMismatch(String),
    /// The stream ended in the middle of a record
    UnexpectedEof,
    /// A varint or record length made no sense
    Corrupted(String),
    /// A Snappy or bzip2 payload failed to decompress
    InvalidCompression,
    /// A single message exceeded the decompression buffer limit
    MessageTooBig(usize),
    /// A protobuf message failed to decode
    Protobuf(prost::DecodeError),
    /// Failure with the section and byte offset where it happened
    Context(&'static str, u64, Box<ParseError>),

    Bitstream(BitstreamError),
    Property(PropertyError),
    Flatten(FlattenError),
    Entity(EntityError),
    StringTable(StringTableError),
    Dispatch(DispatchError),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::FileNotAccessible(path) => write!(f, "unable to open replay: {}", path),
            ParseError::FileTooSmall(size) => {
                write!(f, "file of {} bytes is too small to be a replay", size)
            }
            ParseError::HeaderMismatch(found) => {
                write!(f, "demo header id mismatch, found {:?}", found)
            }
            ParseError::UnexpectedEof => write!(f, "unexpected end of stream"),
            ParseError::Corrupted(what) => write!(f, "replay appears corrupted: {}", what),
            ParseError::InvalidCompression => write!(f, "payload decompression failed"),
            ParseError::MessageTooBig(size) => {
                write!(f, "message of {} bytes exceeds the buffer limit", size)
            }
            ParseError::Protobuf(e) => write!(f, "protobuf decode failed: {}", e),
            ParseError::Context(section, offset, e) => {
                write!(f, "could not decode {} at offset {}: {}", section, offset, e)
            }
            ParseError::Bitstream(e) => write!(f, "{}", e),
            ParseError::Property(e) => write!(f, "{}", e),
            ParseError::Flatten(e) => write!(f, "{}", e),
            ParseError::Entity(e) => write!(f, "{}", e),
            ParseError::StringTable(e) => write!(f, "{}", e),
            ParseError::Dispatch(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ParseError::Protobuf(e) => Some(e),
            ParseError::Context(_, _, e) => Some(e.as_ref()),
            ParseError::Bitstream(e) => Some(e),
            ParseError::Property(e) => Some(e),
            ParseError::Flatten(e) => Some(e),
            ParseError::Entity(e) => Some(e),
            ParseError::StringTable(e) => Some(e),
            ParseError::Dispatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<prost::DecodeError> for ParseError {
    fn from(e: prost::DecodeError) -> Self {
        ParseError::Protobuf(e)
    }
}

impl From<BitstreamError> for ParseError {
    fn from(e: BitstreamError) -> Self {
        ParseError::Bitstream(e)
    }
}

impl From<PropertyError> for ParseError {
    fn from(e: PropertyError) -> Self {
        ParseError::Property(e)
    }
}

impl From<FlattenError> for ParseError {
    fn from(e: FlattenError) -> Self {
        ParseError::Flatten(e)
    }
}

impl From<EntityError> for ParseError {
    fn from(e: EntityError) -> Self {
        ParseError::Entity(e)
    }
}

impl From<StringTableError> for ParseError {
    fn from(e: StringTableError) -> Self {
        ParseError::StringTable(e)
    }
}

impl From<DispatchError> for ParseError {
    fn from(e: DispatchError) -> Self {
        ParseError::Dispatch(e)
    }
}

/// Errors raised by the bit-level reader.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum BitstreamError {
    /// More bits were requested than remain in the stream, or than fit a
    /// single read
    Overflow { requested: usize, available: usize },
    /// The backing buffer exceeds the maximum size a single entity or
    /// string table update can plausibly carry
    DataTooLarge(usize),
}

impl Display for BitstreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BitstreamError::Overflow {
                requested,
                available,
            } => write!(
                f,
                "requested {} bits but only {} available",
                requested, available
            ),
            BitstreamError::DataTooLarge(size) => {
                write!(f, "unlikely large chunk of {} bytes submitted", size)
            }
        }
    }
}

impl Error for BitstreamError {}

/// Errors raised while decoding a single property value.
#[derive(PartialEq, Debug, Clone)]
pub enum PropertyError {
    /// The descriptor carries a type id outside the known set
    InvalidType(u32),
    /// The float coordinate encoding is not one we implement
    InvalidFloatCoord,
    /// A string length field exceeded the limit
    InvalidStringLength(u32),
    /// The 64 bit integer encoding is not one we implement
    InvalidInt64Type,
    /// An array carried an unnaturally large element count
    InvalidElementCount(u32),
    /// A typed accessor was called on a value of a different variant
    BadCast {
        requested: &'static str,
        actual: &'static str,
    },
    Bitstream(BitstreamError),
}

impl Display for PropertyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PropertyError::InvalidType(t) => write!(f, "property has unknown type {}", t),
            PropertyError::InvalidFloatCoord => {
                write!(f, "float coordinate encoding is not implemented")
            }
            PropertyError::InvalidStringLength(len) => {
                write!(f, "refusing to read property string of {} bytes", len)
            }
            PropertyError::InvalidInt64Type => write!(f, "int64 encoding is not implemented"),
            PropertyError::InvalidElementCount(count) => {
                write!(f, "unnaturally large array of {} elements", count)
            }
            PropertyError::BadCast { requested, actual } => {
                write!(f, "property requested as {} but holds {}", requested, actual)
            }
            PropertyError::Bitstream(e) => write!(f, "{}", e),
        }
    }
}

impl Error for PropertyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PropertyError::Bitstream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BitstreamError> for PropertyError {
    fn from(e: BitstreamError) -> Self {
        PropertyError::Bitstream(e)
    }
}

/// Errors raised while flattening send tables into their network layout.
#[derive(PartialEq, Debug, Clone)]
pub enum FlattenError {
    /// A property referenced a send table that never arrived
    UnknownTable(String),
    /// An array property has no preceding member to describe its elements
    InvalidArrayProp(String),
}

impl Display for FlattenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FlattenError::UnknownTable(name) => write!(f, "unknown send table: {}", name),
            FlattenError::InvalidArrayProp(table) => write!(
                f,
                "array property in {} has no previous member to define its element type",
                table
            ),
        }
    }
}

impl Error for FlattenError {}

/// Errors raised by the entity store and the packet-entities decoder.
#[derive(PartialEq, Debug, Clone)]
pub enum EntityError {
    /// A class id outside the reserved class range
    UnknownClassIndex(u32),
    /// An entity id beyond the slot capacity
    EntityIdTooLarge(u32),
    /// An entity property looked up by a name it does not have
    UnknownProperty(String),
    /// A wire field id beyond the flat table property count
    UnknownSendprop { field: u32, max: usize },
    /// The baseline instance table was not available yet
    BaselineNotFound,
    /// A class was looked up by a network name nothing registered
    InvalidDefinition(String),
    /// An update or delete addressed an empty entity slot
    InvalidId(u32),
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EntityError::UnknownClassIndex(id) => write!(f, "class index {} is out of range", id),
            EntityError::EntityIdTooLarge(id) => write!(f, "entity id {} is too large", id),
            EntityError::UnknownProperty(name) => {
                write!(f, "entity has no property named {}", name)
            }
            EntityError::UnknownSendprop { field, max } => write!(
                f,
                "field id {} is outside the flat table of {} properties",
                field, max
            ),
            EntityError::BaselineNotFound => write!(f, "baseline instance table not found"),
            EntityError::InvalidDefinition(name) => {
                write!(f, "no entity class is named {}", name)
            }
            EntityError::InvalidId(id) => {
                write!(f, "entity id {} addressed in update or delete is empty", id)
            }
        }
    }
}

impl Error for EntityError {}

/// Errors raised while applying string table deltas.
#[derive(PartialEq, Debug, Clone)]
pub enum StringTableError {
    /// Lookup through a key the table does not contain
    UnknownKey(String),
    /// Lookup through an index the table does not contain
    UnknownIndex(i32),
    /// A full update tried to back-reference a key that cannot exist yet
    KeyMissing,
    /// A substring reference with out-of-range specs
    MalformedSubstring(u32, u32),
    /// A value length that would overflow the entry buffer
    ValueOverflow(u32),
    Bitstream(BitstreamError),
}

impl Display for StringTableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StringTableError::UnknownKey(key) => {
                write!(f, "string table has no key {:?}", key)
            }
            StringTableError::UnknownIndex(index) => {
                write!(f, "string table has no index {}", index)
            }
            StringTableError::KeyMissing => {
                write!(f, "string table key missing in full update")
            }
            StringTableError::MalformedSubstring(index, length) => write!(
                f,
                "malformed substring reference (history {}, prefix {})",
                index, length
            ),
            StringTableError::ValueOverflow(len) => {
                write!(f, "refusing to read string table value of {} bytes", len)
            }
            StringTableError::Bitstream(e) => write!(f, "{}", e),
        }
    }
}

impl Error for StringTableError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StringTableError::Bitstream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BitstreamError> for StringTableError {
    fn from(e: BitstreamError) -> Self {
        StringTableError::Bitstream(e)
    }
}

/// Errors raised by the message dispatcher.
#[derive(PartialEq, Debug, Clone)]
pub enum DispatchError {
    /// No constructor is registered for the requested message id
    NoConversionAvailable(u32),
    /// The registered constructor produced a different message type
    TypeError(String),
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NoConversionAvailable(id) => {
                write!(f, "no message constructor registered for id {}", id)
            }
            DispatchError::TypeError(what) => write!(f, "message type error: {}", what),
        }
    }
}

impl Error for DispatchError {}
