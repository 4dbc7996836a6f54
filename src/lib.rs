//! # courier
//!
//! A parser for Dota 2 replays (`.dem` files). It reads the framed,
//! partially Snappy-compressed, protobuf-wrapped record stream and keeps a
//! continuously updated view of the game: send tables, string tables, and
//! the slotted entity store with per-field delta updates. Decoded data
//! fans out to subscribers through a typed dispatcher.
//!
//! ```no_run
//! use courier::{DemMemoryStream, Parser, Settings};
//!
//! # fn main() -> Result<(), courier::ParseError> {
//! let stream = DemMemoryStream::open("match.dem")?;
//! let mut settings = Settings::default();
//! settings.forward_entities = true;
//!
//! let mut parser = Parser::new(stream, settings);
//! parser.dispatcher_mut().on_entity(42, |event| {
//!     println!("{} is now {:?}", event.entity.class_name(), event.entity.state());
//! });
//! parser.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! Class ids are only known once the replay's class info record has been
//! parsed; subscribe to [`Status::Flattables`] to learn when
//! [`Parser::class_id_for`] becomes usable.
//!
//! Everything runs on the calling thread. A parser owns all of its state,
//! so parallel work means independent parsers on independent threads.

mod bitstream;
mod demstream;
mod dispatch;
mod entity;
mod errors;
mod flatten;
pub mod messages;
mod parser;
mod parsing_utils;
mod property;
mod sendprop;
mod sendtable;
mod settings;
mod stringtable;

pub use crate::bitstream::{BITSTREAM_MAX_SIZE, Bitstream};
pub use crate::demstream::{
    DEM_HEADER_ID, DemBzip2Stream, DemFileStream, DemMemoryStream, DemMessage, DemStream,
    MAX_MESSAGE_SIZE,
};
pub use crate::dispatch::{
    DemoRecord, Dispatcher, EntityDeltaEvent, EntityEvent, Family, MessageEvent, Status,
    Subscription,
};
pub use crate::entity::{
    Entity, EntityDelta, EntityState, EntityStore, MAX_ENTITIES,
};
pub use crate::errors::{
    BitstreamError, DispatchError, EntityError, FlattenError, ParseError, PropertyError,
    StringTableError,
};
pub use crate::parser::{EventDescriptor, EventKey, Parser};
pub use crate::property::{MAX_ARRAY_ELEMENTS, MAX_STRING_LENGTH, PropValue, Property};
pub use crate::sendprop::{
    DEFAULT_PRIORITY, SPROP_CELL_COORD, SPROP_CELL_COORD_INTEGRAL,
    SPROP_CELL_COORD_LOWPRECISION, SPROP_CHANGES_OFTEN, SPROP_COLLAPSIBLE, SPROP_COORD,
    SPROP_COORD_MP, SPROP_COORD_MP_INTEGRAL, SPROP_COORD_MP_LOWPRECISION,
    SPROP_ENCODED_AGAINST_TICKCOUNT, SPROP_EXCLUDE, SPROP_INSIDEARRAY, SPROP_NORMAL,
    SPROP_NOSCALE, SPROP_ROUNDDOWN, SPROP_ROUNDUP, SPROP_UNSIGNED, SPROP_XYZE, SendProp,
    SendPropType,
};
pub use crate::sendtable::{
    ClassList, EntityClass, FlatProp, FlatSendTable, SendTable, SendTables,
};
pub use crate::settings::Settings;
pub use crate::stringtable::{
    BASELINE_TABLE, KEY_HISTORY_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE, StringTable,
    StringTableEntry,
};
