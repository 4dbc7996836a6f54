//! # The replay pipeline
//!
//! A Dota 2 replay is a stream of length-prefixed protobuf records, some
//! Snappy compressed, wrapped around a second, inner stream of network
//! records, which in turn carries the bit-packed entity state machine.
//! Unwrapping happens in three layers:
//!
//! - The outer records (`CDemo*`) frame everything else. Only a handful
//!   drive parser state: send tables, class info, and the packets that
//!   carry the inner stream.
//! - Packet payloads demultiplex into network records (`varint type,
//!   varint size, bytes`). Server info sizes the class table, send tables
//!   accumulate, string tables apply their deltas, and packet entities
//!   mutate the entity store.
//! - Entity payloads are bit streams: a header per touched slot (distance
//!   to the next slot plus a create/update/delete transition), then field
//!   ids and property values decoded against the class's flattened table.
//!   Creates apply the class baseline from the `instancebaseline` string
//!   table before the in-packet delta.
//!
//! The parser owns every table and the entity store for its lifetime and
//! runs strictly single threaded; all callbacks fire synchronously on the
//! parse thread. For parallel work, run one parser per thread.

use crate::bitstream::Bitstream;
use crate::demstream::{DemMessage, DemStream};
use crate::dispatch::{DemoRecord, Dispatcher, Family, Status};
use crate::entity::{
    Entity, EntityDelta, EntityState, EntityStore, MAX_ENTITIES, read_entity_header,
};
use crate::errors::{DispatchError, EntityError, FlattenError, ParseError};
use crate::flatten::flatten_classes;
use crate::messages::{
    CDemoClassInfo, CDemoFullPacket, CsvcMsgCreateStringTable, CsvcMsgGameEventList,
    CsvcMsgPacketEntities, CsvcMsgSendTable, CsvcMsgServerInfo, CsvcMsgUpdateStringTable,
    CsvcMsgUserMessage, dem, net,
};
use crate::parsing_utils::{log2_ceil, read_var_u32};
use crate::sendtable::{ClassList, FlatSendTable, SendTable, SendTables};
use crate::settings::Settings;
use crate::stringtable::{BASELINE_TABLE, StringTable};
use fnv::FnvHashMap;
use log::debug;
use serde::Serialize;
use std::sync::Arc;

/// Warm-up ticks consumed before a seek so server info and tables exist.
const SEEK_WARMUP_TICKS: u32 = 30;

/// One game event type from the event list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventDescriptor {
    pub id: u32,
    pub name: String,
    pub keys: Vec<EventKey>,
}

/// One field of a game event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventKey {
    pub kind: i32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opening,
    Parsing,
    Finished,
}

/// The top level state machine driving one replay.
pub struct Parser<S: DemStream> {
    settings: Settings,
    stream: S,
    dispatcher: Dispatcher,
    phase: Phase,
    flattened: bool,
    tick: u32,
    messages_read: u64,

    /// Bit width of the class id field in entity headers
    class_bits: usize,
    classes: ClassList,
    sendtables: SendTables,
    /// Flat tables indexed by class id, built once at class info time
    flattables: Vec<Option<Arc<FlatSendTable>>>,
    /// String tables by arrival id; dropped tables keep their slot
    stringtables: Vec<Option<StringTable>>,
    stringtable_names: FnvHashMap<String, usize>,
    entities: EntityStore,
    events: FnvHashMap<u32, EventDescriptor>,

    /// Reusable buffer for decoded field id lists
    fields_scratch: Vec<u32>,
    /// Reusable buffer for published entity deltas
    delta_scratch: EntityDelta,
}

impl<S: DemStream> Parser<S> {
    pub fn new(stream: S, settings: Settings) -> Self {
        Parser {
            settings,
            stream,
            dispatcher: Dispatcher::new(),
            phase: Phase::Opening,
            flattened: false,
            tick: 0,
            messages_read: 0,
            class_bits: 0,
            classes: ClassList::new(),
            sendtables: SendTables::new(),
            flattables: Vec::new(),
            stringtables: Vec::new(),
            stringtable_names: FnvHashMap::default(),
            entities: EntityStore::new(),
            events: FnvHashMap::default(),
            fields_scratch: Vec::with_capacity(1024),
            delta_scratch: EntityDelta::default(),
        }
    }

    /// Registry for subscriptions; see [`Dispatcher`].
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether records are left to read.
    pub fn good(&self) -> bool {
        self.stream.good()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Records consumed so far, outer and inner.
    pub fn messages_read(&self) -> u64 {
        self.messages_read
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn send_tables(&self) -> &SendTables {
        &self.sendtables
    }

    pub fn classes(&self) -> &ClassList {
        &self.classes
    }

    /// Flat table for a class, once class info has arrived.
    pub fn flat_table(&self, class_id: u32) -> Option<&Arc<FlatSendTable>> {
        self.flattables.get(class_id as usize).and_then(|t| t.as_ref())
    }

    /// String table lookup by name.
    pub fn string_table(&self, name: &str) -> Option<&StringTable> {
        self.stringtable_names
            .get(name)
            .and_then(|&slot| self.stringtables[slot].as_ref())
    }

    /// String tables in arrival order, skipping dropped slots.
    pub fn string_tables(&self) -> impl Iterator<Item = &StringTable> {
        self.stringtables.iter().flatten()
    }

    /// Event descriptor by event id (with `parse_events` enabled).
    pub fn event_descriptor(&self, id: u32) -> Option<&EventDescriptor> {
        self.events.get(&id)
    }

    /// Class id for an exact network name.
    pub fn class_id_for(&self, name: &str) -> Result<u32, EntityError> {
        self.classes
            .iter()
            .find(|c| c.network_name == name)
            .map(|c| c.id)
            .ok_or_else(|| EntityError::InvalidDefinition(name.to_string()))
    }

    /// Class ids whose network name starts with `prefix`.
    pub fn class_ids_with_prefix(&self, prefix: &str) -> Vec<u32> {
        self.classes
            .iter()
            .filter(|c| c.network_name.starts_with(prefix))
            .map(|c| c.id)
            .collect()
    }

    /// Parses every remaining record.
    pub fn run(&mut self) -> Result<(), ParseError> {
        self.start_if_needed();
        while self.stream.good() {
            self.read()?;
        }
        self.finish();
        Ok(())
    }

    /// Parses a single outer record.
    pub fn read(&mut self) -> Result<(), ParseError> {
        self.start_if_needed();

        // With generic forwarding off, the stream skips record types the
        // parser has no internal use for; nobody would see them anyway
        let msg = self.stream.read_message(!self.settings.forward_dem)?;
        self.messages_read += 1;

        // The closing records carry tick zero; keep the last real one
        if msg.tick > 0 {
            self.tick = msg.tick;
        }

        self.handle_dem(&msg)?;
        if self.settings.forward_dem {
            self.dispatcher.forward_dem(msg.tick, msg.kind, &msg.payload);
        }

        if !self.stream.good() {
            self.finish();
        }
        Ok(())
    }

    /// Repositions the replay at roughly `seconds` of game time.
    ///
    /// Seeks to the full packet covering that minute, replays its string
    /// table snapshot, runs its embedded packet through the normal path,
    /// then reads ahead about two ticks per remaining second. The entity
    /// store restarts from scratch.
    pub fn skip_to(&mut self, seconds: u32) -> Result<(), ParseError> {
        let minute = seconds / 60;
        let mut remainder = (seconds % 60) as i32;

        self.start_if_needed();

        // Make sure server info and the tables exist before jumping
        while self.tick < SEEK_WARMUP_TICKS && self.stream.good() {
            self.read()?;
        }

        self.entities.clear_all();
        self.stream.seek_minute(minute)?;

        let msg = loop {
            let msg = self.stream.read_message(false)?;
            if msg.kind == dem::FULL_PACKET {
                break msg;
            }
            if !self.stream.good() {
                return Err(ParseError::UnexpectedEof);
            }
        };

        let full = match self.dispatcher.retrieve(Family::Dem, dem::FULL_PACKET, &msg.payload)? {
            DemoRecord::FullPacket(m) => m,
            _ => return Err(DispatchError::TypeError("full packet".to_string()).into()),
        };
        self.apply_full_packet(full, msg.tick)?;

        while remainder > 0 && self.stream.good() {
            self.read()?;
            remainder -= 2;
        }
        Ok(())
    }

    fn apply_full_packet(&mut self, full: CDemoFullPacket, tick: u32) -> Result<(), ParseError> {
        if let Some(snapshot) = full.string_table {
            for table in snapshot.tables {
                let Some(&slot) = self.stringtable_names.get(&table.table_name) else {
                    continue;
                };
                let Some(target) = self.stringtables[slot].as_mut() else {
                    continue;
                };
                for item in table.items.iter().chain(table.items_clientside.iter()) {
                    target.set(&item.str, item.data.clone());
                }
            }
        }

        if let Some(packet) = full.packet {
            self.handle_packet_data(&packet.data, tick)?;
        }
        Ok(())
    }

    fn start_if_needed(&mut self) {
        if self.phase == Phase::Opening {
            self.phase = Phase::Parsing;
            self.dispatcher.forward_status(Status::Start, 0);
        }
    }

    fn finish(&mut self) {
        if self.phase != Phase::Finished {
            self.phase = Phase::Finished;
            debug!("reached end of replay at tick {}", self.tick);
            self.dispatcher.forward_status(Status::Finish, self.tick);
        }
    }

    fn retrieve_dem(&self, kind: u32, data: &[u8]) -> Result<DemoRecord, ParseError> {
        Ok(self.dispatcher.retrieve(Family::Dem, kind, data)?)
    }

    fn retrieve_net(&self, kind: u32, data: &[u8]) -> Result<DemoRecord, ParseError> {
        Ok(self.dispatcher.retrieve(Family::Net, kind, data)?)
    }

    fn handle_dem(&mut self, msg: &DemMessage) -> Result<(), ParseError> {
        match msg.kind {
            dem::CLASS_INFO if self.settings.parse_entities => {
                match self.retrieve_dem(msg.kind, &msg.payload)? {
                    DemoRecord::ClassInfo(m) => self.handle_classes(m, msg.tick),
                    _ => Err(DispatchError::TypeError("class info".to_string()).into()),
                }
            }
            dem::PACKET | dem::SIGNON_PACKET => {
                match self.retrieve_dem(dem::PACKET, &msg.payload)? {
                    DemoRecord::Packet(m) => self.handle_packet_data(&m.data, msg.tick),
                    _ => Err(DispatchError::TypeError("packet".to_string()).into()),
                }
            }
            dem::SEND_TABLES if self.settings.parse_entities => {
                // Send tables arrive as an embedded network record stream
                match self.retrieve_dem(msg.kind, &msg.payload)? {
                    DemoRecord::SendTables(m) => self.handle_packet_data(&m.data, msg.tick),
                    _ => Err(DispatchError::TypeError("send tables".to_string()).into()),
                }
            }
            _ => Ok(()),
        }
    }

    /// Demultiplexes the inner network record stream of one packet.
    fn handle_packet_data(&mut self, data: &[u8], tick: u32) -> Result<(), ParseError> {
        let mut cursor = 0usize;
        while cursor < data.len() {
            let (kind, used) = read_var_u32(&data[cursor..])?;
            cursor += used;
            let (size, used) = read_var_u32(&data[cursor..])?;
            cursor += used;
            let size = size as usize;
            if size > data.len() - cursor {
                return Err(ParseError::Context(
                    "network record",
                    cursor as u64,
                    Box::new(ParseError::UnexpectedEof),
                ));
            }

            let body = &data[cursor..cursor + size];
            cursor += size;
            self.messages_read += 1;

            // Forward everything unconditionally when asked; the internal
            // handlers are bypassed entirely
            if self.settings.forward_net_internal {
                self.dispatcher.forward_net(tick, kind, body);
                continue;
            }

            match kind {
                net::SVC_PACKET_ENTITIES => {
                    if self.settings.parse_entities {
                        match self.retrieve_net(kind, body)? {
                            DemoRecord::PacketEntities(m) => self.handle_entities(&m, tick)?,
                            _ => {
                                return Err(DispatchError::TypeError(
                                    "packet entities".to_string(),
                                )
                                .into());
                            }
                        }
                    }
                    continue;
                }
                net::SVC_SERVER_INFO => {
                    if self.settings.parse_entities {
                        match self.retrieve_net(kind, body)? {
                            DemoRecord::ServerInfo(m) => self.handle_server_info(&m),
                            _ => {
                                return Err(
                                    DispatchError::TypeError("server info".to_string()).into()
                                );
                            }
                        }
                    }
                    continue;
                }
                net::SVC_SEND_TABLE => {
                    if self.settings.parse_entities {
                        match self.retrieve_net(kind, body)? {
                            DemoRecord::SendTable(m) => self.handle_send_table(&m)?,
                            _ => {
                                return Err(
                                    DispatchError::TypeError("send table".to_string()).into()
                                );
                            }
                        }
                    }
                    continue;
                }
                net::SVC_CREATE_STRING_TABLE => {
                    if self.settings.parse_stringtables {
                        match self.retrieve_net(kind, body)? {
                            DemoRecord::CreateStringTable(m) => {
                                self.handle_create_stringtable(&m)?
                            }
                            _ => {
                                return Err(DispatchError::TypeError(
                                    "create string table".to_string(),
                                )
                                .into());
                            }
                        }
                    }
                    continue;
                }
                net::SVC_UPDATE_STRING_TABLE => {
                    if self.settings.parse_stringtables {
                        match self.retrieve_net(kind, body)? {
                            DemoRecord::UpdateStringTable(m) => {
                                self.handle_update_stringtable(&m)?
                            }
                            _ => {
                                return Err(DispatchError::TypeError(
                                    "update string table".to_string(),
                                )
                                .into());
                            }
                        }
                    }
                    continue;
                }
                net::SVC_USER_MESSAGE => {
                    if self.settings.forward_user {
                        match self.retrieve_net(kind, body)? {
                            DemoRecord::UserMessage(m) => self.handle_user_message(&m, tick),
                            _ => {
                                return Err(
                                    DispatchError::TypeError("user message".to_string()).into()
                                );
                            }
                        }
                    }
                    continue;
                }
                net::SVC_GAME_EVENT_LIST => {
                    // Handled internally and still eligible for generic
                    // forwarding below
                    if self.settings.parse_events {
                        match self.retrieve_net(kind, body)? {
                            DemoRecord::GameEventList(m) => self.handle_event_list(&m),
                            _ => {
                                return Err(DispatchError::TypeError(
                                    "game event list".to_string(),
                                )
                                .into());
                            }
                        }
                    }
                }
                _ => {}
            }

            if self.settings.forward_net {
                self.dispatcher.forward_net(tick, kind, body);
            }
        }
        Ok(())
    }

    fn handle_classes(&mut self, msg: CDemoClassInfo, tick: u32) -> Result<(), ParseError> {
        self.classes.fill_from(&msg)?;
        self.flattables = flatten_classes(&mut self.sendtables, &self.classes)?;

        if !self.flattened {
            self.flattened = true;
            self.dispatcher.forward_status(Status::Flattables, tick);
        }
        Ok(())
    }

    fn handle_server_info(&mut self, msg: &CsvcMsgServerInfo) {
        debug!(
            "server info: {} classes on {}",
            msg.max_classes, msg.map_name
        );
        self.classes.reserve(msg.max_classes as usize);
        self.class_bits = log2_ceil(msg.max_classes as u32);
    }

    fn handle_send_table(&mut self, msg: &CsvcMsgSendTable) -> Result<(), ParseError> {
        let table = SendTable::from_msg(msg)?;
        debug!("send table {} with {} props", table.name(), table.len());
        self.sendtables.insert(table);
        Ok(())
    }

    fn handle_create_stringtable(
        &mut self,
        msg: &CsvcMsgCreateStringTable,
    ) -> Result<(), ParseError> {
        // The numeric table id is consumed whether or not the table is
        // kept; updates address tables by this id
        let id = self.stringtables.len();

        // Matches long observed engine behaviour: tables with this bit in
        // the user data size are never tracked
        if msg.user_data_size_bits & 2 != 0 {
            debug!("dropping string table {} (size bits)", msg.name);
            self.stringtables.push(None);
            return Ok(());
        }
        if self.settings.skip_stringtables.contains(&msg.name) {
            debug!("skipping string table {}", msg.name);
            self.stringtables.push(None);
            return Ok(());
        }

        let table = StringTable::create(msg)?;
        self.stringtable_names.insert(msg.name.clone(), id);
        self.stringtables.push(Some(table));
        Ok(())
    }

    fn handle_update_stringtable(
        &mut self,
        msg: &CsvcMsgUpdateStringTable,
    ) -> Result<(), ParseError> {
        match self
            .stringtables
            .get_mut(msg.table_id as usize)
            .and_then(|t| t.as_mut())
        {
            Some(table) => table.apply(msg).map_err(ParseError::from),
            None => {
                // Updates for dropped or unknown tables are not an error
                debug!("ignoring update for unknown string table {}", msg.table_id);
                Ok(())
            }
        }
    }

    fn handle_user_message(&mut self, msg: &CsvcMsgUserMessage, tick: u32) {
        self.dispatcher
            .forward_user(tick, msg.msg_type as u32, &msg.msg_data);
    }

    fn handle_event_list(&mut self, msg: &CsvcMsgGameEventList) {
        debug!("event list with {} descriptors", msg.descriptors.len());
        for descriptor in &msg.descriptors {
            let id = descriptor.eventid as u32;
            self.events.insert(
                id,
                EventDescriptor {
                    id,
                    name: descriptor.name.clone(),
                    keys: descriptor
                        .keys
                        .iter()
                        .map(|k| EventKey {
                            kind: k.r#type,
                            name: k.name.clone(),
                        })
                        .collect(),
                },
            );
        }
    }

    fn is_skipped(&self, class_id: u32) -> bool {
        if self.settings.skip_unsubscribed_entities
            && !self.dispatcher.has_entity_subscriber(class_id)
        {
            return true;
        }
        self.settings.skip_entities.contains(&class_id)
    }

    fn forward_entity(&mut self, tick: u32, id: u32) {
        if self.settings.forward_entities {
            if let Some(entity) = self.entities.get(id) {
                self.dispatcher.forward_entity(tick, entity);
            }
        }
    }

    /// Applies one packet-entities record to the store.
    fn handle_entities(
        &mut self,
        msg: &CsvcMsgPacketEntities,
        tick: u32,
    ) -> Result<(), ParseError> {
        let mut stream = Bitstream::new(&msg.entity_data)?;

        // Creates need the per-class default state before their delta
        let baseline_slot = *self
            .stringtable_names
            .get(BASELINE_TABLE)
            .ok_or(EntityError::BaselineNotFound)?;

        let mut fields = std::mem::take(&mut self.fields_scratch);
        let mut delta = std::mem::take(&mut self.delta_scratch);

        let result = self.decode_entities(msg, tick, &mut stream, baseline_slot, &mut fields, &mut delta);

        self.fields_scratch = fields;
        self.delta_scratch = delta;
        result
    }

    fn decode_entities(
        &mut self,
        msg: &CsvcMsgPacketEntities,
        tick: u32,
        stream: &mut Bitstream,
        baseline_slot: usize,
        fields: &mut Vec<u32>,
        delta: &mut EntityDelta,
    ) -> Result<(), ParseError> {
        let mut current: i64 = -1;

        for _ in 0..msg.updated_entries {
            let (increment, state) = read_entity_header(stream)?;
            current += increment as i64 + 1;
            if current < 0 || current as usize >= MAX_ENTITIES {
                return Err(EntityError::EntityIdTooLarge(current as u32).into());
            }
            let id = current as u32;

            delta.entity_id = id;
            delta.fields.clear();

            match state {
                EntityState::Created => {
                    let class_id = stream.read(self.class_bits)?;
                    // The serial number is never used; skip it but keep
                    // the stream position honest
                    stream.seek_forward(10);

                    let class = self.classes.get(class_id)?.clone();
                    let flat = self
                        .flattables
                        .get(class_id as usize)
                        .and_then(|t| t.clone())
                        .ok_or_else(|| FlattenError::UnknownTable(class.table_name.clone()))?;

                    match self.entities.get_mut(id) {
                        Some(entity) => {
                            entity.reassign(id, class, flat);
                            entity.set_state(EntityState::Overwritten);
                        }
                        None => self.entities.insert(id, Entity::new(id, class, flat))?,
                    }

                    if self.is_skipped(class_id) {
                        if let Some(entity) = self.entities.get(id) {
                            entity.skip_from(stream, fields)?;
                        }
                    } else {
                        let mut baseline = self.baseline_stream(baseline_slot, class_id)?;
                        let track = self.settings.track_entities;
                        if let Some(entity) = self.entities.get_mut(id) {
                            entity.update_from(&mut baseline, fields, None)?;
                            entity.update_from(
                                stream,
                                fields,
                                track.then_some(&mut *delta),
                            )?;
                        }
                        self.forward_entity(tick, id);
                    }
                }
                EntityState::Updated => {
                    let Some(entity) = self.entities.get(id) else {
                        return Err(EntityError::InvalidId(id).into());
                    };
                    let class_id = entity.class_id();

                    if self.is_skipped(class_id) {
                        if let Some(entity) = self.entities.get(id) {
                            entity.skip_from(stream, fields)?;
                        }
                    } else {
                        let track = self.settings.track_entities;
                        if let Some(entity) = self.entities.get_mut(id) {
                            entity.update_from(
                                stream,
                                fields,
                                track.then_some(&mut *delta),
                            )?;
                            entity.set_state(EntityState::Updated);
                        }
                        self.forward_entity(tick, id);
                    }
                }
                EntityState::Deleted => {
                    let Some(entity) = self.entities.get(id) else {
                        return Err(EntityError::InvalidId(id).into());
                    };
                    let class_id = entity.class_id();
                    if !self.is_skipped(class_id) {
                        if let Some(entity) = self.entities.get_mut(id) {
                            entity.set_state(EntityState::Deleted);
                        }
                        self.forward_entity(tick, id);
                    }
                    self.entities.clear_slot(id);
                }
                EntityState::Default | EntityState::Overwritten => {}
            }

            if self.settings.track_entities {
                if let Some(entity) = self.entities.get(id) {
                    self.dispatcher
                        .forward_entity_delta(tick, entity.class_id(), delta);
                }
            }
        }

        // A delta packet ends with an explicit removal list
        if msg.is_delta {
            while stream.read(1)? == 1 {
                let id = stream.read(11)?;
                let Some(entity) = self.entities.get(id) else {
                    continue;
                };
                let class_id = entity.class_id();
                if !self.is_skipped(class_id) {
                    if let Some(entity) = self.entities.get_mut(id) {
                        entity.set_state(EntityState::Deleted);
                    }
                    self.forward_entity(tick, id);
                }
                self.entities.clear_slot(id);
            }
        }

        Ok(())
    }

    /// Bitstream over the baseline bytes for one class.
    fn baseline_stream(
        &self,
        baseline_slot: usize,
        class_id: u32,
    ) -> Result<Bitstream, ParseError> {
        let table = self.stringtables[baseline_slot]
            .as_ref()
            .ok_or(EntityError::BaselineNotFound)?;
        let bytes = table.get(&class_id.to_string())?;
        Ok(Bitstream::new(bytes)?)
    }
}

impl<S: DemStream> std::fmt::Debug for Parser<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("tick", &self.tick)
            .field("messages_read", &self.messages_read)
            .field("classes", &self.classes.len())
            .field("sendtables", &self.sendtables.len())
            .field("stringtables", &self.stringtables.len())
            .field("entities", &self.entities.live_count())
            .finish()
    }
}
