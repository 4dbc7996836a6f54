//! Typed pub/sub fan-out for everything the parser decodes.
//!
//! Subscribers register against a `(family, numeric id)` pair and receive
//! borrowed views of the decoded data, synchronously, on the parse
//! thread, in registration order. Message payloads are handed over raw
//! together with their id; the constructor table turns a payload into its
//! typed record on demand, both for subscribers and for the parser's own
//! internal handling.

use crate::entity::{Entity, EntityDelta};
use crate::errors::DispatchError;
use crate::messages::*;
use fnv::FnvHashMap;
use prost::Message;

/// Parse lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Parsing has begun
    Start,
    /// Class info arrived and flat tables are available; entity
    /// subscriptions become meaningful now
    Flattables,
    /// The end of the replay was reached
    Finish,
}

/// The message namespaces subscribers can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Status,
    Dem,
    Net,
    User,
    Entity,
    EntityDelta,
}

/// Borrowed view of one raw message.
#[derive(Debug, Clone, Copy)]
pub struct MessageEvent<'a> {
    pub tick: u32,
    /// Numeric type id within the family
    pub kind: u32,
    pub data: &'a [u8],
}

/// Borrowed view of one entity notification.
#[derive(Debug)]
pub struct EntityEvent<'a> {
    pub tick: u32,
    pub class_id: u32,
    pub entity: &'a Entity,
}

/// Borrowed view of one entity field-change notification.
#[derive(Debug)]
pub struct EntityDeltaEvent<'a> {
    pub tick: u32,
    pub class_id: u32,
    pub delta: &'a EntityDelta,
}

/// A message decoded through the constructor table.
#[derive(Debug, Clone, PartialEq)]
pub enum DemoRecord {
    FileHeader(CDemoFileHeader),
    FileInfo(CDemoFileInfo),
    SyncTick(CDemoSyncTick),
    SendTables(CDemoSendTables),
    ClassInfo(CDemoClassInfo),
    StringTables(CDemoStringTables),
    Packet(CDemoPacket),
    ConsoleCmd(CDemoConsoleCmd),
    CustomData(CDemoCustomData),
    CustomDataCallbacks(CDemoCustomDataCallbacks),
    UserCmd(CDemoUserCmd),
    FullPacket(CDemoFullPacket),
    SaveGame(CDemoSaveGame),
    ServerInfo(CsvcMsgServerInfo),
    SendTable(CsvcMsgSendTable),
    CreateStringTable(CsvcMsgCreateStringTable),
    UpdateStringTable(CsvcMsgUpdateStringTable),
    PacketEntities(CsvcMsgPacketEntities),
    UserMessage(CsvcMsgUserMessage),
    GameEventList(CsvcMsgGameEventList),
}

type Constructor = fn(&[u8]) -> Result<DemoRecord, DispatchError>;

macro_rules! constructor {
    ($msg:ty, $variant:ident) => {
        |data: &[u8]| {
            <$msg>::decode(data)
                .map(DemoRecord::$variant)
                .map_err(|e| DispatchError::TypeError(e.to_string()))
        }
    };
}

/// The id -> constructor bindings for outer demo records.
const DEM_CONSTRUCTORS: &[(u32, Constructor)] = &[
    (dem::FILE_HEADER, constructor!(CDemoFileHeader, FileHeader)),
    (dem::FILE_INFO, constructor!(CDemoFileInfo, FileInfo)),
    (dem::SYNC_TICK, constructor!(CDemoSyncTick, SyncTick)),
    (dem::SEND_TABLES, constructor!(CDemoSendTables, SendTables)),
    (dem::CLASS_INFO, constructor!(CDemoClassInfo, ClassInfo)),
    (dem::STRING_TABLES, constructor!(CDemoStringTables, StringTables)),
    (dem::PACKET, constructor!(CDemoPacket, Packet)),
    (dem::SIGNON_PACKET, constructor!(CDemoPacket, Packet)),
    (dem::CONSOLE_CMD, constructor!(CDemoConsoleCmd, ConsoleCmd)),
    (dem::CUSTOM_DATA, constructor!(CDemoCustomData, CustomData)),
    (
        dem::CUSTOM_DATA_CALLBACKS,
        constructor!(CDemoCustomDataCallbacks, CustomDataCallbacks),
    ),
    (dem::USER_CMD, constructor!(CDemoUserCmd, UserCmd)),
    (dem::FULL_PACKET, constructor!(CDemoFullPacket, FullPacket)),
    (dem::SAVE_GAME, constructor!(CDemoSaveGame, SaveGame)),
];

/// The id -> constructor bindings for inner network records.
const NET_CONSTRUCTORS: &[(u32, Constructor)] = &[
    (net::SVC_SERVER_INFO, constructor!(CsvcMsgServerInfo, ServerInfo)),
    (net::SVC_SEND_TABLE, constructor!(CsvcMsgSendTable, SendTable)),
    (
        net::SVC_CREATE_STRING_TABLE,
        constructor!(CsvcMsgCreateStringTable, CreateStringTable),
    ),
    (
        net::SVC_UPDATE_STRING_TABLE,
        constructor!(CsvcMsgUpdateStringTable, UpdateStringTable),
    ),
    (
        net::SVC_PACKET_ENTITIES,
        constructor!(CsvcMsgPacketEntities, PacketEntities),
    ),
    (net::SVC_USER_MESSAGE, constructor!(CsvcMsgUserMessage, UserMessage)),
    (
        net::SVC_GAME_EVENT_LIST,
        constructor!(CsvcMsgGameEventList, GameEventList),
    ),
];

/// Handle for removing a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

type StatusCallback = Box<dyn FnMut(Status, u32)>;
type MessageCallback = Box<dyn FnMut(&MessageEvent<'_>)>;
type EntityCallback = Box<dyn FnMut(&EntityEvent<'_>)>;
type EntityDeltaCallback = Box<dyn FnMut(&EntityDeltaEvent<'_>)>;

/// The callback registry and fan-out engine.
#[derive(Default)]
pub struct Dispatcher {
    next_token: u64,
    constructors: FnvHashMap<(Family, u32), Constructor>,
    status: FnvHashMap<u32, Vec<(u64, StatusCallback)>>,
    dem: FnvHashMap<u32, Vec<(u64, MessageCallback)>>,
    net: FnvHashMap<u32, Vec<(u64, MessageCallback)>>,
    user: FnvHashMap<u32, Vec<(u64, MessageCallback)>>,
    entity: FnvHashMap<u32, Vec<(u64, EntityCallback)>>,
    entity_delta: FnvHashMap<u32, Vec<(u64, EntityDeltaCallback)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register_constructors();
        dispatcher
    }

    /// Fills the `(family, id) -> constructor` table with every message
    /// type the crate understands.
    fn register_constructors(&mut self) {
        for &(id, ctor) in DEM_CONSTRUCTORS {
            self.constructors.insert((Family::Dem, id), ctor);
        }
        for &(id, ctor) in NET_CONSTRUCTORS {
            self.constructors.insert((Family::Net, id), ctor);
        }
    }

    /// Decodes a raw payload into its typed record without dispatching.
    pub fn retrieve(
        &self,
        family: Family,
        kind: u32,
        data: &[u8],
    ) -> Result<DemoRecord, DispatchError> {
        let ctor = self
            .constructors
            .get(&(family, kind))
            .ok_or(DispatchError::NoConversionAvailable(kind))?;
        ctor(data)
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    pub fn on_status(&mut self, status: Status, cb: impl FnMut(Status, u32) + 'static) -> Subscription {
        let token = self.token();
        self.status
            .entry(status as u32)
            .or_default()
            .push((token, Box::new(cb)));
        Subscription(token)
    }

    pub fn on_dem(&mut self, kind: u32, cb: impl FnMut(&MessageEvent<'_>) + 'static) -> Subscription {
        let token = self.token();
        self.dem.entry(kind).or_default().push((token, Box::new(cb)));
        Subscription(token)
    }

    pub fn on_net(&mut self, kind: u32, cb: impl FnMut(&MessageEvent<'_>) + 'static) -> Subscription {
        let token = self.token();
        self.net.entry(kind).or_default().push((token, Box::new(cb)));
        Subscription(token)
    }

    pub fn on_user(&mut self, kind: u32, cb: impl FnMut(&MessageEvent<'_>) + 'static) -> Subscription {
        let token = self.token();
        self.user.entry(kind).or_default().push((token, Box::new(cb)));
        Subscription(token)
    }

    pub fn on_entity(
        &mut self,
        class_id: u32,
        cb: impl FnMut(&EntityEvent<'_>) + 'static,
    ) -> Subscription {
        let token = self.token();
        self.entity
            .entry(class_id)
            .or_default()
            .push((token, Box::new(cb)));
        Subscription(token)
    }

    pub fn on_entity_delta(
        &mut self,
        class_id: u32,
        cb: impl FnMut(&EntityDeltaEvent<'_>) + 'static,
    ) -> Subscription {
        let token = self.token();
        self.entity_delta
            .entry(class_id)
            .or_default()
            .push((token, Box::new(cb)));
        Subscription(token)
    }

    /// Removes a previously registered callback. Returns whether one was
    /// actually found.
    pub fn remove(&mut self, subscription: Subscription) -> bool {
        let token = subscription.0;
        let mut removed = false;
        for list in self.status.values_mut() {
            let before = list.len();
            list.retain(|(t, _)| *t != token);
            removed |= list.len() != before;
        }
        for list in self
            .dem
            .values_mut()
            .chain(self.net.values_mut())
            .chain(self.user.values_mut())
        {
            let before = list.len();
            list.retain(|(t, _)| *t != token);
            removed |= list.len() != before;
        }
        for list in self.entity.values_mut() {
            let before = list.len();
            list.retain(|(t, _)| *t != token);
            removed |= list.len() != before;
        }
        for list in self.entity_delta.values_mut() {
            let before = list.len();
            list.retain(|(t, _)| *t != token);
            removed |= list.len() != before;
        }
        removed
    }

    /// Whether any entity callback is registered for a class. Drives the
    /// skip-unsubscribed policy.
    pub fn has_entity_subscriber(&self, class_id: u32) -> bool {
        self.entity
            .get(&class_id)
            .map(|l| !l.is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn forward_status(&mut self, status: Status, tick: u32) {
        if let Some(callbacks) = self.status.get_mut(&(status as u32)) {
            for (_, cb) in callbacks.iter_mut() {
                cb(status, tick);
            }
        }
    }

    pub(crate) fn forward_dem(&mut self, tick: u32, kind: u32, data: &[u8]) {
        if let Some(callbacks) = self.dem.get_mut(&kind) {
            let event = MessageEvent { tick, kind, data };
            for (_, cb) in callbacks.iter_mut() {
                cb(&event);
            }
        }
    }

    pub(crate) fn forward_net(&mut self, tick: u32, kind: u32, data: &[u8]) {
        if let Some(callbacks) = self.net.get_mut(&kind) {
            let event = MessageEvent { tick, kind, data };
            for (_, cb) in callbacks.iter_mut() {
                cb(&event);
            }
        }
    }

    pub(crate) fn forward_user(&mut self, tick: u32, kind: u32, data: &[u8]) {
        if let Some(callbacks) = self.user.get_mut(&kind) {
            let event = MessageEvent { tick, kind, data };
            for (_, cb) in callbacks.iter_mut() {
                cb(&event);
            }
        }
    }

    pub(crate) fn forward_entity(&mut self, tick: u32, entity: &Entity) {
        if let Some(callbacks) = self.entity.get_mut(&entity.class_id()) {
            let event = EntityEvent {
                tick,
                class_id: entity.class_id(),
                entity,
            };
            for (_, cb) in callbacks.iter_mut() {
                cb(&event);
            }
        }
    }

    pub(crate) fn forward_entity_delta(&mut self, tick: u32, class_id: u32, delta: &EntityDelta) {
        if let Some(callbacks) = self.entity_delta.get_mut(&class_id) {
            let event = EntityDeltaEvent {
                tick,
                class_id,
                delta,
            };
            for (_, cb) in callbacks.iter_mut() {
                cb(&event);
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("constructors", &self.constructors.len())
            .field("dem", &self.dem.len())
            .field("net", &self.net.len())
            .field("user", &self.user.len())
            .field("entity", &self.entity.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn callbacks_fire_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut d = Dispatcher::new();

        let first = Rc::clone(&order);
        d.on_net(4, move |_| first.borrow_mut().push(1));
        let second = Rc::clone(&order);
        d.on_net(4, move |_| second.borrow_mut().push(2));
        let other = Rc::clone(&order);
        d.on_net(5, move |_| other.borrow_mut().push(99));

        d.forward_net(100, 4, &[]);
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn remove_unsubscribes() {
        let hits = Rc::new(RefCell::new(0));
        let mut d = Dispatcher::new();
        let counter = Rc::clone(&hits);
        let sub = d.on_dem(7, move |_| *counter.borrow_mut() += 1);

        d.forward_dem(0, 7, &[]);
        assert!(d.remove(sub));
        assert!(!d.remove(sub));
        d.forward_dem(0, 7, &[]);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn subscriber_presence_by_class() {
        let mut d = Dispatcher::new();
        assert!(!d.has_entity_subscriber(42));
        let sub = d.on_entity(42, |_| {});
        assert!(d.has_entity_subscriber(42));
        assert!(!d.has_entity_subscriber(43));
        d.remove(sub);
        assert!(!d.has_entity_subscriber(42));
    }

    #[test]
    fn retrieve_decodes_registered_messages() {
        let d = Dispatcher::new();
        let msg = CsvcMsgServerInfo {
            max_classes: 100,
            ..Default::default()
        };
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();

        match d.retrieve(Family::Net, net::SVC_SERVER_INFO, &buf).unwrap() {
            DemoRecord::ServerInfo(m) => assert_eq!(m.max_classes, 100),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn retrieve_unknown_id_fails() {
        let d = Dispatcher::new();
        assert_eq!(
            d.retrieve(Family::Net, 999, &[]).unwrap_err(),
            DispatchError::NoConversionAvailable(999)
        );
        assert_eq!(
            d.retrieve(Family::User, 1, &[]).unwrap_err(),
            DispatchError::NoConversionAvailable(1)
        );
    }

    #[test]
    fn status_events_carry_tick() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut d = Dispatcher::new();
        let sink = Rc::clone(&seen);
        d.on_status(Status::Finish, move |status, tick| {
            sink.borrow_mut().push((status, tick))
        });
        d.forward_status(Status::Start, 1);
        d.forward_status(Status::Finish, 2300);
        assert_eq!(*seen.borrow(), vec![(Status::Finish, 2300)]);
    }
}
