//! The protobuf messages the parser understands.
//!
//! Only the records that drive parser state are defined here; everything
//! else in a replay is carried to subscribers as a raw payload together
//! with its numeric type id. The field numbers follow the engine's
//! `demo.proto` and `netmessages.proto`.

/// Outer demo record types.
pub mod dem {
    pub const STOP: u32 = 0;
    pub const FILE_HEADER: u32 = 1;
    pub const FILE_INFO: u32 = 2;
    pub const SYNC_TICK: u32 = 3;
    pub const SEND_TABLES: u32 = 4;
    pub const CLASS_INFO: u32 = 5;
    pub const STRING_TABLES: u32 = 6;
    pub const PACKET: u32 = 7;
    pub const SIGNON_PACKET: u32 = 8;
    pub const CONSOLE_CMD: u32 = 9;
    pub const CUSTOM_DATA: u32 = 10;
    pub const CUSTOM_DATA_CALLBACKS: u32 = 11;
    pub const USER_CMD: u32 = 12;
    pub const FULL_PACKET: u32 = 13;
    pub const SAVE_GAME: u32 = 14;

    /// Set on the record type when the payload is Snappy compressed.
    pub const IS_COMPRESSED: u32 = 0x40;
}

/// Inner network record types (`net_*` and `svc_*`).
pub mod net {
    pub const NOP: u32 = 0;
    pub const DISCONNECT: u32 = 1;
    pub const TICK: u32 = 4;
    pub const STRING_CMD: u32 = 5;
    pub const SET_CON_VAR: u32 = 6;
    pub const SIGNON_STATE: u32 = 7;
    pub const SVC_SERVER_INFO: u32 = 8;
    pub const SVC_SEND_TABLE: u32 = 9;
    pub const SVC_CLASS_INFO: u32 = 10;
    pub const SVC_CREATE_STRING_TABLE: u32 = 12;
    pub const SVC_UPDATE_STRING_TABLE: u32 = 13;
    pub const SVC_VOICE_DATA: u32 = 15;
    pub const SVC_PRINT: u32 = 16;
    pub const SVC_SOUNDS: u32 = 17;
    pub const SVC_USER_MESSAGE: u32 = 23;
    pub const SVC_GAME_EVENT: u32 = 25;
    pub const SVC_PACKET_ENTITIES: u32 = 26;
    pub const SVC_TEMP_ENTITIES: u32 = 27;
    pub const SVC_GAME_EVENT_LIST: u32 = 30;
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoFileHeader {
    #[prost(string, tag = "1")]
    pub demo_file_stamp: String,
    #[prost(int32, tag = "2")]
    pub network_protocol: i32,
    #[prost(string, tag = "3")]
    pub server_name: String,
    #[prost(string, tag = "4")]
    pub client_name: String,
    #[prost(string, tag = "5")]
    pub map_name: String,
    #[prost(string, tag = "6")]
    pub game_directory: String,
    #[prost(int32, tag = "7")]
    pub fullpackets_version: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoFileInfo {
    #[prost(float, tag = "1")]
    pub playback_time: f32,
    #[prost(int32, tag = "2")]
    pub playback_ticks: i32,
    #[prost(int32, tag = "3")]
    pub playback_frames: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoSyncTick {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoSendTables {
    /// Embedded stream of network records, framed like a packet body
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DemoClass {
    #[prost(int32, tag = "1")]
    pub class_id: i32,
    #[prost(string, tag = "2")]
    pub network_name: String,
    #[prost(string, tag = "3")]
    pub table_name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoClassInfo {
    #[prost(message, repeated, tag = "1")]
    pub classes: Vec<DemoClass>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotItem {
    #[prost(string, tag = "1")]
    pub str: String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotTable {
    #[prost(string, tag = "1")]
    pub table_name: String,
    #[prost(message, repeated, tag = "2")]
    pub items: Vec<SnapshotItem>,
    #[prost(message, repeated, tag = "3")]
    pub items_clientside: Vec<SnapshotItem>,
    #[prost(int32, tag = "4")]
    pub table_flags: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoStringTables {
    #[prost(message, repeated, tag = "1")]
    pub tables: Vec<SnapshotTable>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoPacket {
    #[prost(int32, tag = "1")]
    pub sequence_in: i32,
    #[prost(int32, tag = "2")]
    pub sequence_out: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoConsoleCmd {
    #[prost(string, tag = "1")]
    pub cmdstring: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoCustomData {
    #[prost(int32, tag = "1")]
    pub callback_index: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoCustomDataCallbacks {
    #[prost(string, repeated, tag = "1")]
    pub save_id: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoUserCmd {
    #[prost(int32, tag = "1")]
    pub cmd_number: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoFullPacket {
    #[prost(message, optional, tag = "1")]
    pub string_table: Option<CDemoStringTables>,
    #[prost(message, optional, tag = "2")]
    pub packet: Option<CDemoPacket>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CDemoSaveGame {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CsvcMsgServerInfo {
    #[prost(int32, tag = "1")]
    pub protocol: i32,
    #[prost(int32, tag = "2")]
    pub server_count: i32,
    #[prost(bool, tag = "3")]
    pub is_dedicated: bool,
    #[prost(bool, tag = "4")]
    pub is_hltv: bool,
    #[prost(int32, tag = "10")]
    pub max_clients: i32,
    #[prost(int32, tag = "11")]
    pub max_classes: i32,
    #[prost(int32, tag = "12")]
    pub player_slot: i32,
    #[prost(float, tag = "13")]
    pub tick_interval: f32,
    #[prost(string, tag = "14")]
    pub game_dir: String,
    #[prost(string, tag = "15")]
    pub map_name: String,
    #[prost(string, tag = "16")]
    pub sky_name: String,
    #[prost(string, tag = "17")]
    pub host_name: String,
}

/// A single property description inside a send table.
///
/// The fields mirror the wire message; resolution of defaults (notably the
/// priority) happens when the descriptor is turned into a `SendProp`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SendPropDef {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub var_name: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub flags: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub priority: Option<i32>,
    #[prost(string, optional, tag = "5")]
    pub dt_name: Option<String>,
    #[prost(int32, optional, tag = "6")]
    pub num_elements: Option<i32>,
    #[prost(float, optional, tag = "7")]
    pub low_value: Option<f32>,
    #[prost(float, optional, tag = "8")]
    pub high_value: Option<f32>,
    #[prost(int32, optional, tag = "9")]
    pub num_bits: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CsvcMsgSendTable {
    #[prost(bool, tag = "1")]
    pub is_end: bool,
    #[prost(string, tag = "2")]
    pub net_table_name: String,
    #[prost(bool, tag = "3")]
    pub needs_decoder: bool,
    #[prost(message, repeated, tag = "4")]
    pub props: Vec<SendPropDef>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CsvcMsgCreateStringTable {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub max_entries: i32,
    #[prost(int32, tag = "3")]
    pub num_entries: i32,
    #[prost(bool, tag = "4")]
    pub user_data_fixed_size: bool,
    #[prost(int32, tag = "5")]
    pub user_data_size: i32,
    #[prost(int32, tag = "6")]
    pub user_data_size_bits: i32,
    #[prost(int32, tag = "7")]
    pub flags: i32,
    #[prost(bytes = "vec", tag = "8")]
    pub string_data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CsvcMsgUpdateStringTable {
    #[prost(int32, tag = "1")]
    pub table_id: i32,
    #[prost(int32, tag = "2")]
    pub num_changed_entries: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub string_data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CsvcMsgPacketEntities {
    #[prost(int32, tag = "1")]
    pub max_entries: i32,
    #[prost(int32, tag = "2")]
    pub updated_entries: i32,
    #[prost(bool, tag = "3")]
    pub is_delta: bool,
    #[prost(bool, tag = "4")]
    pub update_baseline: bool,
    #[prost(int32, tag = "5")]
    pub baseline: i32,
    #[prost(int32, tag = "6")]
    pub delta_from: i32,
    #[prost(bytes = "vec", tag = "7")]
    pub entity_data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CsvcMsgUserMessage {
    #[prost(int32, tag = "1")]
    pub msg_type: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub msg_data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EventKeyDef {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EventDescriptorDef {
    #[prost(int32, tag = "1")]
    pub eventid: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, repeated, tag = "3")]
    pub keys: Vec<EventKeyDef>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CsvcMsgGameEventList {
    #[prost(message, repeated, tag = "1")]
    pub descriptors: Vec<EventDescriptorDef>,
}
