//! Shared builders for synthetic replays.
//!
//! Tests assemble complete in-memory `.dem` images: protobuf records,
//! varint framing, and the bit-packed payloads for string table deltas
//! and entity data.

#![allow(dead_code)]

use courier::messages::*;
use prost::Message;

/// Little endian bit packer matching the parser's read order: the first
/// bit written is the first bit read.
#[derive(Default)]
pub struct BitWriter {
    bits: Vec<bool>,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter::default()
    }

    pub fn write(&mut self, value: u32, n: usize) -> &mut Self {
        for i in 0..n {
            self.bits.push((value >> i) & 1 == 1);
        }
        self
    }

    pub fn write_bit(&mut self, bit: bool) -> &mut Self {
        self.bits.push(bit);
        self
    }

    pub fn write_var_u32(&mut self, mut value: u32) -> &mut Self {
        loop {
            let byte = value & 0x7F;
            value >>= 7;
            if value == 0 {
                self.write(byte, 8);
                return self;
            }
            self.write(byte | 0x80, 8);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for &b in bytes {
            self.write(b as u32, 8);
        }
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_bytes(s.as_bytes());
        self.write(0, 8)
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = vec![0u8; (self.bits.len() + 7) / 8];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }
}

fn push_var(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let b = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(b);
            return;
        }
        out.push(b | 0x80);
    }
}

/// Builds a whole demo file image out of outer records.
pub struct DemoBuilder {
    bytes: Vec<u8>,
}

impl DemoBuilder {
    pub fn new() -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"PBUFDEM\0");
        bytes.extend_from_slice(&0i32.to_le_bytes());
        DemoBuilder { bytes }
    }

    pub fn record(&mut self, kind: u32, tick: u32, payload: &[u8]) -> &mut Self {
        push_var(&mut self.bytes, kind);
        push_var(&mut self.bytes, tick);
        push_var(&mut self.bytes, payload.len() as u32);
        self.bytes.extend_from_slice(payload);
        self
    }

    /// Wraps network records into a `CDemoPacket` record.
    pub fn packet(&mut self, tick: u32, net_records: &[(u32, Vec<u8>)]) -> &mut Self {
        let msg = CDemoPacket {
            sequence_in: 0,
            sequence_out: 0,
            data: net_stream(net_records),
        };
        self.record(dem::PACKET, tick, &msg.encode_to_vec())
    }

    /// Wraps `svc_SendTable` records into a `CDemoSendTables` record.
    pub fn send_tables(&mut self, tick: u32, tables: &[CsvcMsgSendTable]) -> &mut Self {
        let records: Vec<(u32, Vec<u8>)> = tables
            .iter()
            .map(|t| (net::SVC_SEND_TABLE, t.encode_to_vec()))
            .collect();
        let msg = CDemoSendTables {
            data: net_stream(&records),
        };
        self.record(dem::SEND_TABLES, tick, &msg.encode_to_vec())
    }

    pub fn stop(&mut self) -> &mut Self {
        self.record(dem::STOP, 0, &[])
    }

    pub fn finish(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

/// Frames network records the way packet payloads carry them.
pub fn net_stream(records: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (kind, body) in records {
        push_var(&mut out, *kind);
        push_var(&mut out, body.len() as u32);
        out.extend_from_slice(body);
    }
    out
}

/// A send table message from `(name, type, flags, bits)` prop specs.
pub fn send_table(name: &str, props: &[(&str, i32, u32, i32)]) -> CsvcMsgSendTable {
    CsvcMsgSendTable {
        is_end: false,
        net_table_name: name.to_string(),
        needs_decoder: true,
        props: props
            .iter()
            .map(|&(prop_name, ty, flags, bits)| SendPropDef {
                r#type: Some(ty),
                var_name: Some(prop_name.to_string()),
                flags: Some(flags as i32),
                num_bits: Some(bits),
                ..Default::default()
            })
            .collect(),
    }
}

pub fn class_info(classes: &[(i32, &str, &str)]) -> CDemoClassInfo {
    CDemoClassInfo {
        classes: classes
            .iter()
            .map(|&(id, network_name, table_name)| DemoClass {
                class_id: id,
                network_name: network_name.to_string(),
                table_name: table_name.to_string(),
            })
            .collect(),
    }
}

pub fn server_info(max_classes: i32) -> CsvcMsgServerInfo {
    CsvcMsgServerInfo {
        max_classes,
        map_name: "dota".to_string(),
        ..Default::default()
    }
}

/// String table delta payload from `(key, value)` pairs, all fresh keys
/// at consecutive indices.
pub fn string_delta(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bit(false); // not a full update
    for (key, value) in entries {
        w.write_bit(true); // consecutive index
        w.write_bit(true); // has key
        w.write_bit(false); // no substring reference
        w.write_str(key);
        w.write_bit(true); // has value
        w.write(value.len() as u32, 14);
        w.write_bytes(value);
    }
    w.finish()
}

pub fn create_string_table(name: &str, max_entries: i32, entries: &[(&str, &[u8])]) -> CsvcMsgCreateStringTable {
    CsvcMsgCreateStringTable {
        name: name.to_string(),
        max_entries,
        num_entries: entries.len() as i32,
        user_data_fixed_size: false,
        user_data_size: 0,
        user_data_size_bits: 0,
        flags: 0,
        string_data: string_delta(entries),
    }
}

/// Entity update payload fragment: the field id list followed by nothing;
/// values are appended by the caller.
pub fn write_field_list(w: &mut BitWriter, fields: &[u32]) {
    let mut last: i64 = -1;
    for &field in fields {
        let gap = field as i64 - last;
        if gap == 1 {
            w.write_bit(true);
        } else {
            w.write_bit(false);
            w.write_var_u32((gap - 1) as u32);
        }
        last = field as i64;
    }
    w.write_bit(false);
    w.write_var_u32(0x3FFF);
}

/// Baseline or delta payload: field ids plus fixed width values.
pub fn entity_update(fields: &[(u32, u32)], value_bits: usize) -> Vec<u8> {
    let mut w = BitWriter::new();
    let ids: Vec<u32> = fields.iter().map(|&(id, _)| id).collect();
    write_field_list(&mut w, &ids);
    for &(_, value) in fields {
        w.write(value, value_bits);
    }
    w.finish()
}

pub enum HeaderState {
    Default,
    Created,
    Updated,
    Deleted,
}

/// Writes one entity header: slot increment plus the two state bits.
pub fn write_entity_header(w: &mut BitWriter, increment: u32, state: HeaderState) {
    assert!(increment < 0x10, "increment needs extension bits");
    w.write(increment, 6);
    match state {
        HeaderState::Updated => {
            w.write_bit(false);
            w.write_bit(false);
        }
        HeaderState::Created => {
            w.write_bit(false);
            w.write_bit(true);
        }
        HeaderState::Deleted => {
            w.write_bit(true);
            w.write_bit(true);
        }
        HeaderState::Default => {
            w.write_bit(true);
            w.write_bit(false);
        }
    }
}

pub fn packet_entities(updated_entries: i32, is_delta: bool, entity_data: Vec<u8>) -> CsvcMsgPacketEntities {
    CsvcMsgPacketEntities {
        max_entries: 0,
        updated_entries,
        is_delta,
        update_baseline: false,
        baseline: 0,
        delta_from: 0,
        entity_data,
    }
}
