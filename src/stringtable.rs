//! Networked string tables and their delta protocol.
//!
//! A string table maps both a string key and a stable index to a blob of
//! user data. Updates arrive as sparse bit-packed deltas: indices either
//! increment or jump, keys may back-reference a rolling 32 entry history
//! to share prefixes, and values are either fixed size (declared at table
//! creation) or length prefixed.
//!
//! The `instancebaseline` table is load bearing: it holds the default
//! property bytes per entity class, keyed by the decimal class id, and
//! must exist before any entity can be created.

use crate::bitstream::Bitstream;
use crate::errors::StringTableError;
use crate::messages::{CsvcMsgCreateStringTable, CsvcMsgUpdateStringTable};
use crate::parsing_utils::{decode_windows1252, log2_ceil};
use fnv::FnvHashMap;
use log::{debug, warn};
use serde::Serialize;

/// Number of recent keys kept for substring back-references.
pub const KEY_HISTORY_SIZE: usize = 32;

/// Maximum byte length of a key.
pub const MAX_KEY_SIZE: usize = 0x400; // 1024

/// Maximum byte length of a value.
pub const MAX_VALUE_SIZE: u32 = 0x4000; // 16384

/// Name of the table holding per-class default entity state.
pub const BASELINE_TABLE: &str = "instancebaseline";

/// Key recorded for entries that arrive without a name.
const ANONYMOUS_KEY: &str = "anonymous";

/// One table entry. Keys are lookup helpers, not unique; the index is the
/// stable identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringTableEntry {
    pub key: String,
    pub index: i32,
    pub value: Vec<u8>,
}

/// A named key/index/value store updated through bit-packed deltas.
#[derive(Debug, Clone)]
pub struct StringTable {
    name: String,
    max_entries: u32,
    user_data_fixed: bool,
    user_data_size: u32,
    user_data_size_bits: u32,
    flags: i32,
    entries: Vec<StringTableEntry>,
    by_key: FnvHashMap<String, usize>,
    by_index: FnvHashMap<i32, usize>,
}

impl StringTable {
    /// Creates the table and applies the embedded initial delta.
    pub fn create(msg: &CsvcMsgCreateStringTable) -> Result<Self, StringTableError> {
        let mut table = StringTable {
            name: msg.name.clone(),
            max_entries: msg.max_entries as u32,
            user_data_fixed: msg.user_data_fixed_size,
            user_data_size: msg.user_data_size as u32,
            user_data_size_bits: msg.user_data_size_bits as u32,
            flags: msg.flags,
            entries: Vec::new(),
            by_key: FnvHashMap::default(),
            by_index: FnvHashMap::default(),
        };
        table.update_from_data(msg.num_entries as u32, &msg.string_data)?;
        Ok(table)
    }

    /// Applies an incremental update record.
    pub fn apply(&mut self, msg: &CsvcMsgUpdateStringTable) -> Result<(), StringTableError> {
        self.update_from_data(msg.num_changed_entries as u32, &msg.string_data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    pub fn user_data_fixed(&self) -> bool {
        self.user_data_fixed
    }

    pub fn user_data_size_bits(&self) -> u32 {
        self.user_data_size_bits
    }

    pub fn flags(&self) -> i32 {
        self.flags
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &StringTableEntry> {
        self.entries.iter()
    }

    /// Value lookup by key.
    pub fn get(&self, key: &str) -> Result<&[u8], StringTableError> {
        self.by_key
            .get(key)
            .map(|&slot| self.entries[slot].value.as_slice())
            .ok_or_else(|| StringTableError::UnknownKey(key.to_string()))
    }

    /// Entry lookup by wire index.
    pub fn get_index(&self, index: i32) -> Result<&StringTableEntry, StringTableError> {
        self.by_index
            .get(&index)
            .map(|&slot| &self.entries[slot])
            .ok_or(StringTableError::UnknownIndex(index))
    }

    /// Key lookup by wire index.
    pub fn key_at(&self, index: i32) -> Result<&str, StringTableError> {
        self.get_index(index).map(|e| e.key.as_str())
    }

    /// Sets a value directly, inserting at the next free index when the
    /// key is new. Used when replaying full-packet snapshots.
    pub fn set(&mut self, key: &str, value: Vec<u8>) {
        match self.by_key.get(key) {
            Some(&slot) => self.entries[slot].value = value,
            None => {
                let index = self.entries.len() as i32;
                self.insert_entry(key.to_string(), index, value);
            }
        }
    }

    fn insert_entry(&mut self, key: String, index: i32, value: Vec<u8>) {
        let slot = self.entries.len();
        self.by_key.insert(key.clone(), slot);
        self.by_index.insert(index, slot);
        self.entries.push(StringTableEntry { key, index, value });
    }

    /// Decodes one delta: `count` entry updates out of `data`.
    fn update_from_data(&mut self, count: u32, data: &[u8]) -> Result<(), StringTableError> {
        let mut stream = Bitstream::new(data)?;

        // When set, the delta cannot back-reference keys it has not sent
        let full = stream.read(1)? == 1;

        let mut index: i32 = -1;
        let mut history: Vec<Vec<u8>> = Vec::new();
        let index_bits = log2_ceil(self.max_entries);

        debug!("updating string table {} ({} entries)", self.name, count);

        for _ in 0..count {
            // Entry index: consecutive, or an explicit jump
            if stream.read(1)? == 1 {
                index += 1;
            } else {
                index = stream.read(index_bits)? as i32;
            }

            let has_key = stream.read(1)? == 1;
            let mut key_bytes: Option<Vec<u8>> = None;
            if has_key {
                if full && stream.read(1)? == 1 {
                    // Nothing before this entry exists to reference
                    return Err(StringTableError::KeyMissing);
                }

                let substring = stream.read(1)? == 1;
                let key = if substring {
                    let hist_index = stream.read(5)?;
                    let prefix_len = stream.read(5)?;
                    if hist_index as usize >= KEY_HISTORY_SIZE
                        || prefix_len as usize >= MAX_KEY_SIZE
                    {
                        return Err(StringTableError::MalformedSubstring(
                            hist_index, prefix_len,
                        ));
                    }

                    if history.len() <= hist_index as usize {
                        // Stale reference; the sender still wrote a full
                        // key after it, so fall back to that
                        warn!(
                            "string table {} references history entry {} of {}",
                            self.name,
                            hist_index,
                            history.len()
                        );
                        stream.read_string(MAX_KEY_SIZE)?
                    } else {
                        let source = &history[hist_index as usize];
                        let take = std::cmp::min(prefix_len as usize, source.len());
                        let mut key = source[..take].to_vec();
                        let tail = stream.read_string(MAX_KEY_SIZE - take)?;
                        key.extend_from_slice(&tail);
                        key
                    }
                } else {
                    stream.read_string(MAX_KEY_SIZE)?
                };

                if history.len() >= KEY_HISTORY_SIZE {
                    history.remove(0);
                }
                history.push(key.clone());
                key_bytes = Some(key);
            }

            let mut value = Vec::new();
            if stream.read(1)? == 1 {
                let (length, value_bits) = if self.user_data_fixed {
                    (self.user_data_size, self.user_data_size_bits as usize)
                } else {
                    let length = stream.read(14)?;
                    (length, length as usize * 8)
                };

                if length > MAX_VALUE_SIZE {
                    return Err(StringTableError::ValueOverflow(length));
                }

                // The declared bit count may exceed the byte length on
                // fixed size tables; size the scratch for the bits and
                // keep the declared byte length
                let scratch = std::cmp::max(length as usize, (value_bits + 7) / 8);
                if scratch > MAX_VALUE_SIZE as usize {
                    return Err(StringTableError::ValueOverflow(value_bits as u32 / 8));
                }
                value = vec![0u8; scratch];
                stream.read_bits(&mut value, value_bits)?;
                value.truncate(length as usize);
            }

            let key = key_bytes.as_deref().map(decode_windows1252);
            match key {
                Some(key) => match self.by_key.get(&key) {
                    Some(&slot) => self.entries[slot].value = value,
                    None => self.insert_entry(key, index, value),
                },
                None => match self.by_index.get(&index) {
                    Some(&slot) => self.entries[slot].value = value,
                    None => {
                        debug!("inserting anonymous entry {} into {}", index, self.name);
                        self.insert_entry(ANONYMOUS_KEY.to_string(), index, value);
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::testutil::BitWriter;

    /// Builds the bit-packed delta payload for a list of entries.
    struct DeltaWriter {
        w: BitWriter,
        index_bits: usize,
    }

    enum Key<'a> {
        None,
        Fresh(&'a str),
        Substring {
            hist_index: u32,
            prefix_len: u32,
            tail: &'a str,
        },
    }

    impl DeltaWriter {
        fn new(max_entries: u32, full: bool) -> Self {
            let mut w = BitWriter::new();
            w.write_bit(full);
            DeltaWriter {
                w,
                index_bits: log2_ceil(max_entries),
            }
        }

        fn entry(&mut self, index: Option<u32>, key: Key<'_>, value: Option<&[u8]>) -> &mut Self {
            match index {
                None => {
                    self.w.write_bit(true);
                }
                Some(i) => {
                    self.w.write_bit(false);
                    self.w.write(i, self.index_bits);
                }
            }
            match key {
                Key::None => {
                    self.w.write_bit(false);
                }
                Key::Fresh(k) => {
                    self.w.write_bit(true);
                    self.w.write_bit(false); // substring
                    self.w.write_str(k);
                }
                Key::Substring {
                    hist_index,
                    prefix_len,
                    tail,
                } => {
                    self.w.write_bit(true);
                    self.w.write_bit(true);
                    self.w.write(hist_index, 5);
                    self.w.write(prefix_len, 5);
                    self.w.write_str(tail);
                }
            }
            match value {
                None => {
                    self.w.write_bit(false);
                }
                Some(v) => {
                    self.w.write_bit(true);
                    self.w.write(v.len() as u32, 14);
                    self.w.write_bytes(v);
                }
            }
            self
        }

        fn finish(&self) -> Vec<u8> {
            self.w.finish()
        }
    }

    fn create_msg(name: &str, max_entries: i32, entries: i32, data: Vec<u8>) -> CsvcMsgCreateStringTable {
        CsvcMsgCreateStringTable {
            name: name.to_string(),
            max_entries,
            num_entries: entries,
            user_data_fixed_size: false,
            user_data_size: 0,
            user_data_size_bits: 0,
            flags: 0,
            string_data: data,
        }
    }

    #[test]
    fn create_and_lookup() {
        let mut d = DeltaWriter::new(256, false);
        d.entry(None, Key::Fresh("hero"), Some(b"axe"));
        d.entry(None, Key::Fresh("courier"), Some(b"donkey"));
        let table = StringTable::create(&create_msg("test", 256, 2, d.finish())).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("hero").unwrap(), b"axe");
        assert_eq!(table.get_index(1).unwrap().value, b"donkey");
        assert_eq!(table.key_at(0).unwrap(), "hero");
        assert!(matches!(
            table.get("mid"),
            Err(StringTableError::UnknownKey(_))
        ));
        assert_eq!(
            table.get_index(9).unwrap_err(),
            StringTableError::UnknownIndex(9)
        );
    }

    #[test]
    fn explicit_index_jump() {
        let mut d = DeltaWriter::new(64, false);
        d.entry(Some(5), Key::Fresh("slot5"), Some(b"v"));
        d.entry(None, Key::Fresh("slot6"), Some(b"w"));
        let table = StringTable::create(&create_msg("test", 64, 2, d.finish())).unwrap();

        assert_eq!(table.get_index(5).unwrap().key, "slot5");
        assert_eq!(table.get_index(6).unwrap().key, "slot6");
    }

    #[test]
    fn substring_back_reference() {
        let mut d = DeltaWriter::new(256, false);
        d.entry(None, Key::Fresh("CDOTA_Hero"), Some(b"a"));
        d.entry(
            None,
            Key::Substring {
                hist_index: 0,
                prefix_len: 6,
                tail: "Npc",
            },
            Some(b"b"),
        );
        let table = StringTable::create(&create_msg("instancebaseline", 256, 2, d.finish())).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("CDOTA_Hero").unwrap(), b"a");
        assert_eq!(table.get("CDOTA_Npc").unwrap(), b"b");
    }

    #[test]
    fn stale_history_reference_recovers_with_fresh_key() {
        // History is empty, so the reference cannot resolve and the
        // decoder falls back to the full key that follows
        let mut d = DeltaWriter::new(256, false);
        d.entry(
            None,
            Key::Substring {
                hist_index: 3,
                prefix_len: 4,
                tail: "whole_key",
            },
            Some(b"v"),
        );
        let table = StringTable::create(&create_msg("test", 256, 1, d.finish())).unwrap();
        assert_eq!(table.get("whole_key").unwrap(), b"v");
    }

    #[test]
    fn history_caps_at_32_keys() {
        let mut d = DeltaWriter::new(256, false);
        let keys: Vec<String> = (0..33).map(|i| format!("key{:02}", i)).collect();
        for key in &keys {
            d.entry(None, Key::Fresh(key), None);
        }
        // key00 fell out of the 32 slot history, so slot 0 now holds
        // key01 and the prefix resolves against it
        d.entry(
            None,
            Key::Substring {
                hist_index: 0,
                prefix_len: 5,
                tail: "tail",
            },
            Some(b"v"),
        );
        let table = StringTable::create(&create_msg("test", 256, 34, d.finish())).unwrap();
        assert_eq!(table.get("key01tail").unwrap(), b"v");
    }

    #[test]
    fn update_by_key_keeps_index() {
        let mut d = DeltaWriter::new(64, false);
        d.entry(None, Key::Fresh("hero"), Some(b"old"));
        let mut table = StringTable::create(&create_msg("test", 64, 1, d.finish())).unwrap();

        let mut u = DeltaWriter::new(64, false);
        u.entry(None, Key::Fresh("hero"), Some(b"new"));
        table
            .apply(&CsvcMsgUpdateStringTable {
                table_id: 0,
                num_changed_entries: 1,
                string_data: u.finish(),
            })
            .unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("hero").unwrap(), b"new");
        assert_eq!(table.get_index(0).unwrap().value, b"new");
    }

    #[test]
    fn nameless_update_resolves_by_index() {
        let mut d = DeltaWriter::new(64, false);
        d.entry(None, Key::Fresh("hero"), Some(b"old"));
        let mut table = StringTable::create(&create_msg("test", 64, 1, d.finish())).unwrap();

        let mut u = DeltaWriter::new(64, false);
        u.entry(Some(0), Key::None, Some(b"patched"));
        table
            .apply(&CsvcMsgUpdateStringTable {
                table_id: 0,
                num_changed_entries: 1,
                string_data: u.finish(),
            })
            .unwrap();
        assert_eq!(table.get("hero").unwrap(), b"patched");
    }

    #[test]
    fn nameless_unknown_index_inserts_anonymous() {
        let mut d = DeltaWriter::new(64, false);
        d.entry(Some(7), Key::None, Some(b"ghost"));
        let table = StringTable::create(&create_msg("test", 64, 1, d.finish())).unwrap();
        let entry = table.get_index(7).unwrap();
        assert_eq!(entry.key, "anonymous");
        assert_eq!(entry.value, b"ghost");
    }

    #[test]
    fn fixed_size_user_data() {
        let mut w = BitWriter::new();
        w.write_bit(false); // not full
        w.write_bit(true); // increment index
        w.write_bit(true); // has key
        w.write_bit(false); // no substring
        w.write_str("k");
        w.write_bit(true); // has value
        w.write(0b101, 3); // 3 bits of fixed data

        let msg = CsvcMsgCreateStringTable {
            name: "fixed".to_string(),
            max_entries: 8,
            num_entries: 1,
            user_data_fixed_size: true,
            user_data_size: 1,
            user_data_size_bits: 3,
            flags: 0,
            string_data: w.finish(),
        };
        let table = StringTable::create(&msg).unwrap();
        assert_eq!(table.get("k").unwrap(), &[0b101]);
    }

    #[test]
    fn full_update_rejects_missing_key_bit() {
        let mut w = BitWriter::new();
        w.write_bit(true); // full
        w.write_bit(true); // increment index
        w.write_bit(true); // has key
        w.write_bit(true); // missing-key marker
        let msg = create_msg("test", 8, 1, w.finish());
        assert_eq!(
            StringTable::create(&msg).unwrap_err(),
            StringTableError::KeyMissing
        );
    }

    #[test]
    fn deltas_are_deterministic() {
        let build = || {
            let mut d = DeltaWriter::new(128, false);
            d.entry(None, Key::Fresh("alpha"), Some(b"1"));
            d.entry(None, Key::Fresh("beta"), Some(b"2"));
            d.entry(
                None,
                Key::Substring {
                    hist_index: 1,
                    prefix_len: 4,
                    tail: "max",
                },
                Some(b"3"),
            );
            let table = StringTable::create(&create_msg("t", 128, 3, d.finish())).unwrap();
            table
                .iter()
                .map(|e| (e.index, e.key.clone(), e.value.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
        assert_eq!(build()[2].1, "betamax");
    }
}
