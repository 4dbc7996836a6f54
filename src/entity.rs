//! Live entities and the slotted store they occupy.
//!
//! Entities are addressed by a small slot id. A packet-entities record
//! walks the slots in increasing order: each header encodes the distance
//! to the next touched slot plus a state transition, then field ids select
//! which properties follow in the bitstream. Properties decode against the
//! class's flat table, so an entity is little more than a value vector
//! parallel to that table.

use crate::bitstream::Bitstream;
use crate::errors::{BitstreamError, EntityError, ParseError};
use crate::property::Property;
use crate::sendtable::{EntityClass, FlatSendTable};
use fnv::FnvHashMap;
use serde::Serialize;
use std::cell::OnceCell;
use std::sync::Arc;

/// Maximum number of concurrently live entities.
pub const MAX_ENTITIES: usize = 0x3FFF; // 16383

/// Sentinel that terminates a field id list.
const FIELD_LIST_END: u32 = 0x3FFF;

/// What a packet-entities header did to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityState {
    /// Touched without a state change
    Default,
    /// Fresh entity in a previously empty slot
    Created,
    /// A create landed on an occupied slot and replaced its identity
    Overwritten,
    /// Existing entity received new field values
    Updated,
    /// Entity left the game; the slot is free again
    Deleted,
}

/// Fields touched by the most recent update of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityDelta {
    pub entity_id: u32,
    pub fields: Vec<u32>,
}

/// A single live entity.
pub struct Entity {
    id: u32,
    class: Arc<EntityClass>,
    flat: Arc<FlatSendTable>,
    state: EntityState,
    /// One slot per flat table property, plus a spare the engine reserves
    properties: Vec<Option<Property>>,
    /// Lazy name -> field index cache, built on first lookup
    name_index: OnceCell<FnvHashMap<String, usize>>,
}

impl Entity {
    pub(crate) fn new(id: u32, class: Arc<EntityClass>, flat: Arc<FlatSendTable>) -> Self {
        let slots = flat.properties.len() + 1;
        Entity {
            id,
            class,
            flat,
            state: EntityState::Created,
            properties: (0..slots).map(|_| None).collect(),
            name_index: OnceCell::new(),
        }
    }

    /// Rebinds identity when a create lands on an occupied slot. The
    /// property values survive; the following baseline pass rewrites them.
    pub(crate) fn reassign(&mut self, id: u32, class: Arc<EntityClass>, flat: Arc<FlatSendTable>) {
        self.properties.resize_with(flat.properties.len() + 1, || None);
        self.id = id;
        self.class = class;
        self.flat = flat;
        self.name_index = OnceCell::new();
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn class_id(&self) -> u32 {
        self.class.id
    }

    /// Network name of the entity's class.
    pub fn class_name(&self) -> &str {
        &self.class.network_name
    }

    pub fn class(&self) -> &Arc<EntityClass> {
        &self.class
    }

    pub fn flat_table(&self) -> &Arc<FlatSendTable> {
        &self.flat
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    /// Number of initialized properties.
    pub fn initialized_count(&self) -> usize {
        self.properties.iter().flatten().count()
    }

    /// Property by field index.
    pub fn property_at(&self, field: usize) -> Option<&Property> {
        self.properties.get(field).and_then(|p| p.as_ref())
    }

    /// Property by hierarchical name, e.g. `.m_iHealth`.
    pub fn property(&self, name: &str) -> Option<&Property> {
        let index = self.name_index.get_or_init(|| {
            let mut map = FnvHashMap::default();
            for (i, slot) in self.properties.iter().enumerate() {
                if slot.is_some() {
                    if let Some(fp) = self.flat.properties.get(i) {
                        map.insert(fp.name.clone(), i);
                    }
                }
            }
            map
        });
        index.get(name).and_then(|&i| self.property_at(i))
    }

    /// Property by name, as a result.
    pub fn prop(&self, name: &str) -> Result<&Property, EntityError> {
        self.property(name)
            .ok_or_else(|| EntityError::UnknownProperty(name.to_string()))
    }

    /// Initialized properties with their hierarchical names.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.properties
            .iter()
            .enumerate()
            .filter_map(move |(i, slot)| {
                slot.as_ref()
                    .map(|p| (self.flat.properties[i].name.as_str(), p))
            })
    }

    /// Applies one update: decodes the field id list, then each value.
    ///
    /// `fields` is reusable scratch for the id list; when `delta` is given
    /// the decoded field ids are copied out for subscribers.
    pub(crate) fn update_from(
        &mut self,
        stream: &mut Bitstream,
        fields: &mut Vec<u32>,
        delta: Option<&mut EntityDelta>,
    ) -> Result<(), ParseError> {
        read_field_list(stream, fields)?;

        for &field in fields.iter() {
            let index = field as usize;
            if index >= self.flat.properties.len() {
                return Err(EntityError::UnknownSendprop {
                    field,
                    max: self.flat.properties.len(),
                }
                .into());
            }

            let descriptor = &self.flat.properties[index].prop;
            match &mut self.properties[index] {
                Some(value) => value.update(stream, descriptor)?,
                slot @ None => *slot = Some(Property::decode(stream, descriptor)?),
            }
        }

        if let Some(delta) = delta {
            delta.entity_id = self.id;
            delta.fields.clear();
            delta.fields.extend_from_slice(fields);
        }
        Ok(())
    }

    /// Advances the stream past one update without decoding any values.
    /// The position advance matches `update_from` exactly.
    pub(crate) fn skip_from(
        &self,
        stream: &mut Bitstream,
        fields: &mut Vec<u32>,
    ) -> Result<(), ParseError> {
        read_field_list(stream, fields)?;

        for &field in fields.iter() {
            let index = field as usize;
            if index >= self.flat.properties.len() {
                return Err(EntityError::UnknownSendprop {
                    field,
                    max: self.flat.properties.len(),
                }
                .into());
            }
            Property::skip(stream, &self.flat.properties[index].prop)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("class", &self.class.network_name)
            .field("state", &self.state)
            .field("initialized", &self.initialized_count())
            .finish()
    }
}

/// Decodes one entity header: the slot increment and the state bits.
///
/// The increment starts as 6 bits; the two top bits select 4, 8 or 28
/// extension bits. The two state bits are read as two dependent single-bit
/// reads, in that exact order, to stay bit compatible with the engine.
pub(crate) fn read_entity_header(
    stream: &mut Bitstream,
) -> Result<(u32, EntityState), BitstreamError> {
    let mut value = stream.read(6)?;
    if value & 0x30 != 0 {
        let x = (value >> 4) & 3;
        let extra = if x == 3 { 16 } else { 0 };
        value = stream.read((4 * x + extra) as usize)? << 4 | (value & 0xF);
    }

    let state = if stream.read(1)? == 0 {
        if stream.read(1)? == 1 {
            EntityState::Created
        } else {
            EntityState::Updated
        }
    } else if stream.read(1)? == 1 {
        EntityState::Deleted
    } else {
        EntityState::Default
    };

    Ok((value, state))
}

/// Decodes the run-length encoded field id list of one entity update.
fn read_field_list(stream: &mut Bitstream, fields: &mut Vec<u32>) -> Result<(), BitstreamError> {
    fields.clear();

    let mut field: i64 = -1;
    loop {
        if stream.read(1)? == 1 {
            field += 1;
        } else {
            let jump = stream.read_var_u32()?;
            if jump == FIELD_LIST_END {
                return Ok(());
            }
            field += jump as i64 + 1;
        }
        fields.push(field as u32);
    }
}

/// Fixed-capacity slotted array of entities.
///
/// A slot is either empty or holds exactly one live entity; ids index
/// slots directly.
pub struct EntityStore {
    slots: Vec<Option<Entity>>,
}

impl Default for EntityStore {
    fn default() -> Self {
        EntityStore::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        EntityStore {
            slots: (0..MAX_ENTITIES).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: u32) -> Option<&Entity> {
        self.slots.get(id as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Entity> {
        self.slots.get_mut(id as usize).and_then(|s| s.as_mut())
    }

    pub fn is_initialized(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn insert(&mut self, id: u32, entity: Entity) -> Result<(), EntityError> {
        let slot = self
            .slots
            .get_mut(id as usize)
            .ok_or(EntityError::EntityIdTooLarge(id))?;
        *slot = Some(entity);
        Ok(())
    }

    pub(crate) fn clear_slot(&mut self, id: u32) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            *slot = None;
        }
    }

    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Number of live entities.
    pub fn live_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().flatten()
    }
}
