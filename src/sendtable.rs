//! Send tables, their flattened counterparts, and the entity class list.

use crate::errors::{EntityError, PropertyError};
use crate::messages::{CDemoClassInfo, CsvcMsgSendTable};
use crate::sendprop::SendProp;
use fnv::FnvHashMap;
use serde::Serialize;
use std::sync::Arc;

/// One send table: a named, insertion-ordered group of property
/// descriptors. Properties are addressable by name or by the order they
/// arrived in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendTable {
    name: String,
    needs_decoder: bool,
    props: Vec<SendProp>,
    #[serde(skip)]
    by_name: FnvHashMap<String, usize>,
}

impl SendTable {
    pub fn from_msg(msg: &CsvcMsgSendTable) -> Result<Self, PropertyError> {
        let mut table = SendTable {
            name: msg.net_table_name.clone(),
            needs_decoder: msg.needs_decoder,
            props: Vec::with_capacity(msg.props.len()),
            by_name: FnvHashMap::default(),
        };
        for def in &msg.props {
            let prop = SendProp::from_def(def, &msg.net_table_name)?;
            table.by_name.insert(prop.name().to_string(), table.props.len());
            table.props.push(prop);
        }
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn needs_decoder(&self) -> bool {
        self.needs_decoder
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Properties in insertion order.
    pub fn props(&self) -> &[SendProp] {
        &self.props
    }

    pub fn prop(&self, name: &str) -> Option<&SendProp> {
        self.by_name.get(name).map(|&i| &self.props[i])
    }

    pub(crate) fn props_mut(&mut self) -> &mut [SendProp] {
        &mut self.props
    }
}

/// All send tables received so far, in arrival order and by name.
#[derive(Debug, Default, Clone)]
pub struct SendTables {
    tables: Vec<SendTable>,
    by_name: FnvHashMap<String, usize>,
}

impl SendTables {
    pub fn new() -> Self {
        SendTables::default()
    }

    pub fn insert(&mut self, table: SendTable) {
        self.by_name.insert(table.name().to_string(), self.tables.len());
        self.tables.push(table);
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SendTable> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    pub fn by_index(&self, index: usize) -> Option<&SendTable> {
        self.tables.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SendTable> {
        self.tables.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SendTable> {
        self.tables.iter_mut()
    }
}

/// One property slot of a flattened table: the descriptor plus the
/// hierarchical name it got while walking the data table tree
/// (e.g. `.m_NetworkActivity` or `.localdata.m_vecOrigin`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatProp {
    pub prop: SendProp,
    pub name: String,
}

/// The client-side view of a send table: every property an entity of this
/// class carries on the wire, in exact wire order. Built once per class
/// after all tables are known, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatSendTable {
    pub name: String,
    pub properties: Vec<FlatProp>,
}

/// Identity of one networked entity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityClass {
    pub id: u32,
    pub table_name: String,
    pub network_name: String,
}

/// The class table announced in class info, sized by server info.
///
/// The number of classes fixes the bit width of the class id field in
/// entity headers.
#[derive(Debug, Default, Clone)]
pub struct ClassList {
    classes: FnvHashMap<u32, Arc<EntityClass>>,
    max_classes: usize,
}

impl ClassList {
    pub fn new() -> Self {
        ClassList::default()
    }

    /// Fixes the maximum number of classes this list accepts.
    pub fn reserve(&mut self, max_classes: usize) {
        self.classes.reserve(max_classes);
        self.max_classes = max_classes;
    }

    pub fn max_classes(&self) -> usize {
        self.max_classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn set(&mut self, class: EntityClass) -> Result<(), EntityError> {
        if class.id as usize >= self.max_classes {
            return Err(EntityError::UnknownClassIndex(class.id));
        }
        self.classes.insert(class.id, Arc::new(class));
        Ok(())
    }

    pub fn get(&self, id: u32) -> Result<&Arc<EntityClass>, EntityError> {
        if id as usize >= self.max_classes {
            return Err(EntityError::UnknownClassIndex(id));
        }
        self.classes
            .get(&id)
            .ok_or(EntityError::UnknownClassIndex(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityClass>> {
        self.classes.values()
    }

    pub fn fill_from(&mut self, msg: &CDemoClassInfo) -> Result<(), EntityError> {
        for c in &msg.classes {
            self.set(EntityClass {
                id: c.class_id as u32,
                table_name: c.table_name.clone(),
                network_name: c.network_name.clone(),
            })?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.classes.clear();
    }
}
