//! Turns the server's nested send tables into flat, wire-ordered
//! property lists.
//!
//! The server describes entity classes as a tree of tables referencing
//! each other; the client decodes entities against a single flattened
//! list per class. Getting that list exactly right matters more than it
//! looks: the swap-based priority partition below reorders the remainder
//! of the list in a way later passes observe, so it is reproduced
//! operation for operation rather than replaced with a stable sort.

use crate::errors::FlattenError;
use crate::sendprop::{
    SPROP_CHANGES_OFTEN, SPROP_COLLAPSIBLE, SPROP_EXCLUDE, SPROP_INSIDEARRAY, SendPropType,
};
use crate::sendtable::{ClassList, FlatProp, FlatSendTable, SendTable, SendTables};
use fnv::FnvHashSet;
use log::debug;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Builds the flat table for every known entity class.
///
/// The result is indexed by class id; classes whose send table never
/// arrived fail with [`FlattenError::UnknownTable`] here rather than at
/// first decode.
pub(crate) fn flatten_classes(
    tables: &mut SendTables,
    classes: &ClassList,
) -> Result<Vec<Option<Arc<FlatSendTable>>>, FlattenError> {
    bind_array_props(tables)?;

    let mut flat: Vec<Option<Arc<FlatSendTable>>> = vec![None; classes.max_classes()];
    for class in classes.iter() {
        let table = flatten_table(tables, &class.table_name)?;
        debug!(
            "flattened {} into {} properties for class {}",
            class.table_name,
            table.properties.len(),
            class.id
        );
        flat[class.id as usize] = Some(Arc::new(table));
    }
    Ok(flat)
}

/// Binds every Array property to the descriptor immediately preceding it
/// in its table, which describes the array's elements.
pub(crate) fn bind_array_props(tables: &mut SendTables) -> Result<(), FlattenError> {
    for table in tables.iter_mut() {
        let name = table.name().to_string();
        let props = table.props_mut();
        for i in 0..props.len() {
            if props[i].prop_type() == SendPropType::Array {
                if i == 0 {
                    return Err(FlattenError::InvalidArrayProp(name));
                }
                let element = props[i - 1].clone();
                props[i].bind_array_element(element);
            }
        }
    }
    Ok(())
}

/// Flattens a single table: exclude set, hierarchy walk, priority sort.
pub(crate) fn flatten_table(
    tables: &SendTables,
    name: &str,
) -> Result<FlatSendTable, FlattenError> {
    let table = tables
        .get(name)
        .ok_or_else(|| FlattenError::UnknownTable(name.to_string()))?;

    let mut excludes = FnvHashSet::default();
    let mut visited = FnvHashSet::default();
    build_exclude_list(tables, table, &mut excludes, &mut visited)?;

    let mut props = Vec::new();
    build_hierarchy(tables, table, &excludes, &mut props, "")?;
    sort_by_priority(&mut props);

    Ok(FlatSendTable {
        name: name.to_string(),
        properties: props,
    })
}

/// Collects every `(table, prop)` pair excluded anywhere in the tree
/// rooted at `table`. The visited set keeps self referencing table graphs
/// from recursing forever.
fn build_exclude_list(
    tables: &SendTables,
    table: &SendTable,
    excludes: &mut FnvHashSet<(String, String)>,
    visited: &mut FnvHashSet<String>,
) -> Result<(), FlattenError> {
    if !visited.insert(table.name().to_string()) {
        return Ok(());
    }

    for prop in table.props() {
        if prop.has_flag(SPROP_EXCLUDE) {
            excludes.insert((prop.ref_table().to_string(), prop.name().to_string()));
        } else if prop.prop_type() == SendPropType::DataTable {
            let sub = tables
                .get(prop.ref_table())
                .ok_or_else(|| FlattenError::UnknownTable(prop.ref_table().to_string()))?;
            build_exclude_list(tables, sub, excludes, visited)?;
        }
    }
    Ok(())
}

/// Walks one table: child data tables are spliced into the output first,
/// then the table's own scalar properties follow.
fn build_hierarchy(
    tables: &SendTables,
    table: &SendTable,
    excludes: &FnvHashSet<(String, String)>,
    props: &mut Vec<FlatProp>,
    base: &str,
) -> Result<(), FlattenError> {
    let mut own = Vec::new();
    gather_props(tables, table, &mut own, excludes, props, base)?;
    props.extend(own);
    Ok(())
}

fn gather_props(
    tables: &SendTables,
    table: &SendTable,
    own: &mut Vec<FlatProp>,
    excludes: &FnvHashSet<(String, String)>,
    props: &mut Vec<FlatProp>,
    base: &str,
) -> Result<(), FlattenError> {
    for prop in table.props() {
        if prop.has_flag(SPROP_EXCLUDE | SPROP_INSIDEARRAY) {
            continue;
        }
        if excludes.contains(&(table.name().to_string(), prop.name().to_string())) {
            continue;
        }

        if prop.prop_type() == SendPropType::DataTable {
            let sub = tables
                .get(prop.ref_table())
                .ok_or_else(|| FlattenError::UnknownTable(prop.ref_table().to_string()))?;

            if prop.has_flag(SPROP_COLLAPSIBLE) {
                gather_props(tables, sub, own, excludes, props, base)?;
            } else {
                let sub_base = format!("{}.{}", base, prop.name());
                build_hierarchy(tables, sub, excludes, props, &sub_base)?;
            }
        } else {
            own.push(FlatProp {
                prop: prop.clone(),
                name: format!("{}.{}", base, prop.name()),
            });
        }
    }
    Ok(())
}

/// Partitions the property list into ascending priority buckets.
///
/// For each distinct priority (64 always participates), properties with
/// that priority, or with CHANGES_OFTEN when the current priority is 64,
/// are swapped to the front of the unsorted remainder.
fn sort_by_priority(props: &mut [FlatProp]) {
    let mut priorities: BTreeSet<u32> = BTreeSet::new();
    priorities.insert(64);
    for p in props.iter() {
        priorities.insert(p.prop.priority());
    }

    let mut offset = 0;
    for prio in priorities {
        let mut cursor = offset;
        while cursor < props.len() {
            let prop = &props[cursor].prop;
            if prop.priority() == prio
                || (prop.has_flag(SPROP_CHANGES_OFTEN) && prio == 64)
            {
                props.swap(cursor, offset);
                offset += 1;
            }
            cursor += 1;
        }
    }
}
