//! Parser configuration.

use fnv::FnvHashSet;

/// What the parser processes and what it publishes. Fixed for the
/// lifetime of a parse session.
///
/// The default configuration parses string tables and entities without
/// publishing anything; subscribers opt in per concern.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Publish every outer demo record. Costs the fast path that skips
    /// records nobody handles.
    pub forward_dem: bool,
    /// Publish network records the parser does not handle itself
    pub forward_net: bool,
    /// Publish every network record, including the internally handled
    /// ones. Implies `forward_net`.
    pub forward_net_internal: bool,
    /// Decode and publish user message sub-records
    pub forward_user: bool,
    /// Process create/update string table records
    pub parse_stringtables: bool,
    /// String tables to drop by name
    pub skip_stringtables: FnvHashSet<String>,
    /// Process packet entities. Requires `parse_stringtables` for the
    /// baseline.
    pub parse_entities: bool,
    /// Additionally publish per-update field id lists
    pub track_entities: bool,
    /// Publish entity events. Without this the entity store is still
    /// maintained and can be inspected directly.
    pub forward_entities: bool,
    /// Skip decoding entity classes that have no subscriber; their bits
    /// are skipped at stream level
    pub skip_unsubscribed_entities: bool,
    /// Class ids that are always skipped, subscribers or not
    pub skip_entities: FnvHashSet<u32>,
    /// Process the game event list
    pub parse_events: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            forward_dem: false,
            forward_net: false,
            forward_net_internal: false,
            forward_user: false,
            parse_stringtables: true,
            skip_stringtables: FnvHashSet::default(),
            parse_entities: true,
            track_entities: false,
            forward_entities: false,
            skip_unsubscribed_entities: false,
            skip_entities: FnvHashSet::default(),
            parse_events: false,
        }
    }
}
