//! Event name binding across loaded resource groups.
//!
//! A [`ResourceGroup`] bundles one program image with the events that play
//! it and an optional symbol table of entry overrides. The
//! [`EventRegistry`] merges the events of every registered group into one
//! case-insensitive table where the first group to claim a name keeps it.

use crate::virtual_machine::assembler::parse_int;
use crate::virtual_machine::dispatch::{SoundDispatch, track_sound};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::program::ProgramImage;
use crate::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

const COMMENT_CHAR: char = '#';

/// What a registered event does when played.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Starts the bound track.
    PlayTrack,
    /// Switches background music; may become a TV-on handler.
    SetMusicMode,
}

impl EventKind {
    /// Parses the kind column of an event list.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "play_track" | "play" | "track" => Some(EventKind::PlayTrack),
            "set_music_mode" | "music" => Some(EventKind::SetMusicMode),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PlayTrack => "play_track",
            EventKind::SetMusicMode => "set_music_mode",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of an event list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventDef {
    pub name: String,
    pub kind: EventKind,
    pub track_id: u32,
}

/// A program plus the events and symbols shipped with it.
#[derive(Clone, Debug)]
pub struct ResourceGroup {
    pub name: String,
    pub program: Rc<ProgramImage>,
    pub events: Vec<EventDef>,
    /// Event name to entry address. `None` when the group ships no table.
    pub symbols: Option<HashMap<String, u32>>,
}

impl ResourceGroup {
    pub fn new(name: impl Into<String>, program: ProgramImage) -> Self {
        Self {
            name: name.into(),
            program: Rc::new(program),
            events: Vec::new(),
            symbols: None,
        }
    }

    pub fn with_events(mut self, events: Vec<EventDef>) -> Self {
        self.events = events;
        self
    }

    /// Attaches a symbol table. Names are matched case-insensitively.
    pub fn with_symbols(mut self, symbols: HashMap<String, u32>) -> Self {
        self.symbols = Some(
            symbols
                .into_iter()
                .map(|(name, addr)| (normalize(&name), addr))
                .collect(),
        );
        self
    }

    /// Parses `name,kind,track_id` lines.
    ///
    /// Blank lines and `#` comments are skipped. `track_id` is decimal or `0x` hex.
    pub fn parse_event_list(text: &str) -> Result<Vec<EventDef>, VMError> {
        let mut events = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = strip_comment(raw);
            if content.is_empty() {
                continue;
            }

            let fields: Vec<&str> = content.split(',').map(str::trim).collect();
            let [name, kind, track] = fields.as_slice() else {
                return Err(list_error(
                    line,
                    format!("expected `name,kind,track_id`, got {} fields", fields.len()),
                ));
            };
            if name.is_empty() {
                return Err(list_error(line, "empty event name".to_string()));
            }
            let kind = EventKind::parse(kind)
                .ok_or_else(|| list_error(line, format!("unknown event kind `{kind}`")))?;
            let track_id = parse_u32(track)
                .ok_or_else(|| list_error(line, format!("invalid track id `{track}`")))?;

            events.push(EventDef {
                name: name.to_string(),
                kind,
                track_id,
            });
        }
        Ok(events)
    }

    /// Parses `name address` lines into a symbol table.
    pub fn parse_symbol_list(text: &str) -> Result<HashMap<String, u32>, VMError> {
        let mut symbols = HashMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = strip_comment(raw);
            if content.is_empty() {
                continue;
            }

            let fields: Vec<&str> = content.split_whitespace().collect();
            let [name, addr] = fields.as_slice() else {
                return Err(list_error(
                    line,
                    format!("expected `name address`, got {} fields", fields.len()),
                ));
            };
            let address = parse_u32(addr)
                .ok_or_else(|| list_error(line, format!("invalid address `{addr}`")))?;
            if symbols.insert(normalize(name), address).is_some() {
                return Err(list_error(line, format!("duplicate symbol `{name}`")));
            }
        }
        Ok(symbols)
    }

    fn symbol(&self, event: &str) -> Option<u32> {
        self.symbols.as_ref()?.get(event).copied()
    }

    /// Rejects symbols that point outside the program's code.
    fn validate_symbols(&self) -> Result<(), VMError> {
        let Some(symbols) = &self.symbols else {
            return Ok(());
        };
        let code = self.program.code_start()..self.program.bytes().len();
        for (name, &addr) in symbols {
            if addr != 0 && !code.contains(&(addr as usize)) {
                return Err(VMError::MalformedProgram {
                    reason: format!("symbol {name} address {addr} out of range"),
                });
            }
        }
        Ok(())
    }
}

/// Lookup result for a registered name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredEvent {
    pub name: String,
    pub kind: EventKind,
    pub track_id: u32,
    pub program: Rc<ProgramImage>,
    /// Name of the group that registered the event.
    pub group: String,
    /// Entry override from the group's symbol table.
    pub symbol: Option<u32>,
}

/// What playing an event amounts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventTarget {
    /// Spawn a subroutine; an `entry` of 0 is SimpleMode.
    Spawn {
        program: Rc<ProgramImage>,
        track_id: u32,
        entry: u32,
    },
    /// Install the named persistent handler.
    TvOn { name: String, track_id: u32 },
    /// Nothing can be played for this event.
    Silent,
}

/// Name → event table built from registered groups.
#[derive(Default)]
pub struct EventRegistry {
    groups: Vec<ResourceGroup>,
    events: HashMap<String, RegisteredEvent>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group and binds its events.
    ///
    /// Names already bound by an earlier group are skipped. Returns how many
    /// events this group bound.
    pub fn register(&mut self, group: ResourceGroup) -> Result<usize, VMError> {
        if self.groups.iter().any(|g| g.name == group.name) {
            return Err(VMError::DuplicateGroup { name: group.name });
        }
        group.validate_symbols()?;

        let bound = Self::bind(&mut self.events, &group);
        info!(
            "registered group {}: {} of {} events bound",
            group.name,
            bound,
            group.events.len()
        );
        self.groups.push(group);
        Ok(bound)
    }

    fn bind(events: &mut HashMap<String, RegisteredEvent>, group: &ResourceGroup) -> usize {
        let mut bound = 0;
        for def in &group.events {
            let key = normalize(&def.name);
            if let Some(existing) = events.get(&key) {
                debug!(
                    "event {key} from {} shadowed by {}",
                    group.name, existing.group
                );
                continue;
            }
            let event = RegisteredEvent {
                symbol: group.symbol(&key),
                name: key.clone(),
                kind: def.kind,
                track_id: def.track_id,
                program: Rc::clone(&group.program),
                group: group.name.clone(),
            };
            events.insert(key, event);
            bound += 1;
        }
        bound
    }

    /// Removes a group and returns its program.
    ///
    /// Events it had shadowed in later groups become visible again.
    pub fn unload(&mut self, name: &str) -> Result<Rc<ProgramImage>, VMError> {
        let index = self
            .groups
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| VMError::UnknownGroup {
                name: name.to_string(),
            })?;
        let group = self.groups.remove(index);

        self.events.clear();
        for remaining in &self.groups {
            Self::bind(&mut self.events, remaining);
        }
        info!("unloaded group {}", group.name);
        Ok(group.program)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredEvent> {
        self.events.get(&normalize(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.events.contains_key(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Registered groups in registration order.
    pub fn groups(&self) -> &[ResourceGroup] {
        &self.groups
    }

    /// Bound event names, sorted.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.events.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// First registered program exporting `track_id`, with its entry address.
    pub fn find_track(&self, track_id: u32) -> Option<(Rc<ProgramImage>, u32)> {
        self.groups.iter().find_map(|g| {
            g.program
                .entry_address(track_id)
                .map(|entry| (Rc::clone(&g.program), entry))
        })
    }

    /// Decides how `name` should be played.
    ///
    /// In order: the group's symbol override, the program's export entry for
    /// the event's track, a SimpleMode play when the track's sound exists,
    /// and a TV-on handler for music-mode events.
    pub fn resolve(&self, name: &str, dispatch: &dyn SoundDispatch) -> Result<EventTarget, VMError> {
        let event = self.get(name).ok_or_else(|| VMError::UnknownEvent {
            name: name.to_string(),
        })?;

        let spawn = |entry| EventTarget::Spawn {
            program: Rc::clone(&event.program),
            track_id: event.track_id,
            entry,
        };

        if let Some(entry) = event.symbol {
            return Ok(spawn(entry));
        }

        if let Some(entry) = event.program.entry_address(event.track_id) {
            return Ok(spawn(entry));
        }

        let sound_id = track_sound(dispatch, event.track_id);
        if dispatch.resolve_sound(sound_id).is_some() {
            return Ok(spawn(0));
        }

        if event.kind == EventKind::SetMusicMode {
            return Ok(EventTarget::TvOn {
                name: event.name.clone(),
                track_id: event.track_id,
            });
        }

        warn!(
            "event {}: track {} has no entry and no sound",
            event.name, event.track_id
        );
        Ok(EventTarget::Silent)
    }
}

/// Event names are stored and looked up lower-cased.
pub fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

fn strip_comment(line: &str) -> &str {
    match line.find(COMMENT_CHAR) {
        Some(end) => line[..end].trim(),
        None => line.trim(),
    }
}

fn parse_u32(tok: &str) -> Option<u32> {
    parse_int(tok).and_then(|v| u32::try_from(v).ok())
}

fn list_error(line: usize, reason: String) -> VMError {
    VMError::EventListError { line, reason }
}
