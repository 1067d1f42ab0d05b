//! Variable addressing for running subroutines.
//!
//! A location is a plain integer. Its partition is decided by which
//! half-open interval it falls in:
//!
//! | partition  | locations         | backing store                        |
//! |------------|-------------------|--------------------------------------|
//! | Arg        | `0..5`            | [`Frame::args`]                      |
//! | Register   | `5..16`           | [`Frame::registers`] (raw index)     |
//! | Local      | `16..70`          | [`Frame::locals`]                    |
//! | Global     | `70..136`         | [`GlobalTable`], slot `loc - 0x64`   |
//! | ObjectVar  | `136..0x2737`     | [`ObjectTable`], slot `loc - 0x271a` |

use crate::warn;

pub const ARG_COUNT: usize = 5;
/// Register file size. Covers the Arg range too, see [`VariableSpace::set`].
pub const REGISTER_COUNT: usize = 16;
pub const LOCAL_COUNT: usize = 54;

pub const ARG_BEGIN: i32 = 0;
pub const REGISTER_BEGIN: i32 = 5;
pub const LOCAL_BEGIN: i32 = 16;
pub const GLOBAL_BEGIN: i32 = 70;
pub const OBJECT_BEGIN: i32 = 136;
pub const OBJECT_END: i32 = 0x2737;

pub const GLOBAL_BASE: i32 = 0x64;
pub const GLOBAL_COUNT: usize = 36;
pub const OBJECT_BASE: i32 = 0x271a;
pub const OBJECT_COUNT: usize = 29;

/// Named local slots.
pub mod local {
    pub const ARGS_TYPE: i32 = 0x10;
    pub const TRACK_DATA_SOURCE: i32 = 0x11;
    /// Writing this slot also selects the subroutine's current sound.
    pub const PATCH: i32 = 0x12;
    pub const PRIORITY: i32 = 0x13;
    pub const VOLUME: i32 = 0x14;
    pub const EXT_VOLUME: i32 = 0x15;
    pub const PAN: i32 = 0x16;
    pub const PITCH: i32 = 0x17;
    pub const PAUSED: i32 = 0x18;
    pub const FX_TYPE: i32 = 0x19;
    pub const FX_LEVEL: i32 = 0x1A;
    pub const DUCK_PRIORITY: i32 = 0x1B;
    pub const IS_3D: i32 = 0x1C;
    pub const HEAD_RELATIVE: i32 = 0x1D;
    pub const HIDE_SIM: i32 = 0x1E;
    pub const LOOP: i32 = 0x1F;
    pub const FADE_OUT: i32 = 0x20;
    pub const FADE_IN: i32 = 0x21;
    pub const STREAMING: i32 = 0x22;
    pub const POSITION_X: i32 = 0x23;
    pub const POSITION_Y: i32 = 0x24;
    pub const POSITION_Z: i32 = 0x25;
    pub const MIN_DISTANCE: i32 = 0x26;
    pub const MAX_DISTANCE: i32 = 0x27;
}

/// Named global slots, shared by every subroutine.
pub mod global {
    pub const MAIN_SONG_NUM: i32 = 0x64;
    pub const MAIN_MUSIC_HITS_OFF: i32 = 0x65;
    pub const MAIN_PAUSE: i32 = 0x66;
    pub const MAIN_VOLUME: i32 = 0x67;
    pub const MAIN_FX_VOLUME: i32 = 0x68;
    pub const MAIN_MUSIC_VOLUME: i32 = 0x69;
    pub const MAIN_VOX_VOLUME: i32 = 0x6A;
    pub const MAIN_AMBIENCE_VOLUME: i32 = 0x6B;
    pub const MAIN_SIM_SPEED: i32 = 0x6C;
    pub const MAIN_INTERFACE_MODE: i32 = 0x6D;
    pub const MAIN_CAMERA_MODE: i32 = 0x6E;
    pub const MAIN_HOUSE_LEVEL: i32 = 0x6F;
    pub const MAIN_BUILD_BUY_MODE: i32 = 0x70;
    pub const MAIN_ZOOM_LEVEL: i32 = 0x71;
    pub const MAIN_NIGHT: i32 = 0x72;
}

/// Named properties of the current scene object.
pub mod object {
    pub const GENDER: i32 = 0x271A;
    pub const AGE: i32 = 0x271B;
    pub const MOOD: i32 = 0x271C;
    pub const COOKING_SKILL: i32 = 0x271D;
    pub const MECHANICAL_SKILL: i32 = 0x271E;
    pub const CHARISMA_SKILL: i32 = 0x271F;
    pub const LOGIC_SKILL: i32 = 0x2720;
    pub const BODY_SKILL: i32 = 0x2721;
    pub const CREATIVITY_SKILL: i32 = 0x2722;
    pub const POSITION_X: i32 = 0x2723;
    pub const POSITION_Y: i32 = 0x2724;
    pub const POSITION_Z: i32 = 0x2725;
    pub const ORIENTATION: i32 = 0x2726;
    pub const VISIBLE: i32 = 0x2727;
}

/// Partition a location falls in, with the index into that partition's store.
///
/// Global and ObjectVar carry the raw table offset, which is negative for
/// the low end of their ranges that has no backing slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VariableLocation {
    Arg(usize),
    Register(usize),
    Local(usize),
    Global(i32),
    ObjectVar(i32),
}

impl VariableLocation {
    /// Maps a raw location to its partition, or `None` outside all of them.
    pub fn resolve(location: i32) -> Option<Self> {
        match location {
            l if l < ARG_BEGIN => None,
            l if l < REGISTER_BEGIN => Some(VariableLocation::Arg(l as usize)),
            l if l < LOCAL_BEGIN => Some(VariableLocation::Register(l as usize)),
            l if l < GLOBAL_BEGIN => Some(VariableLocation::Local((l - LOCAL_BEGIN) as usize)),
            l if l < OBJECT_BEGIN => Some(VariableLocation::Global(l - GLOBAL_BASE)),
            l if l < OBJECT_END => Some(VariableLocation::ObjectVar(l - OBJECT_BASE)),
            _ => None,
        }
    }
}

/// Fixed-size integer table addressed by absolute location.
///
/// `BASE` is the location of slot zero.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotTable<const BASE: i32, const N: usize> {
    values: [i32; N],
}

/// VM-wide globals.
pub type GlobalTable = SlotTable<GLOBAL_BASE, GLOBAL_COUNT>;
/// Properties of the scene object the audio is attached to.
pub type ObjectTable = SlotTable<OBJECT_BASE, OBJECT_COUNT>;

impl<const BASE: i32, const N: usize> Default for SlotTable<BASE, N> {
    fn default() -> Self {
        Self { values: [0; N] }
    }
}

impl<const BASE: i32, const N: usize> SlotTable<BASE, N> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(location: i32) -> Option<usize> {
        let offset = location.checked_sub(BASE)?;
        usize::try_from(offset).ok().filter(|&i| i < N)
    }

    /// Value at `location`, or 0 when the location has no slot.
    pub fn get(&self, location: i32) -> i32 {
        Self::slot(location).map_or(0, |i| self.values[i])
    }

    /// Stores `value` and returns whether `location` has a slot.
    pub fn set(&mut self, location: i32, value: i32) -> bool {
        match Self::slot(location) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }
}

/// Per-instance variable storage owned by one subroutine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub args: [i32; ARG_COUNT],
    pub registers: [i32; REGISTER_COUNT],
    pub locals: [i32; LOCAL_COUNT],
    /// Sound selected through the `PATCH` local.
    pub sound_id: u32,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            args: [0; ARG_COUNT],
            registers: [0; REGISTER_COUNT],
            locals: [0; LOCAL_COUNT],
            sound_id: 0,
        }
    }
}

/// Resolves locations against one frame plus the shared tables.
pub struct VariableSpace<'a> {
    pub frame: &'a mut Frame,
    pub globals: &'a mut GlobalTable,
    pub objects: &'a mut ObjectTable,
}

impl<'a> VariableSpace<'a> {
    pub fn new(
        frame: &'a mut Frame,
        globals: &'a mut GlobalTable,
        objects: &'a mut ObjectTable,
    ) -> Self {
        Self {
            frame,
            globals,
            objects,
        }
    }

    pub fn get(&self, location: i32) -> i32 {
        match VariableLocation::resolve(location) {
            Some(VariableLocation::Arg(i)) => self.frame.args[i],
            Some(VariableLocation::Register(i)) => self.frame.registers[i],
            Some(VariableLocation::Local(i)) => self.frame.locals[i],
            Some(VariableLocation::Global(_)) => self.globals.get(location),
            Some(VariableLocation::ObjectVar(_)) => self.objects.get(location),
            None => 0,
        }
    }

    /// Writes `value` to `location`.
    ///
    /// An Arg write also lands in the register slot of the same index, so
    /// arithmetic opcodes observe arguments through the register file.
    pub fn set(&mut self, location: i32, value: i32) {
        let resolved = VariableLocation::resolve(location);

        if let Some(VariableLocation::Arg(i)) = resolved {
            self.frame.args[i] = value;
        }

        match resolved {
            Some(VariableLocation::Arg(i)) | Some(VariableLocation::Register(i)) => {
                self.frame.registers[i] = value;
            }
            Some(VariableLocation::Local(i)) => {
                self.frame.locals[i] = value;
                if location == local::PATCH {
                    self.frame.sound_id = value as u32;
                }
            }
            Some(VariableLocation::Global(_)) => {
                if !self.globals.set(location, value) {
                    warn!("dropping write to global location {location}: no such slot");
                }
            }
            Some(VariableLocation::ObjectVar(_)) => {
                if !self.objects.set(location, value) {
                    warn!("dropping write to object location {location}: no such slot");
                }
            }
            None => warn!("dropping write to location {location}: outside every partition"),
        }
    }
}
