//! Boundary between the interpreter and the host's audio layer.
//!
//! The VM never decodes or mixes audio. It asks a [`SoundDispatch`] to turn
//! opaque ids into assets and to start or stop playback.

use std::rc::Rc;

/// Host-issued identifier of a playing note.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteHandle(pub u32);

/// Decoded sound ready to be handed back to [`SoundDispatch::play_sound`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoundAsset {
    pub pcm: Rc<[u8]>,
    pub sample_rate: u32,
}

/// Track metadata needed by the interpreter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrackInfo {
    pub sound_id: u32,
}

/// Audio services consumed by running subroutines.
pub trait SoundDispatch {
    /// Starts playback and returns a handle for later control.
    fn play_sound(&mut self, pcm: &[u8], sound_id: u32, sample_rate: u32, looped: bool)
    -> NoteHandle;
    /// Stops a note. Unknown or finished handles are ignored.
    fn stop_sound(&mut self, handle: NoteHandle);
    /// Whether the note is still audible.
    fn is_playing(&self, handle: NoteHandle) -> bool;
    fn resolve_sound(&self, id: u32) -> Option<SoundAsset>;
    fn resolve_track(&self, id: u32) -> Option<TrackInfo>;
    fn resolve_hitlist(&self, id: u32) -> Option<Vec<u32>>;
}

/// Sound a track plays when nothing else is selected.
///
/// Ids with no track entry are taken to be sound ids themselves.
pub fn track_sound(dispatch: &dyn SoundDispatch, track_id: u32) -> u32 {
    dispatch
        .resolve_track(track_id)
        .map_or(track_id, |track| track.sound_id)
}
