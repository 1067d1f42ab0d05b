//! Frame-driven scheduler for running subroutines and TV-on handlers.
//!
//! Every [`Scheduler::step`] ticks each TV-on handler once, then advances
//! each live subroutine exactly once and drops the ones that completed or
//! faulted during that advance.

use crate::virtual_machine::dispatch::{NoteHandle, SoundDispatch, track_sound};
use crate::virtual_machine::program::ProgramImage;
use crate::virtual_machine::vm::{ExecEnv, RunningSubroutine, StepResult};
use crate::{debug, error, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Identifier of a spawned subroutine, unique for the scheduler's lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubroutineId(pub u64);

impl fmt::Display for SubroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Persistent player for events that have no bytecode.
///
/// Keeps one note going: whenever the current note has finished, the next
/// one starts. With a hitlist bound to the track id the handler walks it in
/// order and wraps around; otherwise it repeats the track's own sound.
pub struct TvOnHandler {
    name: String,
    track_id: u32,
    hitlist: Vec<u32>,
    position: usize,
    note: Option<NoteHandle>,
    warned: bool,
}

impl TvOnHandler {
    pub fn new(name: impl Into<String>, track_id: u32, dispatch: &dyn SoundDispatch) -> Self {
        Self {
            name: name.into(),
            track_id,
            hitlist: dispatch.resolve_hitlist(track_id).unwrap_or_default(),
            position: 0,
            note: None,
            warned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    /// Note currently owned by the handler, if any.
    pub fn note(&self) -> Option<NoteHandle> {
        self.note
    }

    fn next_sound(&mut self, dispatch: &dyn SoundDispatch) -> u32 {
        if self.hitlist.is_empty() {
            return track_sound(dispatch, self.track_id);
        }
        let entry = self.hitlist[self.position % self.hitlist.len()];
        self.position = (self.position + 1) % self.hitlist.len();
        track_sound(dispatch, entry)
    }

    /// Starts the next note once the previous one has stopped.
    pub fn tick(&mut self, dispatch: &mut dyn SoundDispatch) {
        if let Some(handle) = self.note {
            if dispatch.is_playing(handle) {
                return;
            }
            self.note = None;
        }

        let sound_id = self.next_sound(dispatch);
        match dispatch.resolve_sound(sound_id) {
            Some(asset) => {
                let handle = dispatch.play_sound(&asset.pcm, sound_id, asset.sample_rate, false);
                debug!("tv-on {}: playing sound {} as note {}", self.name, sound_id, handle.0);
                self.note = Some(handle);
                self.warned = false;
            }
            None => {
                if !self.warned {
                    warn!("tv-on {}: sound {} not found", self.name, sound_id);
                    self.warned = true;
                }
            }
        }
    }

    /// Stops the current note.
    pub fn stop(&mut self, dispatch: &mut dyn SoundDispatch) {
        if let Some(handle) = self.note.take() {
            dispatch.stop_sound(handle);
        }
    }
}

/// Owner of every live subroutine and TV-on handler.
#[derive(Default)]
pub struct Scheduler {
    live: Vec<(SubroutineId, RunningSubroutine)>,
    tv_on: BTreeMap<String, TvOnHandler>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subroutine for `track_id` entering at `entry` (0 = SimpleMode).
    ///
    /// It is first advanced by the next [`step`](Self::step).
    pub fn spawn(&mut self, program: Rc<ProgramImage>, track_id: u32, entry: u32) -> SubroutineId {
        self.next_id += 1;
        let id = SubroutineId(self.next_id);
        debug!("spawn {id}: track {track_id} at {entry}");
        self.live
            .push((id, RunningSubroutine::new(program, track_id, entry)));
        id
    }

    /// Runs one frame.
    ///
    /// A subroutine that completes or returns an error during its advance is
    /// removed in the same pass. Errors are logged and do not affect others.
    /// A faulted subroutine has all its notes stopped; a completed one only
    /// its looped notes.
    pub fn step(&mut self, env: &mut ExecEnv<'_>) {
        for handler in self.tv_on.values_mut() {
            handler.tick(env.dispatch);
        }

        self.live.retain_mut(|(id, sub)| match sub.advance(env) {
            Ok(StepResult::Completed) => {
                debug!("reap {id}: track {} completed", sub.track_id());
                sub.stop_looped_notes(env.dispatch);
                false
            }
            Ok(StepResult::Continue | StepResult::Suspended) => true,
            Err(e) => {
                error!("track {} ({id}) faulted at {}: {e}", sub.track_id(), sub.ip());
                sub.stop_notes(env.dispatch);
                false
            }
        });
    }

    /// Removes every subroutine bound to `track_id` and stops their notes.
    ///
    /// Returns how many were removed.
    pub fn kill_track(&mut self, track_id: u32, dispatch: &mut dyn SoundDispatch) -> usize {
        self.kill_where(dispatch, |sub| sub.track_id() == track_id)
    }

    /// Removes every subroutine running `program`.
    pub fn kill_program(
        &mut self,
        program: &Rc<ProgramImage>,
        dispatch: &mut dyn SoundDispatch,
    ) -> usize {
        self.kill_where(dispatch, |sub| Rc::ptr_eq(sub.program(), program))
    }

    /// Removes everything, including TV-on handlers.
    pub fn clear(&mut self, dispatch: &mut dyn SoundDispatch) {
        self.kill_where(dispatch, |_| true);
        for (_, mut handler) in std::mem::take(&mut self.tv_on) {
            handler.stop(dispatch);
        }
    }

    fn kill_where<F>(&mut self, dispatch: &mut dyn SoundDispatch, pred: F) -> usize
    where
        F: Fn(&RunningSubroutine) -> bool,
    {
        let before = self.live.len();
        self.live.retain_mut(|(id, sub)| {
            if !pred(sub) {
                return true;
            }
            debug!("kill {id}: track {}", sub.track_id());
            sub.stop_notes(dispatch);
            false
        });
        before - self.live.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_alive(&self, id: SubroutineId) -> bool {
        self.live.iter().any(|(live, _)| *live == id)
    }

    pub fn get(&self, id: SubroutineId) -> Option<&RunningSubroutine> {
        self.live
            .iter()
            .find(|(live, _)| *live == id)
            .map(|(_, sub)| sub)
    }

    /// Whether any live subroutine is bound to `track_id`.
    pub fn is_track_active(&self, track_id: u32) -> bool {
        self.live.iter().any(|(_, sub)| sub.track_id() == track_id)
    }

    /// Live subroutines in spawn order.
    pub fn subroutines(&self) -> impl Iterator<Item = (SubroutineId, &RunningSubroutine)> {
        self.live.iter().map(|(id, sub)| (*id, sub))
    }

    /// Registers a TV-on handler under its name.
    ///
    /// Returns `false` and keeps the existing handler when the name is taken.
    pub fn install_tv_on(&mut self, handler: TvOnHandler) -> bool {
        if self.tv_on.contains_key(handler.name()) {
            return false;
        }
        debug!("tv-on {} installed for track {}", handler.name(), handler.track_id());
        self.tv_on.insert(handler.name().to_string(), handler);
        true
    }

    /// Stops and removes the named TV-on handler.
    pub fn kill_tv_on(&mut self, name: &str, dispatch: &mut dyn SoundDispatch) -> bool {
        match self.tv_on.remove(name) {
            Some(mut handler) => {
                handler.stop(dispatch);
                debug!("tv-on {name} killed");
                true
            }
            None => false,
        }
    }

    pub fn is_tv_on_active(&self, name: &str) -> bool {
        self.tv_on.contains_key(name)
    }

    pub fn tv_on_handler(&self, name: &str) -> Option<&TvOnHandler> {
        self.tv_on.get(name)
    }

    /// Names of the installed TV-on handlers, sorted.
    pub fn tv_on_names(&self) -> impl Iterator<Item = &str> {
        self.tv_on.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::assembler::assemble_source;
    use crate::virtual_machine::config::VmConfig;
    use crate::virtual_machine::dispatch::tests::{FixedRng, TestDispatch};
    use crate::virtual_machine::variables::{GlobalTable, ObjectTable};
    use crate::virtual_machine::vm::SchedulerRequest;

    struct Frame {
        globals: GlobalTable,
        objects: ObjectTable,
        dispatch: TestDispatch,
        rng: FixedRng,
        requests: Vec<SchedulerRequest>,
        config: VmConfig,
    }

    impl Frame {
        fn new(dispatch: TestDispatch) -> Self {
            Self {
                globals: GlobalTable::new(),
                objects: ObjectTable::new(),
                dispatch,
                rng: FixedRng::new(vec![0]),
                requests: Vec::new(),
                config: VmConfig::default(),
            }
        }

        fn step(&mut self, scheduler: &mut Scheduler) {
            let mut env = ExecEnv {
                globals: &mut self.globals,
                objects: &mut self.objects,
                dispatch: &mut self.dispatch,
                rng: &mut self.rng,
                requests: &mut self.requests,
                config: &self.config,
            };
            scheduler.step(&mut env);
        }
    }

    fn program(source: &str) -> (Rc<ProgramImage>, u32) {
        let image = assemble_source(source).expect("assembly failed");
        let entry = image.code_start() as u32;
        (Rc::new(image), entry)
    }

    #[test]
    fn spawn_ids_are_unique() {
        let (image, entry) = program("end");
        let mut s = Scheduler::new();
        let a = s.spawn(Rc::clone(&image), 1, entry);
        let b = s.spawn(image, 1, entry);
        assert_ne!(a, b);
        assert_eq!(s.live_count(), 2);
        assert!(s.is_alive(a) && s.is_alive(b));
    }

    #[test]
    fn completed_subroutines_are_reaped_same_step() {
        let (done, done_at) = program("end");
        let (waiting, waiting_at) = program("loadl 20 100\nwait 20\nend");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new());

        let a = s.spawn(Rc::clone(&done), 1, done_at);
        let b = s.spawn(waiting, 2, waiting_at);
        let c = s.spawn(done, 3, done_at);

        frame.step(&mut s);
        assert!(!s.is_alive(a));
        assert!(s.is_alive(b));
        assert!(!s.is_alive(c));
        assert_eq!(s.live_count(), 1);
    }

    #[test]
    fn each_subroutine_advances_once_per_step() {
        // every advance suspends once, so the wait counts steps exactly
        let (image, entry) = program("loadl 20 48\nwait 20\nend");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new());
        for track in 0..4 {
            s.spawn(Rc::clone(&image), track, entry);
        }

        frame.step(&mut s);
        frame.step(&mut s);
        assert_eq!(s.live_count(), 4);
        frame.step(&mut s);
        assert_eq!(s.live_count(), 0);
    }

    #[test]
    fn faulting_subroutine_is_removed_alone() {
        let (bad, bad_at) = program("loadl 5 1\ndiv 5 6");
        let (good, good_at) = program("loadl 20 100\nwait 20\nend");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new());
        let bad_id = s.spawn(bad, 1, bad_at);
        let good_id = s.spawn(good, 2, good_at);

        frame.step(&mut s);
        assert!(!s.is_alive(bad_id));
        assert!(s.is_alive(good_id));
    }

    #[test]
    fn faulting_subroutine_stops_its_notes() {
        let (image, entry) = program("note_on 20\nnote_on_loop 21\nloadl 5 1\ndiv 5 6");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new().with_sound(9));
        s.spawn(image, 9, entry);

        frame.step(&mut s);
        assert_eq!(s.live_count(), 0);
        assert_eq!(frame.dispatch.played.len(), 2);
        for call in &frame.dispatch.played {
            assert!(!frame.dispatch.is_playing(call.handle));
        }
    }

    #[test]
    fn completion_stops_looped_notes_only() {
        let (image, entry) = program("note_on 20\nnote_on_loop 21\nend");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new().with_sound(9));
        s.spawn(image, 9, entry);

        frame.step(&mut s);
        assert_eq!(s.live_count(), 0);
        let one_shot = frame.dispatch.played[0].handle;
        let looped = frame.dispatch.played[1].handle;
        assert!(frame.dispatch.played[1].looped);
        assert_eq!(frame.dispatch.stopped, vec![looped]);
        assert!(frame.dispatch.is_playing(one_shot));
    }

    #[test]
    fn note_off_before_completion_is_not_stopped_twice() {
        let (image, entry) = program("note_on_loop 20\nnote_off 20\nend");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new().with_sound(9));
        s.spawn(image, 9, entry);

        frame.step(&mut s);
        assert_eq!(frame.dispatch.stopped, vec![frame.dispatch.played[0].handle]);
    }

    #[test]
    fn kill_track_removes_only_matching_instances() {
        let (image, entry) = program("loadl 20 1000\nwait 20\nend");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new());
        let keep_a = s.spawn(Rc::clone(&image), 10, entry);
        s.spawn(Rc::clone(&image), 20, entry);
        let keep_b = s.spawn(Rc::clone(&image), 30, entry);
        s.spawn(image, 20, entry);
        frame.step(&mut s);

        assert_eq!(s.kill_track(20, &mut frame.dispatch), 2);
        assert_eq!(s.live_count(), 2);
        assert!(s.is_alive(keep_a) && s.is_alive(keep_b));
        assert!(!s.is_track_active(20));
        assert_eq!(s.kill_track(20, &mut frame.dispatch), 0);
    }

    #[test]
    fn kill_stops_recorded_notes() {
        let (image, entry) = program("note_on 20\nloadl 21 1000\nwait 21\nend");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new().with_sound(5));
        s.spawn(image, 5, entry);
        frame.step(&mut s);
        assert_eq!(frame.dispatch.played.len(), 1);

        s.kill_track(5, &mut frame.dispatch);
        assert_eq!(frame.dispatch.stopped, vec![frame.dispatch.played[0].handle]);
    }

    #[test]
    fn kill_program_matches_by_identity() {
        let (first, entry) = program("loadl 20 1000\nwait 20\nend");
        // same bytes, different image
        let second = Rc::new((*first).clone());
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new());
        s.spawn(Rc::clone(&first), 1, entry);
        s.spawn(Rc::clone(&second), 1, entry);

        assert_eq!(s.kill_program(&first, &mut frame.dispatch), 1);
        assert_eq!(s.live_count(), 1);
    }

    #[test]
    fn tv_on_replays_when_note_finishes() {
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new().with_sound(7));
        assert!(s.install_tv_on(TvOnHandler::new("music", 7, &frame.dispatch)));

        frame.step(&mut s);
        frame.step(&mut s);
        assert_eq!(frame.dispatch.played_sounds(), vec![7]);

        let first = frame.dispatch.played[0].handle;
        frame.dispatch.finish(first);
        frame.step(&mut s);
        assert_eq!(frame.dispatch.played_sounds(), vec![7, 7]);
        assert_eq!(
            s.tv_on_handler("music").and_then(TvOnHandler::note),
            Some(frame.dispatch.played[1].handle)
        );
    }

    #[test]
    fn tv_on_cycles_hitlist() {
        let mut s = Scheduler::new();
        let dispatch = TestDispatch::new()
            .with_hitlist(40, vec![1, 2])
            .with_sound(1)
            .with_sound(2);
        let mut frame = Frame::new(dispatch);
        s.install_tv_on(TvOnHandler::new("radio", 40, &frame.dispatch));

        for _ in 0..3 {
            frame.step(&mut s);
            let last = frame.dispatch.played.last().unwrap().handle;
            frame.dispatch.finish(last);
        }
        assert_eq!(frame.dispatch.played_sounds(), vec![1, 2, 1]);
    }

    #[test]
    fn tv_on_install_is_idempotent_and_kill_stops_note() {
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new().with_sound(7));
        assert!(s.install_tv_on(TvOnHandler::new("music", 7, &frame.dispatch)));
        assert!(!s.install_tv_on(TvOnHandler::new("music", 8, &frame.dispatch)));
        assert_eq!(s.tv_on_handler("music").map(TvOnHandler::track_id), Some(7));

        frame.step(&mut s);
        assert!(s.kill_tv_on("music", &mut frame.dispatch));
        assert!(!s.is_tv_on_active("music"));
        assert_eq!(frame.dispatch.stopped, vec![frame.dispatch.played[0].handle]);
        assert!(!s.kill_tv_on("music", &mut frame.dispatch));
    }

    #[test]
    fn tv_on_does_not_count_as_subroutine() {
        let mut s = Scheduler::new();
        let frame = Frame::new(TestDispatch::new());
        s.install_tv_on(TvOnHandler::new("music", 7, &frame.dispatch));
        assert_eq!(s.live_count(), 0);
        assert_eq!(s.tv_on_names().collect::<Vec<_>>(), vec!["music"]);
    }

    #[test]
    fn clear_stops_everything() {
        let (image, entry) = program("note_on 20\nloadl 21 1000\nwait 21\nend");
        let mut s = Scheduler::new();
        let mut frame = Frame::new(TestDispatch::new().with_sound(5).with_sound(7));
        s.spawn(image, 5, entry);
        s.install_tv_on(TvOnHandler::new("music", 7, &frame.dispatch));
        frame.step(&mut s);

        s.clear(&mut frame.dispatch);
        assert_eq!(s.live_count(), 0);
        assert!(!s.is_tv_on_active("music"));
        assert_eq!(frame.dispatch.stopped.len(), 2);
    }
}
