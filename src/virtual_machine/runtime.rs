//! Host-facing entry point tying the VM together.
//!
//! [`VmContext`] owns the shared variable tables, the event registry, the
//! scheduler and the sound dispatch. The host calls [`VmContext::step`] once
//! per frame and drives playback through the event and track methods.

use crate::virtual_machine::config::VmConfig;
use crate::virtual_machine::dispatch::SoundDispatch;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::program::ProgramImage;
use crate::virtual_machine::registry::{EventRegistry, EventTarget, ResourceGroup, normalize};
use crate::virtual_machine::scheduler::{Scheduler, SubroutineId, TvOnHandler};
use crate::virtual_machine::variables::{GlobalTable, ObjectTable};
use crate::virtual_machine::vm::{ExecEnv, SchedulerRequest};
use crate::{debug, info, warn};
use rand_core::{OsRng, RngCore};
use std::rc::Rc;

/// What a successful `play_event` started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventHandle {
    Subroutine(SubroutineId),
    /// Name of the TV-on handler, new or already running.
    TvOn(String),
}

/// The whole VM: shared state plus everything that acts on it.
pub struct VmContext<D: SoundDispatch, R: RngCore = OsRng> {
    globals: GlobalTable,
    objects: ObjectTable,
    registry: EventRegistry,
    scheduler: Scheduler,
    dispatch: D,
    rng: R,
    config: VmConfig,
    requests: Vec<SchedulerRequest>,
    /// Owner of SimpleMode spawns for tracks no loaded program exports.
    detached: Rc<ProgramImage>,
}

impl<D: SoundDispatch> VmContext<D, OsRng> {
    pub fn new(dispatch: D, config: VmConfig) -> Self {
        Self::with_rng(dispatch, config, OsRng)
    }
}

impl<D: SoundDispatch, R: RngCore> VmContext<D, R> {
    pub fn with_rng(dispatch: D, config: VmConfig, rng: R) -> Self {
        Self {
            globals: GlobalTable::new(),
            objects: ObjectTable::new(),
            registry: EventRegistry::new(),
            scheduler: Scheduler::new(),
            dispatch,
            rng,
            config,
            requests: Vec::new(),
            detached: Rc::new(ProgramImage::empty()),
        }
    }

    /// Runs one host frame.
    ///
    /// Spawn and kill requests raised by opcodes are applied after every
    /// subroutine has had its advance, so new instances first run next frame.
    pub fn step(&mut self) {
        let mut env = ExecEnv {
            globals: &mut self.globals,
            objects: &mut self.objects,
            dispatch: &mut self.dispatch,
            rng: &mut self.rng,
            requests: &mut self.requests,
            config: &self.config,
        };
        self.scheduler.step(&mut env);
        self.apply_requests();
    }

    fn apply_requests(&mut self) {
        for request in std::mem::take(&mut self.requests) {
            match request {
                SchedulerRequest::PlayTrack { program, track_id } => {
                    match program.entry_address(track_id) {
                        Some(entry) => {
                            self.scheduler.spawn(program, track_id, entry);
                        }
                        None => {
                            self.play_track(track_id);
                        }
                    }
                }
                SchedulerRequest::KillTrack(track_id) => {
                    self.kill_track(track_id);
                }
            }
        }
    }

    /// Starts the event called `name` (case-insensitive).
    ///
    /// Returns `Ok(None)` when the event is known but nothing can be played.
    pub fn play_event(&mut self, name: &str) -> Result<Option<EventHandle>, VMError> {
        match self.registry.resolve(name, &self.dispatch)? {
            EventTarget::Spawn {
                program,
                track_id,
                entry,
            } => {
                debug!("event {name}: track {track_id} at {entry}");
                let id = self.scheduler.spawn(program, track_id, entry);
                Ok(Some(EventHandle::Subroutine(id)))
            }
            EventTarget::TvOn { name, track_id } => {
                if !self.scheduler.is_tv_on_active(&name) {
                    let handler = TvOnHandler::new(name.clone(), track_id, &self.dispatch);
                    self.scheduler.install_tv_on(handler);
                }
                Ok(Some(EventHandle::TvOn(name)))
            }
            EventTarget::Silent => Ok(None),
        }
    }

    /// Stops the TV-on handler for `name`. Running subroutines are untouched.
    pub fn kill_event(&mut self, name: &str) -> bool {
        self.scheduler
            .kill_tv_on(&normalize(name), &mut self.dispatch)
    }

    /// Whether a TV-on handler for `name` is running.
    pub fn is_event_active(&self, name: &str) -> bool {
        self.scheduler.is_tv_on_active(&normalize(name))
    }

    /// Spawns `track_id` from the first registered program exporting it, or
    /// as SimpleMode when none does.
    pub fn play_track(&mut self, track_id: u32) -> SubroutineId {
        let (program, entry) = self
            .registry
            .find_track(track_id)
            .unwrap_or_else(|| (Rc::clone(&self.detached), 0));
        self.scheduler.spawn(program, track_id, entry)
    }

    /// Kills every subroutine bound to `track_id`; returns how many.
    pub fn kill_track(&mut self, track_id: u32) -> usize {
        let killed = self.scheduler.kill_track(track_id, &mut self.dispatch);
        debug!("kill_track {track_id}: {killed} removed");
        killed
    }

    pub fn is_track_active(&self, track_id: u32) -> bool {
        self.scheduler.is_track_active(track_id)
    }

    /// Reads a global by its absolute location (0x64..0x88).
    pub fn get_global_var(&self, location: i32) -> i32 {
        self.globals.get(location)
    }

    /// Writes a global; returns `false` if `location` has no slot.
    pub fn set_global_var(&mut self, location: i32, value: i32) -> bool {
        let stored = self.globals.set(location, value);
        if !stored {
            warn!("set_global_var: location {location} has no slot");
        }
        stored
    }

    /// Reads a scene-object property by its absolute location.
    pub fn get_object_var(&self, location: i32) -> i32 {
        self.objects.get(location)
    }

    /// Writes a scene-object property; returns `false` if `location` has no slot.
    pub fn set_object_var(&mut self, location: i32, value: i32) -> bool {
        let stored = self.objects.set(location, value);
        if !stored {
            warn!("set_object_var: location {location} has no slot");
        }
        stored
    }

    /// Registers a resource group; returns how many events it bound.
    pub fn register_group(&mut self, group: ResourceGroup) -> Result<usize, VMError> {
        self.registry.register(group)
    }

    /// Unloads a resource group.
    ///
    /// Kills subroutines running its program and TV-on handlers whose event
    /// is no longer registered. Returns how many subroutines were killed.
    pub fn unload_group(&mut self, name: &str) -> Result<usize, VMError> {
        let program = self.registry.unload(name)?;
        let killed = self.scheduler.kill_program(&program, &mut self.dispatch);

        let orphaned: Vec<String> = self
            .scheduler
            .tv_on_names()
            .filter(|event| !self.registry.contains(event))
            .map(str::to_string)
            .collect();
        for event in orphaned {
            self.scheduler.kill_tv_on(&event, &mut self.dispatch);
        }

        info!("group {name} unloaded, {killed} subroutines killed");
        Ok(killed)
    }

    /// Stops every subroutine and handler.
    pub fn stop_all(&mut self) {
        self.scheduler.clear(&mut self.dispatch);
        self.requests.clear();
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn dispatch(&self) -> &D {
        &self.dispatch
    }

    pub fn dispatch_mut(&mut self) -> &mut D {
        &mut self.dispatch
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::assembler::assemble_source;
    use crate::virtual_machine::dispatch::tests::{FixedRng, TestDispatch};
    use crate::virtual_machine::registry::{EventDef, EventKind};
    use crate::virtual_machine::variables::global;
    use std::collections::HashMap;

    type TestVm = VmContext<TestDispatch, FixedRng>;

    fn vm(dispatch: TestDispatch) -> TestVm {
        VmContext::with_rng(dispatch, VmConfig::default(), FixedRng::new(vec![0]))
    }

    fn event(name: &str, kind: EventKind, track_id: u32) -> EventDef {
        EventDef {
            name: name.to_string(),
            kind,
            track_id,
        }
    }

    fn group(name: &str, source: &str, events: Vec<EventDef>) -> ResourceGroup {
        ResourceGroup::new(name, assemble_source(source).expect("assembly failed"))
            .with_events(events)
    }

    /// Long enough that nothing completes during a test.
    const IDLE: &str = "loadl 20 100000\nwait 20\nend";

    #[test]
    fn play_event_without_symbols_uses_export_table() {
        let mut vm = vm(TestDispatch::new());
        vm.register_group(group(
            "g",
            &format!("export 5 start\nnop\nstart: {IDLE}"),
            vec![event("foo", EventKind::PlayTrack, 5)],
        ))
        .unwrap();

        let handle = vm.play_event("foo").unwrap();
        assert!(matches!(handle, Some(EventHandle::Subroutine(_))));
        assert_eq!(vm.scheduler().live_count(), 1);

        let Some(EventHandle::Subroutine(id)) = handle else {
            unreachable!()
        };
        let sub = vm.scheduler().get(id).unwrap();
        assert_eq!(sub.track_id(), 5);
        let entry = vm.registry().get("foo").unwrap().program.entry_address(5);
        assert_eq!(Some(sub.ip() as u32), entry);
    }

    #[test]
    fn play_event_with_symbol_override() {
        let program = assemble_source("export 5 a\na: nop\nb: end").unwrap();
        let b = program.code_start() as u32 + 1;
        let mut vm = vm(TestDispatch::new());
        vm.register_group(
            ResourceGroup::new("g", program)
                .with_events(vec![event("foo", EventKind::PlayTrack, 5)])
                .with_symbols(HashMap::from([("foo".to_string(), b)])),
        )
        .unwrap();

        let Some(EventHandle::Subroutine(id)) = vm.play_event("Foo").unwrap() else {
            panic!("expected a subroutine");
        };
        assert_eq!(vm.scheduler().get(id).unwrap().ip(), b as usize);
    }

    #[test]
    fn play_unknown_event_fails() {
        let mut vm = vm(TestDispatch::new());
        assert!(matches!(
            vm.play_event("missing"),
            Err(VMError::UnknownEvent { .. })
        ));
    }

    #[test]
    fn simple_mode_event_plays_and_is_reaped() {
        let mut vm = vm(TestDispatch::new().with_sound(77));
        vm.register_group(group(
            "g",
            "end",
            vec![event("ping", EventKind::PlayTrack, 77)],
        ))
        .unwrap();

        vm.play_event("ping").unwrap();
        assert_eq!(vm.scheduler().live_count(), 1);
        vm.step();
        assert_eq!(vm.dispatch().played_sounds(), vec![77]);
        assert_eq!(vm.scheduler().live_count(), 0);
    }

    #[test]
    fn music_mode_event_becomes_tv_on() {
        let mut vm = vm(TestDispatch::new());
        vm.register_group(group(
            "g",
            "end",
            vec![event("TV_Music", EventKind::SetMusicMode, 40)],
        ))
        .unwrap();

        let first = vm.play_event("tv_music").unwrap();
        assert_eq!(first, Some(EventHandle::TvOn("tv_music".to_string())));
        // a second play returns the running handler
        assert_eq!(vm.play_event("TV_MUSIC").unwrap(), first);
        assert!(vm.is_event_active("Tv_Music"));
        assert_eq!(vm.scheduler().live_count(), 0);

        assert!(vm.kill_event("tv_music"));
        assert!(!vm.is_event_active("tv_music"));
        assert!(!vm.kill_event("tv_music"));
    }

    #[test]
    fn kill_event_ignores_subroutines() {
        let mut vm = vm(TestDispatch::new());
        vm.register_group(group(
            "g",
            &format!("export 5 s\ns: {IDLE}"),
            vec![event("foo", EventKind::PlayTrack, 5)],
        ))
        .unwrap();
        vm.play_event("foo").unwrap();
        assert!(!vm.is_event_active("foo"));
        assert!(!vm.kill_event("foo"));
        assert_eq!(vm.scheduler().live_count(), 1);
    }

    #[test]
    fn kill_track_leaves_other_tracks_running() {
        let mut vm = vm(TestDispatch::new());
        vm.register_group(group(
            "g",
            &format!("export 1 s\nexport 2 s\nexport 3 s\ns: {IDLE}"),
            vec![],
        ))
        .unwrap();

        let a = vm.play_track(1);
        let b1 = vm.play_track(2);
        let c = vm.play_track(3);
        let b2 = vm.play_track(2);
        vm.step();
        assert_eq!(vm.scheduler().live_count(), 4);

        assert_eq!(vm.kill_track(2), 2);
        let s = vm.scheduler();
        assert!(s.is_alive(a) && s.is_alive(c));
        assert!(!s.is_alive(b1) && !s.is_alive(b2));
        assert!(vm.is_track_active(1));
        assert!(!vm.is_track_active(2));
    }

    #[test]
    fn play_track_without_export_is_simple_mode() {
        let mut vm = vm(TestDispatch::new().with_track(900, 901).with_sound(901));
        let id = vm.play_track(900);
        assert!(vm.scheduler().get(id).unwrap().is_simple_mode());
        vm.step();
        assert_eq!(vm.dispatch().played_sounds(), vec![901]);
    }

    #[test]
    fn play_trk_spawns_after_the_pass() {
        let mut vm = vm(TestDispatch::new());
        vm.register_group(group(
            "g",
            &format!("export 1 main\nexport 2 child\nmain: loadl 5 2\nplay_trk 5\nend\nchild: {IDLE}"),
            vec![],
        ))
        .unwrap();

        vm.play_track(1);
        vm.step();
        // main completed, child queued and spawned but not yet advanced
        assert!(!vm.is_track_active(1));
        assert!(vm.is_track_active(2));
        let (_, child) = vm.scheduler().subroutines().next().unwrap();
        assert_eq!(child.ip(), child.program().entry_address(2).unwrap() as usize);
    }

    #[test]
    fn play_trk_for_unexported_track_uses_simple_mode() {
        let mut vm = vm(TestDispatch::new().with_sound(3));
        vm.register_group(group("g", "export 1 m\nm: loadl 5 3\nplay_trk 5\nend", vec![]))
            .unwrap();
        vm.play_track(1);
        vm.step();
        vm.step();
        assert_eq!(vm.dispatch().played_sounds(), vec![3]);
    }

    #[test]
    fn kill_trk_from_bytecode() {
        let mut vm = vm(TestDispatch::new());
        vm.register_group(group(
            "g",
            &format!("export 1 killer\nexport 2 victim\nkiller: loadl 5 2\nkill_trk 5\nend\nvictim: {IDLE}"),
            vec![],
        ))
        .unwrap();
        vm.play_track(2);
        vm.play_track(2);
        vm.step();
        assert!(vm.is_track_active(2));

        vm.play_track(1);
        vm.step();
        assert_eq!(vm.scheduler().live_count(), 0);
    }

    #[test]
    fn globals_are_visible_to_bytecode() {
        let mut vm = vm(TestDispatch::new());
        vm.register_group(group(
            "g",
            &format!("export 1 s\ns: loadl 20 42\nset {} 20\nend", global::MAIN_VOLUME),
            vec![],
        ))
        .unwrap();
        assert!(vm.set_global_var(global::MAIN_SONG_NUM, 3));
        assert!(!vm.set_global_var(80, 3));
        vm.play_track(1);
        vm.step();
        assert_eq!(vm.get_global_var(global::MAIN_VOLUME), 42);
        assert_eq!(vm.get_global_var(global::MAIN_SONG_NUM), 3);
    }

    #[test]
    fn object_vars_round_trip() {
        let mut vm = vm(TestDispatch::new());
        assert!(vm.set_object_var(0x271C, 5));
        assert_eq!(vm.get_object_var(0x271C), 5);
        assert!(!vm.set_object_var(0x2737, 5));
    }

    #[test]
    fn waiting_on_global_resumes_after_host_write() {
        let mut vm = vm(TestDispatch::new().with_sound(6));
        vm.register_group(group(
            "g",
            &format!(
                "export 6 s\ns: loadl 5 1\nwaiteq {} 5\nnote_on 20\nend",
                global::MAIN_PAUSE
            ),
            vec![],
        ))
        .unwrap();
        vm.play_track(6);
        vm.step();
        vm.step();
        assert!(vm.dispatch().played.is_empty());

        vm.set_global_var(global::MAIN_PAUSE, 1);
        vm.step();
        assert_eq!(vm.dispatch().played_sounds(), vec![6]);
        assert!(!vm.is_track_active(6));
    }

    #[test]
    fn unload_group_kills_its_subroutines_and_handlers() {
        let mut vm = vm(TestDispatch::new().with_sound(1));
        vm.register_group(group(
            "base",
            &format!("export 1 s\ns: note_on 20\n{IDLE}"),
            vec![
                event("loop", EventKind::PlayTrack, 1),
                event("music", EventKind::SetMusicMode, 12),
            ],
        ))
        .unwrap();
        vm.register_group(group(
            "other",
            &format!("export 2 s\ns: {IDLE}"),
            vec![event("other", EventKind::PlayTrack, 2)],
        ))
        .unwrap();

        vm.play_event("loop").unwrap();
        vm.play_event("other").unwrap();
        vm.play_event("music").unwrap();
        vm.step();
        assert_eq!(vm.dispatch().played.len(), 1);

        assert_eq!(vm.unload_group("base").unwrap(), 1);
        assert_eq!(vm.scheduler().live_count(), 1);
        assert!(vm.is_track_active(2));
        assert!(!vm.is_event_active("music"));
        assert_eq!(vm.dispatch().stopped, vec![vm.dispatch().played[0].handle]);
        assert!(matches!(
            vm.play_event("loop"),
            Err(VMError::UnknownEvent { .. })
        ));
        assert!(matches!(
            vm.unload_group("base"),
            Err(VMError::UnknownGroup { .. })
        ));
    }

    #[test]
    fn stop_all_clears_everything() {
        let mut vm = vm(TestDispatch::new());
        vm.play_track(1);
        vm.play_track(2);
        vm.stop_all();
        assert_eq!(vm.scheduler().live_count(), 0);
    }
}
