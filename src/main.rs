//! HIT program player.
//!
//! Loads one HIT program as a resource group, triggers events or tracks and
//! runs the scheduler for a number of frames. Sound playback is simulated:
//! every sound id resolves and each note lasts a fixed number of frames.
//!
//! # Usage
//! ```text
//! hitvm <program.hit|program.asm> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `program`: Compiled container, or assembly source when it ends in `.asm`
//!
//! # Options
//! - `--events <file>`: Event list (`name,kind,track_id` per line)
//! - `--symbols <file>`: Symbol list (`name address` per line)
//! - `--play <event>`: Play an event before the first frame (repeatable)
//! - `--track <id>`: Play a track before the first frame (repeatable)
//! - `--frames <n>`: Frames to run (default 60)
//! - `--note-frames <n>`: Frames a simulated note lasts (default 30)
//! - `--set <loc>=<value>`: Set a global before the first frame (repeatable)
//! - `--log <level>`: Minimum log level, overriding `HITVM_LOG`

use hitvm::utils::log::{Level, set_max_level};
use hitvm::virtual_machine::assembler::{assemble_file, parse_int};
use hitvm::virtual_machine::config::VmConfig;
use hitvm::virtual_machine::dispatch::{NoteHandle, SoundAsset, SoundDispatch, TrackInfo};
use hitvm::virtual_machine::errors::VMError;
use hitvm::virtual_machine::program::ProgramImage;
use hitvm::virtual_machine::registry::ResourceGroup;
use hitvm::virtual_machine::runtime::VmContext;
use hitvm::{error, info, warn};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::process;
use std::rc::Rc;

const DEFAULT_FRAMES: u32 = 60;
const DEFAULT_NOTE_FRAMES: u64 = 30;
const SIMULATED_SAMPLE_RATE: u32 = 22_050;

/// Dispatch that logs instead of producing audio.
struct LoggingDispatch {
    frame: u64,
    note_frames: u64,
    next_handle: u32,
    /// Handle to the frame its note ends on.
    notes: HashMap<NoteHandle, u64>,
    played: usize,
    silence: Rc<[u8]>,
}

impl LoggingDispatch {
    fn new(note_frames: u64) -> Self {
        Self {
            frame: 0,
            note_frames,
            next_handle: 0,
            notes: HashMap::new(),
            played: 0,
            silence: Rc::from(Vec::new()),
        }
    }

    fn advance_frame(&mut self) {
        self.frame += 1;
        let now = self.frame;
        self.notes.retain(|_, ends| *ends > now);
    }
}

impl SoundDispatch for LoggingDispatch {
    fn play_sound(&mut self, _pcm: &[u8], sound_id: u32, sample_rate: u32, looped: bool) -> NoteHandle {
        self.next_handle += 1;
        let handle = NoteHandle(self.next_handle);
        let ends = if looped {
            u64::MAX
        } else {
            self.frame + self.note_frames
        };
        self.notes.insert(handle, ends);
        self.played += 1;
        info!(
            "frame {}: note {} plays sound {} at {} Hz{}",
            self.frame,
            handle.0,
            sound_id,
            sample_rate,
            if looped { " (looped)" } else { "" }
        );
        handle
    }

    fn stop_sound(&mut self, handle: NoteHandle) {
        if self.notes.remove(&handle).is_some() {
            info!("frame {}: note {} stopped", self.frame, handle.0);
        }
    }

    fn is_playing(&self, handle: NoteHandle) -> bool {
        self.notes.contains_key(&handle)
    }

    fn resolve_sound(&self, _id: u32) -> Option<SoundAsset> {
        Some(SoundAsset {
            pcm: Rc::clone(&self.silence),
            sample_rate: SIMULATED_SAMPLE_RATE,
        })
    }

    fn resolve_track(&self, _id: u32) -> Option<TrackInfo> {
        None
    }

    fn resolve_hitlist(&self, _id: u32) -> Option<Vec<u32>> {
        None
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let program_path = &args[1];
    let mut events_path: Option<String> = None;
    let mut symbols_path: Option<String> = None;
    let mut play: Vec<String> = Vec::new();
    let mut tracks: Vec<u32> = Vec::new();
    let mut frames = DEFAULT_FRAMES;
    let mut note_frames = DEFAULT_NOTE_FRAMES;
    let mut globals: Vec<(i32, i32)> = Vec::new();
    let mut log_level: Option<Level> = None;

    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        if !matches!(
            flag,
            "--events" | "--symbols" | "--play" | "--track" | "--frames" | "--note-frames"
                | "--set" | "--log"
        ) {
            error!("Unexpected argument: {}\n", flag);
            print_usage(&args[0]);
            process::exit(1);
        }
        i += 1;
        if i >= args.len() {
            error!("{flag} requires an argument");
            process::exit(1);
        }
        let value = &args[i];
        i += 1;

        match flag {
            "--events" => events_path = Some(value.clone()),
            "--symbols" => symbols_path = Some(value.clone()),
            "--play" => play.push(value.clone()),
            "--track" => tracks.push(parse_arg(flag, value)),
            "--frames" => frames = parse_arg(flag, value),
            "--note-frames" => note_frames = parse_arg(flag, value),
            "--set" => globals.push(parse_assignment(value)),
            _ => {
                log_level = Some(Level::parse(value).unwrap_or_else(|| {
                    error!("Invalid log level: '{}'", value);
                    process::exit(1);
                }));
            }
        }
    }

    let mut config = VmConfig::from_env();
    if let Some(level) = log_level {
        config.log_level = level;
    }
    set_max_level(config.log_level);

    let group = load_group(program_path, events_path.as_deref(), symbols_path.as_deref())
        .unwrap_or_else(|e| {
            error!("Failed to load {}: {}", program_path, e);
            process::exit(1);
        });

    let mut vm = VmContext::new(LoggingDispatch::new(note_frames), config);
    if let Err(e) = vm.register_group(group) {
        error!("{e}");
        process::exit(1);
    }

    for (location, value) in globals {
        vm.set_global_var(location, value);
    }

    for name in &play {
        match vm.play_event(name) {
            Ok(Some(handle)) => info!("event {name} started: {handle:?}"),
            Ok(None) => warn!("event {name} has nothing to play"),
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        }
    }
    for track in tracks {
        let id = vm.play_track(track);
        info!("track {track} started as {id}");
    }

    for _ in 0..frames {
        vm.step();
        vm.dispatch_mut().advance_frame();
    }

    info!(
        "ran {} frames: {} notes played, {} subroutines still live",
        frames,
        vm.dispatch().played,
        vm.scheduler().live_count()
    );
    vm.stop_all();
}

/// Builds the resource group named after the program file.
fn load_group(
    program_path: &str,
    events_path: Option<&str>,
    symbols_path: Option<&str>,
) -> Result<ResourceGroup, VMError> {
    let path = Path::new(program_path);
    let program = if path.extension().is_some_and(|ext| ext == "asm") {
        assemble_file(path)?
    } else {
        ProgramImage::from_file(path)?
    };

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program_path.to_string());
    let mut group = ResourceGroup::new(name, program);

    if let Some(events) = events_path {
        group = group.with_events(ResourceGroup::parse_event_list(&read_text(events)?)?);
    }
    if let Some(symbols) = symbols_path {
        group = group.with_symbols(ResourceGroup::parse_symbol_list(&read_text(symbols)?)?);
    }
    Ok(group)
}

fn read_text(path: &str) -> Result<String, VMError> {
    fs::read_to_string(path).map_err(|e| VMError::IoError {
        path: path.to_string(),
        source: e.to_string(),
    })
}

fn parse_arg<T: TryFrom<i64>>(flag: &str, value: &str) -> T {
    parse_int(value)
        .and_then(|v| T::try_from(v).ok())
        .unwrap_or_else(|| {
            error!("Invalid value for {flag}: '{value}'");
            process::exit(1);
        })
}

/// Parses `<location>=<value>`.
fn parse_assignment(value: &str) -> (i32, i32) {
    let Some((location, assigned)) = value.split_once('=') else {
        error!("Invalid --set '{}': expected <location>=<value>", value);
        process::exit(1);
    };
    (
        parse_arg("--set", location.trim()),
        parse_arg("--set", assigned.trim()),
    )
}

const USAGE: &str = "\
HIT Player

USAGE:
    {program} <program> [OPTIONS]

ARGS:
    <program>    Compiled .hit container, or .asm source

OPTIONS:
    --events <file>         Event list, one `name,kind,track_id` per line
    --symbols <file>        Symbol list, one `name address` per line
    --play <event>          Play an event before the first frame (repeatable)
    --track <id>            Play a track before the first frame (repeatable)
    --frames <n>            Frames to run (default 60)
    --note-frames <n>       Frames a simulated note lasts (default 30)
    --set <loc>=<value>     Set a global before the first frame (repeatable)
    --log <level>           debug, info, warn or error
    -h, --help              Print this help message

ENVIRONMENT:
    HITVM_OPCODE_BUDGET    Opcodes one subroutine may run per frame (default 4096)
    HITVM_TICK_MS          Milliseconds a frame removes from a wait (default 16)
    HITVM_LOG              Minimum log level (default info)

EXAMPLES:
    # Play an event from an assembled program
    {program} lobby.hit --events lobby.events --play door_open

    # Run a track straight from source for five seconds at 60 Hz
    {program} lobby.asm --track 1001 --frames 300

    # Start with the game paused
    {program} lobby.hit --events lobby.events --play music --set 0x66=1
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
