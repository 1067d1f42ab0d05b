use crate::virtual_machine::config::VmConfig;
use crate::virtual_machine::dispatch::SoundDispatch;
use crate::virtual_machine::program::ProgramImage;
use crate::virtual_machine::variables::{GlobalTable, ObjectTable};
use rand_core::RngCore;
use std::rc::Rc;

/// Everything a subroutine may touch outside its own state during `advance`.
///
/// Built by the owner of the shared tables for the duration of one frame.
pub struct ExecEnv<'a> {
    pub globals: &'a mut GlobalTable,
    pub objects: &'a mut ObjectTable,
    pub dispatch: &'a mut dyn SoundDispatch,
    pub rng: &'a mut dyn RngCore,
    /// Spawn and kill requests raised by opcodes, applied after the frame.
    pub requests: &'a mut Vec<SchedulerRequest>,
    pub config: &'a VmConfig,
}

/// Work an opcode asks the scheduler to do on its behalf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerRequest {
    /// Start `track_id`, preferring the requesting program's export table.
    PlayTrack {
        program: Rc<ProgramImage>,
        track_id: u32,
    },
    /// Kill every live subroutine bound to the track.
    KillTrack(u32),
}
