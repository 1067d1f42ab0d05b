//! HIT subroutine interpreter.
//!
//! A [`RunningSubroutine`] is one instruction pointer walking a shared
//! [`ProgramImage`]. The host drives it through [`RunningSubroutine::advance`],
//! which runs opcodes until the instance completes, suspends itself with a
//! `wait*` opcode, or spends the frame's opcode budget.
//!
//! Suspension is cooperative: a waiting opcode rewinds the instruction
//! pointer to its own first byte and is decoded again on the next advance.

mod budget;
mod context;

pub use budget::OpcodeBudget;
pub use context::{ExecEnv, SchedulerRequest};

use crate::virtual_machine::dispatch::{NoteHandle, SoundDispatch, track_sound};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{INDIRECT_JUMP_MAX, Instruction, JumpTarget};
use crate::virtual_machine::program::ProgramImage;
use crate::virtual_machine::variables::{Frame, REGISTER_COUNT, VariableSpace};
use crate::{debug, warn};
use rand_core::RngCore;
use std::rc::Rc;

/// Sentinel for "no `wait` in progress".
const NOT_WAITING: i32 = -1;

/// Outcome of one [`RunningSubroutine::advance`] call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StepResult {
    /// Opcode budget spent; resume next frame.
    Continue,
    /// `return`, `end`, end of code, or a SimpleMode play. Terminal.
    Completed,
    /// A wait opcode is pending; it re-runs next frame.
    Suspended,
}

macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        env = $env:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident $args:tt ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => {
                    let instr_name = $instr.mnemonic();
                    exec_vm!(@call $vm, $env, instr_name, $handler, $args)
                }
            ),*
        }
    }};

    // Handler that needs the execution environment (semicolon separator)
    (@call $vm:ident, $env:ident, $instr_name:expr, $handler:ident,
        (env; $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_vm!(@read $vm, $kind)?; )*
        $vm.$handler($instr_name, $env, $( $field ),*)
    }};

    // Handler working on instance state only
    (@call $vm:ident, $env:ident, $instr_name:expr, $handler:ident,
        ( $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_vm!(@read $vm, $kind)?; )*
        $vm.$handler($instr_name, $( $field ),*)
    }};

    // 1-byte variable location
    (@read $vm:ident, Var) => {{
        Ok::<u8, VMError>($vm.read_exact(1)?[0])
    }};

    // 1-byte literal, sign-extended by the handler
    (@read $vm:ident, Imm8) => {{
        Ok::<u8, VMError>($vm.read_exact(1)?[0])
    }};

    // 4-byte little-endian literal
    (@read $vm:ident, Imm32) => {{
        $vm.read_u32().map(|v| v as i32)
    }};

    // 4-byte little-endian absolute address
    (@read $vm:ident, Addr) => {{
        $vm.read_u32()
    }};

    // variable location or address, decided by the first byte
    (@read $vm:ident, Target) => {{
        $vm.read_jump_target()
    }};
}

/// Uniform value in `lo..=hi`; `lo` when the range is empty.
pub fn random_inclusive(rng: &mut dyn RngCore, lo: i32, hi: i32) -> i32 {
    if hi <= lo {
        return lo;
    }
    let span = (i64::from(hi) - i64::from(lo) + 1) as u64;
    (i64::from(lo) + (rng.next_u64() % span) as i64) as i32
}

/// One running instance of a program.
pub struct RunningSubroutine {
    /// Image this instance executes; shared with its siblings.
    program: Rc<ProgramImage>,
    /// Track the instance was spawned for. Used by `kill_track`.
    track_id: u32,
    /// Track whose sound `note_on` falls back to; moved by `smart_index`.
    selected_track: u32,
    /// Entry offset, target of `loop` before any `set_loop`.
    entry: u32,
    /// Instruction pointer (absolute image offset).
    ip: usize,
    /// Offset of the opcode being executed.
    instr_offset: usize,
    /// Pushed by `call`; never popped.
    call_stack: Vec<u32>,
    frame: Frame,
    zero_flag: bool,
    sign_flag: bool,
    wait_remaining: i32,
    loop_point: Option<u32>,
    simple_mode: bool,
    completed: bool,
    /// Signal raised by the opcode just executed.
    pending: Option<StepResult>,
    /// Bound hitlist for `smart_choose` / `smart_index`.
    hitlist: Vec<u32>,
    /// Set once the track's own hitlist has been resolved.
    hitlist_bound: bool,
    active_notes: Vec<NoteHandle>,
    /// Subset of `active_notes` started by `note_on_loop`.
    looped_notes: Vec<NoteHandle>,
}

impl RunningSubroutine {
    /// Creates an instance for `track_id` entering at `entry`.
    ///
    /// An entry of 0 yields a SimpleMode instance that plays the track's sound
    /// once on its first advance and completes without running bytecode.
    pub fn new(program: Rc<ProgramImage>, track_id: u32, entry: u32) -> Self {
        Self {
            program,
            track_id,
            selected_track: track_id,
            entry,
            ip: entry as usize,
            instr_offset: entry as usize,
            call_stack: Vec::new(),
            frame: Frame::default(),
            zero_flag: false,
            sign_flag: false,
            wait_remaining: NOT_WAITING,
            loop_point: None,
            simple_mode: entry == 0,
            completed: false,
            pending: None,
            hitlist: Vec::new(),
            hitlist_bound: false,
            active_notes: Vec::new(),
            looped_notes: Vec::new(),
        }
    }

    pub fn program(&self) -> &Rc<ProgramImage> {
        &self.program
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_simple_mode(&self) -> bool {
        self.simple_mode
    }

    pub fn active_notes(&self) -> &[NoteHandle] {
        &self.active_notes
    }

    /// Per-instance variables (Arg, Register, Local partitions).
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    /// Stops every note this instance started.
    pub fn stop_notes(&mut self, dispatch: &mut dyn SoundDispatch) {
        for handle in self.active_notes.drain(..) {
            dispatch.stop_sound(handle);
        }
        self.looped_notes.clear();
    }

    /// Stops the notes started by `note_on_loop`. One-shot notes keep playing.
    pub fn stop_looped_notes(&mut self, dispatch: &mut dyn SoundDispatch) {
        for handle in self.looped_notes.drain(..) {
            dispatch.stop_sound(handle);
            self.active_notes.retain(|h| *h != handle);
        }
    }

    /// Runs until completion, suspension, or the opcode budget is spent.
    ///
    /// Calling it again on a completed instance is a no-op returning
    /// [`StepResult::Completed`].
    pub fn advance(&mut self, env: &mut ExecEnv<'_>) -> Result<StepResult, VMError> {
        if self.completed {
            return Ok(StepResult::Completed);
        }

        if self.simple_mode {
            self.play_simple(env);
            self.completed = true;
            return Ok(StepResult::Completed);
        }

        if !self.hitlist_bound {
            self.hitlist = env
                .dispatch
                .resolve_hitlist(self.track_id)
                .unwrap_or_default();
            self.hitlist_bound = true;
        }

        let mut budget = OpcodeBudget::new(env.config.opcode_budget);
        while budget.consume() {
            let opcode_offset = self.ip;
            let Some(&opcode) = self.program.bytes().get(opcode_offset) else {
                debug!(
                    "track {} ran off the end of its program at {}",
                    self.track_id, opcode_offset
                );
                self.completed = true;
                return Ok(StepResult::Completed);
            };
            self.ip += 1;
            self.instr_offset = opcode_offset;

            let instr = Instruction::try_from(opcode).map_err(|_| VMError::InvalidInstruction {
                opcode,
                offset: opcode_offset,
            })?;
            self.exec(instr, env)?;

            if let Some(result) = self.pending.take() {
                if result == StepResult::Completed {
                    self.completed = true;
                }
                return Ok(result);
            }
        }

        debug!(
            "track {} spent its budget of {} opcodes at {}",
            self.track_id,
            budget.used(),
            self.ip
        );
        Ok(StepResult::Continue)
    }

    /// Reads exactly `count` bytes from the image at the current IP.
    ///
    /// Advances the instruction pointer by `count` bytes.
    fn read_exact(&mut self, count: usize) -> Result<&[u8], VMError> {
        let start = self.ip;
        let end = self
            .ip
            .checked_add(count)
            .ok_or(VMError::InvalidIP { ip: self.ip })?;
        let data = self.program.bytes();
        let available = data.len().saturating_sub(start);

        let slice = data
            .get(start..end)
            .ok_or(VMError::UnexpectedEndOfBytecode {
                ip: start,
                requested: count,
                available,
            })?;

        self.ip = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, VMError> {
        let b = self.read_exact(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A first byte up to [`INDIRECT_JUMP_MAX`] names a variable; anything
    /// else is the low byte of a 4-byte address.
    fn read_jump_target(&mut self) -> Result<JumpTarget, VMError> {
        let first = self.read_exact(1)?[0];
        if first <= INDIRECT_JUMP_MAX {
            return Ok(JumpTarget::Variable(first));
        }
        self.ip -= 1;
        self.read_u32().map(JumpTarget::Address)
    }

    /// Executes a single instruction.
    fn exec(&mut self, instruction: Instruction, env: &mut ExecEnv<'_>) -> Result<(), VMError> {
        exec_vm! {
            vm = self,
            env = env,
            instr = instruction,
            {
                // Playback
                NoteOn => op_note_on(env; dest: Var),
                NoteOff => op_note_off(env; src: Var),
                NoteOnLoop => op_note_on_loop(env; dest: Var),
                PlayTrk => op_play_trk(env; src: Var),
                KillTrk => op_kill_trk(env; src: Var),
                // Data movement
                LoadB => op_loadb(env; dest: Var, imm: Imm8),
                LoadL => op_loadl(env; dest: Var, imm: Imm32),
                Set => op_set(env; dest: Var, src: Var),
                SetLL => op_set(env; dest: Var, src: Var),
                SetLT => op_set(env; dest: Var, src: Var),
                SetTT => op_set(env; dest: Var, src: Var),
                // Register arithmetic
                Add => op_add(dest: Var, src: Var),
                Sub => op_sub(dest: Var, src: Var),
                Div => op_div(dest: Var, src: Var),
                Mul => op_mul(dest: Var, src: Var),
                Cmp => op_sub(dest: Var, src: Var),
                Test => op_test(env; src: Var),
                Rand => op_rand(env; dest: Var, lo: Var, hi: Var),
                // Control flow
                Call => op_call(addr: Addr),
                Return => op_complete(),
                End => op_complete(),
                Jump => op_jump(env; target: Target),
                Nop => op_nop(),
                IfEq => op_ifeq(addr: Addr),
                IfNe => op_ifne(addr: Addr),
                IfGt => op_ifgt(addr: Addr),
                IfLt => op_iflt(addr: Addr),
                IfGe => op_ifge(addr: Addr),
                IfLe => op_ifle(addr: Addr),
                Loop => op_loop(),
                SetLoop => op_set_loop(),
                // Timing
                Wait => op_wait(env; src: Var),
                WaitEq => op_waiteq(env; a: Var, b: Var),
                WaitNe => op_waitne(env; a: Var, b: Var),
                WaitGt => op_waitgt(env; a: Var, b: Var),
                WaitLt => op_waitlt(env; a: Var, b: Var),
                WaitGe => op_waitge(env; a: Var, b: Var),
                WaitLe => op_waitle(env; a: Var, b: Var),
                // Hitlists
                SmartChoose => op_smart_choose(env; dest: Var),
                SmartSetList => op_smart_setlist(env; src: Var),
                SmartIndex => op_smart_index(env; dest: Var, src: Var),
                // Operands only
                Test1 => op_placeholder1(a: Var),
                Test2 => op_placeholder1(a: Var),
                Test3 => op_placeholder1(a: Var),
                Test4 => op_placeholder1(a: Var),
                SeqGroupKill => op_placeholder1(a: Var),
                SeqGroupWait => op_placeholder1(a: Var),
                SeqGroupReturn => op_placeholder1(a: Var),
                GetSrcDataField => op_placeholder3(a: Var, b: Var, c: Var),
                SeqGroupTrkId => op_placeholder2(a: Var, b: Var),
                Duck => op_placeholder1(a: Var),
                Unduck => op_nop(),
                SetSrcDataField => op_placeholder3(a: Var, b: Var, c: Var),
            }
        }
    }

    fn get_var(&mut self, env: &mut ExecEnv<'_>, location: u8) -> i32 {
        VariableSpace::new(&mut self.frame, env.globals, env.objects).get(i32::from(location))
    }

    fn set_var(&mut self, env: &mut ExecEnv<'_>, location: u8, value: i32) {
        VariableSpace::new(&mut self.frame, env.globals, env.objects).set(i32::from(location), value)
    }

    fn jump_to(&mut self, addr: u32) -> Result<(), VMError> {
        let target = addr as usize;
        if target < self.program.code_start() || target >= self.program.bytes().len() {
            return Err(VMError::InvalidIP { ip: target });
        }
        self.ip = target;
        Ok(())
    }

    /// Re-runs the current opcode on the next advance.
    fn suspend(&mut self) {
        self.ip = self.instr_offset;
        self.pending = Some(StepResult::Suspended);
    }

    fn play_simple(&mut self, env: &mut ExecEnv<'_>) {
        let sound_id = track_sound(env.dispatch, self.track_id);
        match env.dispatch.resolve_sound(sound_id) {
            Some(asset) => {
                let handle = env
                    .dispatch
                    .play_sound(&asset.pcm, sound_id, asset.sample_rate, false);
                self.active_notes.push(handle);
            }
            None => warn!(
                "track {}: sound {} not found, nothing played",
                self.track_id, sound_id
            ),
        }
    }

    fn start_note(
        &mut self,
        instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
        looped: bool,
    ) -> Result<(), VMError> {
        let sound_id = match self.frame.sound_id {
            0 => track_sound(env.dispatch, self.selected_track),
            id => id,
        };

        let Some(asset) = env.dispatch.resolve_sound(sound_id) else {
            warn!(
                "{instr}: sound {sound_id} not found for track {}",
                self.track_id
            );
            self.set_var(env, dest, -1);
            return Ok(());
        };

        let handle = env
            .dispatch
            .play_sound(&asset.pcm, sound_id, asset.sample_rate, looped);
        self.active_notes.push(handle);
        if looped {
            self.looped_notes.push(handle);
        }
        self.set_var(env, dest, handle.0 as i32);
        Ok(())
    }

    fn op_note_on(
        &mut self,
        instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
    ) -> Result<(), VMError> {
        self.start_note(instr, env, dest, false)
    }

    fn op_note_on_loop(
        &mut self,
        instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
    ) -> Result<(), VMError> {
        self.start_note(instr, env, dest, true)
    }

    fn op_note_off(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        src: u8,
    ) -> Result<(), VMError> {
        let handle = NoteHandle(self.get_var(env, src) as u32);
        env.dispatch.stop_sound(handle);
        self.active_notes.retain(|h| *h != handle);
        self.looped_notes.retain(|h| *h != handle);
        Ok(())
    }

    fn op_play_trk(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        src: u8,
    ) -> Result<(), VMError> {
        let track_id = self.get_var(env, src) as u32;
        env.requests.push(SchedulerRequest::PlayTrack {
            program: Rc::clone(&self.program),
            track_id,
        });
        Ok(())
    }

    fn op_kill_trk(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        src: u8,
    ) -> Result<(), VMError> {
        let track_id = self.get_var(env, src) as u32;
        env.requests.push(SchedulerRequest::KillTrack(track_id));
        Ok(())
    }

    fn op_loadb(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
        imm: u8,
    ) -> Result<(), VMError> {
        self.set_var(env, dest, i32::from(imm as i8));
        Ok(())
    }

    fn op_loadl(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
        imm: i32,
    ) -> Result<(), VMError> {
        self.set_var(env, dest, imm);
        Ok(())
    }

    fn op_set(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
        src: u8,
    ) -> Result<(), VMError> {
        let value = self.get_var(env, src);
        self.set_var(env, dest, value);
        Ok(())
    }

    /// Applies `f` to two registers, storing into `dest`.
    ///
    /// Flags are taken from the destination index, not the result. Operands
    /// 0..5 address the register slots that Arg writes fall through to, so a
    /// result stored there is not visible to ordinary variable reads.
    fn arith<F>(&mut self, dest: u8, src: u8, f: F) -> Result<(), VMError>
    where
        F: FnOnce(i32, i32) -> Result<i32, VMError>,
    {
        let d = register_index(dest)?;
        let s = register_index(src)?;
        let index = i32::from(dest);
        self.zero_flag = index == 0;
        self.sign_flag = index < 0;
        self.frame.registers[d] = f(self.frame.registers[d], self.frame.registers[s])?;
        Ok(())
    }

    fn op_add(&mut self, _instr: &'static str, dest: u8, src: u8) -> Result<(), VMError> {
        self.arith(dest, src, |a, b| Ok(a.wrapping_add(b)))
    }

    fn op_sub(&mut self, _instr: &'static str, dest: u8, src: u8) -> Result<(), VMError> {
        self.arith(dest, src, |a, b| Ok(a.wrapping_sub(b)))
    }

    fn op_mul(&mut self, _instr: &'static str, dest: u8, src: u8) -> Result<(), VMError> {
        self.arith(dest, src, |a, b| Ok(a.wrapping_mul(b)))
    }

    fn op_div(&mut self, _instr: &'static str, dest: u8, src: u8) -> Result<(), VMError> {
        self.arith(dest, src, |a, b| {
            if b == 0 {
                return Err(VMError::DivisionByZero);
            }
            Ok(a.wrapping_div(b))
        })
    }

    fn op_test(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        src: u8,
    ) -> Result<(), VMError> {
        let value = self.get_var(env, src);
        self.zero_flag = value == 0;
        self.sign_flag = value < 0;
        Ok(())
    }

    fn op_rand(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
        lo: u8,
        hi: u8,
    ) -> Result<(), VMError> {
        let lo = self.get_var(env, lo);
        let hi = self.get_var(env, hi);
        let value = random_inclusive(env.rng, lo, hi);
        self.set_var(env, dest, value);
        Ok(())
    }

    fn op_call(&mut self, _instr: &'static str, addr: u32) -> Result<(), VMError> {
        self.call_stack.push(self.ip as u32);
        self.jump_to(addr)
    }

    fn op_complete(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.pending = Some(StepResult::Completed);
        Ok(())
    }

    fn op_jump(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        target: JumpTarget,
    ) -> Result<(), VMError> {
        let addr = match target {
            JumpTarget::Variable(location) => self.get_var(env, location) as u32,
            JumpTarget::Address(addr) => addr,
        };
        self.jump_to(addr)
    }

    fn op_nop(&mut self, _instr: &'static str) -> Result<(), VMError> {
        Ok(())
    }

    fn branch_if(&mut self, taken: bool, addr: u32) -> Result<(), VMError> {
        if taken {
            self.jump_to(addr)?;
        }
        Ok(())
    }

    fn op_ifeq(&mut self, _instr: &'static str, addr: u32) -> Result<(), VMError> {
        self.branch_if(self.zero_flag, addr)
    }

    fn op_ifne(&mut self, _instr: &'static str, addr: u32) -> Result<(), VMError> {
        self.branch_if(!self.zero_flag, addr)
    }

    fn op_ifgt(&mut self, _instr: &'static str, addr: u32) -> Result<(), VMError> {
        self.branch_if(!self.zero_flag && !self.sign_flag, addr)
    }

    fn op_iflt(&mut self, _instr: &'static str, addr: u32) -> Result<(), VMError> {
        self.branch_if(self.sign_flag, addr)
    }

    fn op_ifge(&mut self, _instr: &'static str, addr: u32) -> Result<(), VMError> {
        self.branch_if(!self.sign_flag, addr)
    }

    fn op_ifle(&mut self, _instr: &'static str, addr: u32) -> Result<(), VMError> {
        self.branch_if(self.zero_flag || self.sign_flag, addr)
    }

    fn op_loop(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let target = self.loop_point.unwrap_or(self.entry);
        self.jump_to(target)
    }

    fn op_set_loop(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.loop_point = Some(self.ip as u32);
        Ok(())
    }

    fn op_wait(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        src: u8,
    ) -> Result<(), VMError> {
        if self.wait_remaining == NOT_WAITING {
            self.wait_remaining = self.get_var(env, src);
        }
        self.wait_remaining = self.wait_remaining.saturating_sub(env.config.tick_ms);
        if self.wait_remaining > 0 {
            self.suspend();
        } else {
            self.wait_remaining = NOT_WAITING;
        }
        Ok(())
    }

    /// Suspends on this opcode until `cond(a, b)` holds.
    fn wait_until(
        &mut self,
        env: &mut ExecEnv<'_>,
        a: u8,
        b: u8,
        cond: fn(i32, i32) -> bool,
    ) -> Result<(), VMError> {
        let (a, b) = (self.get_var(env, a), self.get_var(env, b));
        if !cond(a, b) {
            self.suspend();
        }
        Ok(())
    }

    fn op_waiteq(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        a: u8,
        b: u8,
    ) -> Result<(), VMError> {
        self.wait_until(env, a, b, |a, b| a == b)
    }

    fn op_waitne(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        a: u8,
        b: u8,
    ) -> Result<(), VMError> {
        self.wait_until(env, a, b, |a, b| a != b)
    }

    fn op_waitgt(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        a: u8,
        b: u8,
    ) -> Result<(), VMError> {
        self.wait_until(env, a, b, |a, b| a > b)
    }

    fn op_waitlt(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        a: u8,
        b: u8,
    ) -> Result<(), VMError> {
        self.wait_until(env, a, b, |a, b| a < b)
    }

    fn op_waitge(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        a: u8,
        b: u8,
    ) -> Result<(), VMError> {
        self.wait_until(env, a, b, |a, b| a >= b)
    }

    fn op_waitle(
        &mut self,
        _instr: &'static str,
        env: &mut ExecEnv<'_>,
        a: u8,
        b: u8,
    ) -> Result<(), VMError> {
        self.wait_until(env, a, b, |a, b| a <= b)
    }

    fn op_smart_choose(
        &mut self,
        instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
    ) -> Result<(), VMError> {
        if self.hitlist.is_empty() {
            warn!("{instr}: track {} has no hitlist bound", self.track_id);
            self.set_var(env, dest, 0);
            return Ok(());
        }
        let last = (self.hitlist.len() - 1) as i32;
        let index = random_inclusive(env.rng, 0, last) as usize;
        let choice = self.hitlist[index] as i32;
        self.set_var(env, dest, choice);
        Ok(())
    }

    fn op_smart_setlist(
        &mut self,
        instr: &'static str,
        env: &mut ExecEnv<'_>,
        src: u8,
    ) -> Result<(), VMError> {
        let id = self.get_var(env, src) as u32;
        self.hitlist = env.dispatch.resolve_hitlist(id).unwrap_or_else(|| {
            warn!("{instr}: hitlist {id} not found");
            Vec::new()
        });
        Ok(())
    }

    fn op_smart_index(
        &mut self,
        instr: &'static str,
        env: &mut ExecEnv<'_>,
        dest: u8,
        src: u8,
    ) -> Result<(), VMError> {
        let index = self.get_var(env, src);
        let entry = usize::try_from(index)
            .ok()
            .and_then(|i| self.hitlist.get(i).copied());
        let Some(track) = entry else {
            warn!(
                "{instr}: index {index} outside hitlist of {} entries",
                self.hitlist.len()
            );
            self.set_var(env, dest, 0);
            return Ok(());
        };
        self.selected_track = track;
        self.frame.sound_id = track_sound(env.dispatch, track);
        self.set_var(env, dest, track as i32);
        Ok(())
    }

    fn op_placeholder1(&mut self, instr: &'static str, _a: u8) -> Result<(), VMError> {
        debug!("{instr}: no effect");
        Ok(())
    }

    fn op_placeholder2(&mut self, instr: &'static str, _a: u8, _b: u8) -> Result<(), VMError> {
        debug!("{instr}: no effect");
        Ok(())
    }

    fn op_placeholder3(
        &mut self,
        instr: &'static str,
        _a: u8,
        _b: u8,
        _c: u8,
    ) -> Result<(), VMError> {
        debug!("{instr}: no effect");
        Ok(())
    }
}

fn register_index(location: u8) -> Result<usize, VMError> {
    let index = usize::from(location);
    if index < REGISTER_COUNT {
        Ok(index)
    } else {
        Err(VMError::InvalidRegister { location })
    }
}
