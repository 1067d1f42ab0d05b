//! Cooperative bytecode interpreter for audio events.
//!
//! Programs are small instruction streams that start and stop notes, branch
//! on shared game state and wait out time in 16 ms ticks. Many of them run
//! at once; the host advances all of them once per frame.
//!
//! # Architecture
//!
//! - **Variables**: one integer address space split into Arg, Register,
//!   Local, Global and ObjectVar partitions by range
//! - **Instruction format**: 1-byte opcodes followed by 1-byte variable
//!   operands and 4-byte little-endian literals or addresses
//! - **Execution model**: each [`vm::RunningSubroutine`] runs until it
//!   completes, suspends on a `wait*` opcode, or spends its opcode budget
//! - **Scheduling**: [`scheduler::Scheduler`] advances every live instance
//!   once per frame and reaps finished ones
//!
//! # Modules
//!
//! - [`assembler`]: Text assembly, diagnostics and bytecode generation
//! - [`config`]: Runtime tuning from defaults or the environment
//! - [`dispatch`]: Boundary trait towards the host's audio layer
//! - [`errors`]: Load, assembly and execution errors
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`program`]: HIT container parsing
//! - [`registry`]: Event names bound across resource groups
//! - [`runtime`]: [`runtime::VmContext`], the host-facing entry point
//! - [`scheduler`]: Per-frame driver and TV-on handlers
//! - [`variables`]: Variable partitions and shared tables
//! - [`vm`]: The interpreter

pub mod assembler;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod isa;
pub mod program;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod variables;
pub mod vm;
