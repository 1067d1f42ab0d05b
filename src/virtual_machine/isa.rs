//! Instruction set of the HIT interpreter.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical opcode table and hands it to a callback macro, so the
//! [`Instruction`] enum here and the assembler's encoder are generated from
//! one list.
//!
//! # Bytecode Format
//!
//! - Opcode: 1 byte
//! - `Var`: 1 byte variable location (see [`variables`](super::variables))
//! - `Imm8`: 1 byte literal, sign-extended when loaded
//! - `Imm32`: 4 bytes little-endian literal
//! - `Addr`: 4 bytes little-endian absolute image offset
//! - `Target`: either a 1-byte variable location (value `<= 15`, indirect
//!   jump) or a 4-byte absolute address whose low byte is `> 15`

use crate::virtual_machine::errors::VMError;

/// Largest first byte of a `jump` operand that is read as a variable location.
pub const INDIRECT_JUMP_MAX: u8 = 15;

/// Decoded operand of `jump`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JumpTarget {
    /// Jump to the address held in this variable location.
    Variable(u8),
    /// Jump to this image offset.
    Address(u32),
}

impl JumpTarget {
    /// Encoded size in bytes.
    pub const fn size(&self) -> usize {
        match self {
            JumpTarget::Variable(_) => 1,
            JumpTarget::Address(_) => 4,
        }
    }
}

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Playback
            // =========================
            /// NOTE_ON dest ; play current sound, dest = note id (or -1)
            NoteOn = 0x01, "note_on" => [dest: Var],
            /// NOTE_OFF src ; stop the note whose id is in src
            NoteOff = 0x02, "note_off" => [src: Var],
            /// NOTE_ON_LOOP dest ; as NOTE_ON but the sound loops
            NoteOnLoop = 0x5F, "note_on_loop" => [dest: Var],
            /// PLAY_TRK src ; spawn a subroutine for the track id in src
            PlayTrk = 0x31, "play_trk" => [src: Var],
            /// KILL_TRK src ; kill subroutines bound to the track id in src
            KillTrk = 0x32, "kill_trk" => [src: Var],
            // =========================
            // Data movement
            // =========================
            /// LOADB dest, imm8 ; dest = sign_extend(imm8)
            LoadB = 0x03, "loadb" => [dest: Var, imm: Imm8],
            /// LOADL dest, imm32 ; dest = imm32
            LoadL = 0x04, "loadl" => [dest: Var, imm: Imm32],
            /// SET dest, src ; dest = src
            Set = 0x05, "set" => [dest: Var, src: Var],
            /// SETLL dest, src ; synonym of SET
            SetLL = 0x49, "setll" => [dest: Var, src: Var],
            /// SETLT dest, src ; synonym of SET
            SetLT = 0x4A, "setlt" => [dest: Var, src: Var],
            /// SETTT dest, src ; synonym of SET
            SetTT = 0x4B, "settt" => [dest: Var, src: Var],
            // =========================
            // Register arithmetic
            // =========================
            /// ADD dest, src ; reg[dest] += reg[src]
            Add = 0x0F, "add" => [dest: Var, src: Var],
            /// SUB dest, src ; reg[dest] -= reg[src]
            Sub = 0x10, "sub" => [dest: Var, src: Var],
            /// DIV dest, src ; reg[dest] /= reg[src]
            Div = 0x11, "div" => [dest: Var, src: Var],
            /// MUL dest, src ; reg[dest] *= reg[src]
            Mul = 0x12, "mul" => [dest: Var, src: Var],
            /// CMP dest, src ; reg[dest] -= reg[src]
            Cmp = 0x13, "cmp" => [dest: Var, src: Var],
            /// TEST src ; flags from value of src
            Test = 0x0D, "test" => [src: Var],
            /// RAND dest, lo, hi ; dest = random in [lo, hi]
            Rand = 0x17, "rand" => [dest: Var, lo: Var, hi: Var],
            // =========================
            // Control flow
            // =========================
            /// CALL addr ; push ip, ip = addr
            Call = 0x06, "call" => [addr: Addr],
            /// RETURN ; completion
            Return = 0x07, "return" => [],
            /// END ; completion
            End = 0x0B, "end" => [],
            /// JUMP target ; ip = addr or ip = var
            Jump = 0x0C, "jump" => [target: Target],
            /// NOP
            Nop = 0x0E, "nop" => [],
            /// IFEQ addr ; jump if zero
            IfEq = 0x3D, "ifeq" => [addr: Addr],
            /// IFNE addr ; jump if not zero
            IfNe = 0x3E, "ifne" => [addr: Addr],
            /// IFGT addr ; jump if not zero and not sign
            IfGt = 0x3F, "ifgt" => [addr: Addr],
            /// IFLT addr ; jump if sign
            IfLt = 0x40, "iflt" => [addr: Addr],
            /// IFGE addr ; jump if not sign
            IfGe = 0x41, "ifge" => [addr: Addr],
            /// IFLE addr ; jump if zero or sign
            IfLe = 0x42, "ifle" => [addr: Addr],
            /// LOOP ; ip = loop point, or entry address when unset
            Loop = 0x1F, "loop" => [],
            /// SET_LOOP ; loop point = ip
            SetLoop = 0x20, "set_loop" => [],
            // =========================
            // Timing
            // =========================
            /// WAIT src ; suspend for src milliseconds
            Wait = 0x08, "wait" => [src: Var],
            /// WAITEQ a, b ; suspend until a == b
            WaitEq = 0x4C, "waiteq" => [a: Var, b: Var],
            /// WAITNE a, b ; suspend until a != b
            WaitNe = 0x4D, "waitne" => [a: Var, b: Var],
            /// WAITGT a, b ; suspend until a > b
            WaitGt = 0x4E, "waitgt" => [a: Var, b: Var],
            /// WAITLT a, b ; suspend until a < b
            WaitLt = 0x4F, "waitlt" => [a: Var, b: Var],
            /// WAITGE a, b ; suspend until a >= b
            WaitGe = 0x50, "waitge" => [a: Var, b: Var],
            /// WAITLE a, b ; suspend until a <= b
            WaitLe = 0x51, "waitle" => [a: Var, b: Var],
            // =========================
            // Hitlist selection
            // =========================
            /// SMART_CHOOSE dest ; dest = random entry of the bound hitlist
            SmartChoose = 0x26, "smart_choose" => [dest: Var],
            /// SMART_SETLIST src ; bind hitlist whose id is in src
            SmartSetList = 0x43, "smart_setlist" => [src: Var],
            /// SMART_INDEX dest, src ; bind hitlist[src] as track, dest = its id
            SmartIndex = 0x5E, "smart_index" => [dest: Var, src: Var],
            // =========================
            // Operands decoded, no effect
            // =========================
            /// TEST1 v
            Test1 = 0x39, "test1" => [a: Var],
            /// TEST2 v
            Test2 = 0x3A, "test2" => [a: Var],
            /// TEST3 v
            Test3 = 0x3B, "test3" => [a: Var],
            /// TEST4 v
            Test4 = 0x3C, "test4" => [a: Var],
            /// SEQGROUP_KILL v
            SeqGroupKill = 0x44, "seqgroup_kill" => [a: Var],
            /// SEQGROUP_WAIT v
            SeqGroupWait = 0x45, "seqgroup_wait" => [a: Var],
            /// SEQGROUP_RETURN v
            SeqGroupReturn = 0x46, "seqgroup_return" => [a: Var],
            /// GETSRCDATAFIELD dest, src, field
            GetSrcDataField = 0x47, "getsrcdatafield" => [a: Var, b: Var, c: Var],
            /// SEQGROUP_TRKID a, b
            SeqGroupTrkId = 0x48, "seqgroup_trkid" => [a: Var, b: Var],
            /// DUCK v
            Duck = 0x52, "duck" => [a: Var],
            /// UNDUCK
            Unduck = 0x53, "unduck" => [],
            /// SETSRCDATAFIELD a, b, c
            SetSrcDataField = 0x58, "setsrcdatafield" => [a: Var, b: Var, c: Var],
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::InvalidInstruction {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Every instruction, in table order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }
        }
    };

    // ---------- types ----------
    (@ty Var)    => { u8 };
    (@ty Imm8)   => { u8 };
    (@ty Imm32)  => { i32 };
    (@ty Addr)   => { u32 };
    (@ty Target) => { $crate::virtual_machine::isa::JumpTarget };

    // ---------- encoding ----------
    (@emit $out:ident, Var, $v:ident) => {
        $out.push(*$v);
    };

    (@emit $out:ident, Imm8, $v:ident) => {
        $out.push(*$v);
    };

    (@emit $out:ident, Imm32, $v:ident) => {
        $out.extend_from_slice(&$v.to_le_bytes());
    };

    (@emit $out:ident, Addr, $v:ident) => {
        $out.extend_from_slice(&$v.to_le_bytes());
    };

    (@emit $out:ident, Target, $v:ident) => {
        match $v {
            $crate::virtual_machine::isa::JumpTarget::Variable(loc) => $out.push(*loc),
            $crate::virtual_machine::isa::JumpTarget::Address(addr) => {
                $out.extend_from_slice(&addr.to_le_bytes())
            }
        }
    };
}

for_each_instruction!(define_instructions);
