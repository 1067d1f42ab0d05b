/// Per-`advance` cap on executed opcodes.
///
/// Keeps a subroutine stuck in a tight loop from stalling the frame.
#[derive(Clone, Copy, Debug)]
pub struct OpcodeBudget {
    limit: u32,
    used: u32,
}

impl OpcodeBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    /// Takes one opcode from the budget; `false` once it is spent.
    #[inline(always)]
    pub fn consume(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }
}
