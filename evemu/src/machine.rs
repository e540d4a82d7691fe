use std::collections::HashMap;

use thiserror::Error;

use ev16::{
    sign_extend_12, BinaryOp, OpClass, UnaryOp, VmDescription, WHEN_FLAG,
};

/// Runtime faults. A correct compiler prevents the ones it can prove at
/// compile time; the rest (indexed access, runtime division) stay
/// possible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("undecodable word 0x{0:04X} at 0x{1:04X}")]
    BadOpcode(u16, usize),

    #[error("program counter 0x{0:04X} out of range")]
    BadPc(usize),

    #[error("data address 0x{0:04X} out of range")]
    BadAddress(u16),

    #[error("operand stack underflow at 0x{0:04X}")]
    StackUnderflow(usize),

    #[error("operand stack exceeded {0} words")]
    StackOverflow(u16),

    #[error("index {index} out of bounds for array at 0x{addr:04X} of size {size}")]
    IndexOutOfBounds { addr: u16, index: i16, size: u16 },

    #[error("division by zero at 0x{0:04X}")]
    DivideByZero(usize),

    #[error("native call {0} failed: {1}")]
    Native(u16, String),

    #[error("step budget exhausted")]
    Timeout,
}

/// Host side of the machine: native functions and emitted events.
pub trait Hook {
    fn native_call(&mut self, id: u16, memory: &mut [i16]) -> Result<(), Fault> {
        let _ = (id, memory);
        Ok(())
    }

    fn emit(&mut self, event: u16, payload: &[i16]) {
        let _ = (event, payload);
    }
}

#[derive(Debug, Default)]
pub struct NullHook;

impl Hook for NullHook {}

/// Records emitted events, for tests.
#[derive(Debug, Default)]
pub struct RecordingHook {
    pub emitted: Vec<(u16, Vec<i16>)>,
}

impl Hook for RecordingHook {
    fn emit(&mut self, event: u16, payload: &[i16]) {
        self.emitted.push((event, payload.to_vec()));
    }
}

/// A linked EV16 image plus machine state: data memory, operand stack,
/// call stack, and the per-site edge memory behind `when`.
pub struct Machine<'a, H: Hook> {
    code: &'a [u16],
    desc: &'a VmDescription,
    pub memory: Vec<i16>,
    stack: Vec<i16>,
    call_stack: Vec<usize>,
    edge_state: HashMap<usize, bool>,
    /// Operand stack high-water mark across all runs.
    pub max_stack_seen: u16,
    pub hook: H,
}

impl<'a, H: Hook> Machine<'a, H> {
    pub fn new(code: &'a [u16], desc: &'a VmDescription, hook: H) -> Self {
        Machine {
            code,
            desc,
            memory: vec![0; desc.variables_size as usize],
            stack: Vec::new(),
            call_stack: Vec::new(),
            edge_state: HashMap::new(),
            max_stack_seen: 0,
            hook,
        }
    }

    /// Execute from `entry` until the handler stops. The step budget
    /// guards test runs against runaway loops.
    pub fn run_from(&mut self, entry: usize) -> Result<(), Fault> {
        self.run_budgeted(entry, 1_000_000)
    }

    pub fn run_budgeted(&mut self, entry: usize, mut budget: u64) -> Result<(), Fault> {
        let mut pc = entry;
        self.stack.clear();
        self.call_stack.clear();
        loop {
            if budget == 0 {
                return Err(Fault::Timeout);
            }
            budget -= 1;

            let word = self.fetch(pc)?;
            let (class, payload) = self
                .desc
                .opcodes
                .decode(word)
                .ok_or(Fault::BadOpcode(word, pc))?;
            match class {
                OpClass::Stop => return Ok(()),
                OpClass::SmallImmediate => {
                    self.push(sign_extend_12(payload))?;
                    pc += 1;
                }
                OpClass::LargeImmediate => {
                    let value = self.fetch(pc + 1)? as i16;
                    self.push(value)?;
                    pc += 2;
                }
                OpClass::Load => {
                    let value = self.read(payload)?;
                    self.push(value)?;
                    pc += 1;
                }
                OpClass::Store => {
                    let value = self.pop(pc)?;
                    self.write(payload, value)?;
                    pc += 1;
                }
                OpClass::IndexedLoad => {
                    let size = self.fetch(pc + 1)?;
                    let index = self.checked_index(pc, payload, size)?;
                    let value = self.read(payload + index)?;
                    self.push(value)?;
                    pc += 2;
                }
                OpClass::IndexedStore => {
                    let size = self.fetch(pc + 1)?;
                    let index = self.checked_index(pc, payload, size)?;
                    let value = self.pop(pc)?;
                    self.write(payload + index, value)?;
                    pc += 2;
                }
                OpClass::UnaryOp => {
                    let op = UnaryOp::try_from(payload as u8)
                        .map_err(|_| Fault::BadOpcode(word, pc))?;
                    let value = self.pop(pc)?;
                    self.push(op.eval(value))?;
                    pc += 1;
                }
                OpClass::BinaryOp => {
                    let op = BinaryOp::try_from(payload as u8)
                        .map_err(|_| Fault::BadOpcode(word, pc))?;
                    let r = self.pop(pc)?;
                    let l = self.pop(pc)?;
                    let value = op.eval(l, r).ok_or(Fault::DivideByZero(pc))?;
                    self.push(value)?;
                    pc += 1;
                }
                OpClass::Jump => {
                    pc = Self::offset_pc(pc, sign_extend_12(payload));
                }
                OpClass::ConditionalBranch => {
                    let offset = self.fetch(pc + 1)? as i16;
                    let cond = self.pop(pc)? != 0;
                    if self.branch_fires(pc, payload, cond) {
                        pc += 2;
                    } else {
                        pc = Self::offset_pc(pc, offset);
                    }
                }
                OpClass::CompareBranch => {
                    let op_word = self.fetch(pc + 1)?;
                    let op = BinaryOp::try_from(op_word as u8)
                        .map_err(|_| Fault::BadOpcode(op_word, pc))?;
                    let offset = self.fetch(pc + 2)? as i16;
                    let r = self.pop(pc)?;
                    let l = self.pop(pc)?;
                    let cond = op.eval(l, r).ok_or(Fault::DivideByZero(pc))? != 0;
                    if self.branch_fires(pc, payload, cond) {
                        pc += 3;
                    } else {
                        pc = Self::offset_pc(pc, offset);
                    }
                }
                OpClass::Emit => {
                    let addr = self.fetch(pc + 1)?;
                    let size = self.fetch(pc + 2)?;
                    let end = addr as usize + size as usize;
                    if end > self.memory.len() {
                        return Err(Fault::BadAddress(addr));
                    }
                    let payload_words = self.memory[addr as usize..end].to_vec();
                    self.hook.emit(payload, &payload_words);
                    pc += 3;
                }
                OpClass::NativeCall => {
                    self.hook.native_call(payload, &mut self.memory)?;
                    pc += 1;
                }
                OpClass::SubCall => {
                    self.call_stack.push(pc + 1);
                    pc = payload as usize;
                }
                OpClass::Return => match self.call_stack.pop() {
                    Some(ra) => pc = ra,
                    None => return Ok(()),
                },
            }
        }
    }

    /// Whether the then side of a branch runs. Edge-sensitive branches
    /// remember the previous truth value per branch site and fire only on
    /// a false-to-true transition.
    fn branch_fires(&mut self, pc: usize, flags: u16, cond: bool) -> bool {
        if flags & WHEN_FLAG == 0 {
            return cond;
        }
        let prev = self.edge_state.insert(pc, cond).unwrap_or(false);
        cond && !prev
    }

    fn offset_pc(pc: usize, offset: i16) -> usize {
        (pc as isize + offset as isize) as usize
    }

    fn fetch(&self, pc: usize) -> Result<u16, Fault> {
        self.code.get(pc).copied().ok_or(Fault::BadPc(pc))
    }

    fn read(&self, addr: u16) -> Result<i16, Fault> {
        self.memory
            .get(addr as usize)
            .copied()
            .ok_or(Fault::BadAddress(addr))
    }

    fn write(&mut self, addr: u16, value: i16) -> Result<(), Fault> {
        match self.memory.get_mut(addr as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Fault::BadAddress(addr)),
        }
    }

    fn checked_index(&mut self, pc: usize, addr: u16, size: u16) -> Result<u16, Fault> {
        let index = self.pop(pc)?;
        if index < 0 || index as u16 >= size {
            return Err(Fault::IndexOutOfBounds { addr, index, size });
        }
        Ok(index as u16)
    }

    fn push(&mut self, value: i16) -> Result<(), Fault> {
        if self.stack.len() >= self.desc.stack_size as usize {
            return Err(Fault::StackOverflow(self.desc.stack_size));
        }
        self.stack.push(value);
        self.max_stack_seen = self.max_stack_seen.max(self.stack.len() as u16);
        Ok(())
    }

    fn pop(&mut self, pc: usize) -> Result<i16, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow(pc))
    }
}
