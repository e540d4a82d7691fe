use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Number of payload bits in a code word (the rest is the opcode class).
pub const PAYLOAD_BITS: u32 = 12;
pub const PAYLOAD_MASK: u16 = (1 << PAYLOAD_BITS) - 1;

/// Range of the one-word immediate encoding.
pub const SMALL_IMM_MIN: i16 = -(1 << (PAYLOAD_BITS - 1));
pub const SMALL_IMM_MAX: i16 = (1 << (PAYLOAD_BITS - 1)) - 1;

/// Flag bit in branch payloads: fire only on a false-to-true transition.
pub const WHEN_FLAG: u16 = 0x0001;

/// The sixteen opcode classes of the EV16 instruction set.
///
/// Discriminants are the default numbering; the actual nibble placed in a
/// code word comes from the target's [`OpcodeTable`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum OpClass {
    Stop,
    SmallImmediate,
    LargeImmediate,
    Load,
    Store,
    IndexedLoad,
    IndexedStore,
    UnaryOp,
    BinaryOp,
    Jump,
    ConditionalBranch,
    CompareBranch,
    Emit,
    NativeCall,
    SubCall,
    Return,
}

impl OpClass {
    pub const COUNT: usize = 16;

    pub fn all() -> impl Iterator<Item = OpClass> {
        (0..Self::COUNT as u8).map(|n| OpClass::try_from(n).unwrap())
    }
}

/// Maps each opcode class to the 4-bit code the target VM expects.
///
/// Targets are free to number the classes however their interpreter is
/// wired; the default table uses the declaration order above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeTable([u8; OpClass::COUNT]);

impl Default for OpcodeTable {
    fn default() -> Self {
        let mut codes = [0u8; OpClass::COUNT];
        for (i, code) in codes.iter_mut().enumerate() {
            *code = i as u8;
        }
        OpcodeTable(codes)
    }
}

impl OpcodeTable {
    pub fn new(codes: [u8; OpClass::COUNT]) -> Self {
        OpcodeTable(codes)
    }

    /// 4-bit code for a class.
    pub fn code(&self, class: OpClass) -> u16 {
        self.0[u8::from(class) as usize] as u16
    }

    /// Assemble a code word from a class and a 12-bit payload.
    pub fn encode(&self, class: OpClass, payload: u16) -> u16 {
        debug_assert!(payload <= PAYLOAD_MASK);
        (self.code(class) << PAYLOAD_BITS) | (payload & PAYLOAD_MASK)
    }

    /// Split a code word back into its class and payload.
    pub fn decode(&self, word: u16) -> Option<(OpClass, u16)> {
        let nibble = (word >> PAYLOAD_BITS) as u8;
        let class = OpClass::all().find(|&c| self.0[u8::from(c) as usize] == nibble)?;
        Some((class, word & PAYLOAD_MASK))
    }
}

/// Truncate a signed value to the 12-bit payload field.
pub fn payload_i12(value: i16) -> u16 {
    (value as u16) & PAYLOAD_MASK
}

/// Sign-extend a 12-bit payload back to a signed word.
pub fn sign_extend_12(payload: u16) -> i16 {
    ((payload << 4) as i16) >> 4
}
