mod alu;
mod desc;
mod op;

pub use alu::{BinaryOp, UnaryOp};
pub use desc::{VmDescription, INIT_EVENT};
pub use op::{
    payload_i12, sign_extend_12, OpClass, OpcodeTable, PAYLOAD_BITS, PAYLOAD_MASK, SMALL_IMM_MAX,
    SMALL_IMM_MIN, WHEN_FLAG,
};
