use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Binary operators of the EV16 ALU, in payload-code order.
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
    Display,
    EnumString,
)]
#[repr(u8)]
pub enum BinaryOp {
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "and")]
    And,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(self, Eq | Ne | Gt | Ge | Lt | Le)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::Or | BinaryOp::And)
    }

    /// Logically negated comparison, e.g. `<` becomes `>=`.
    pub fn negated(self) -> Option<BinaryOp> {
        use BinaryOp::*;
        Some(match self {
            Eq => Ne,
            Ne => Eq,
            Gt => Le,
            Ge => Lt,
            Lt => Ge,
            Le => Gt,
            _ => return None,
        })
    }

    /// Evaluate with the VM's wrapping 16-bit semantics.
    ///
    /// Returns `None` for division or modulo by zero. Shift counts use the
    /// low four bits of the right operand, as the hardware shifter does.
    /// Comparisons and logical operators yield 0 or 1.
    pub fn eval(self, l: i16, r: i16) -> Option<i16> {
        use BinaryOp::*;
        Some(match self {
            Shl => ((l as u16) << (r as u16 & 15)) as i16,
            Shr => l >> (r as u16 & 15),
            Add => l.wrapping_add(r),
            Sub => l.wrapping_sub(r),
            Mul => l.wrapping_mul(r),
            Div => {
                if r == 0 {
                    return None;
                }
                l.wrapping_div(r)
            }
            Mod => {
                if r == 0 {
                    return None;
                }
                l.wrapping_rem(r)
            }
            BitOr => l | r,
            BitXor => l ^ r,
            BitAnd => l & r,
            Eq => (l == r) as i16,
            Ne => (l != r) as i16,
            Gt => (l > r) as i16,
            Ge => (l >= r) as i16,
            Lt => (l < r) as i16,
            Le => (l <= r) as i16,
            Or => (l != 0 || r != 0) as i16,
            And => (l != 0 && r != 0) as i16,
        })
    }
}

/// Unary operators of the EV16 ALU.
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
    Display,
    EnumString,
)]
#[repr(u8)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "abs")]
    Abs,
    #[strum(serialize = "~")]
    BitNot,
    #[strum(serialize = "not")]
    Not,
}

impl UnaryOp {
    /// Evaluate with the VM's wrapping 16-bit semantics.
    /// `abs(-32768)` wraps to itself.
    pub fn eval(self, v: i16) -> i16 {
        match self {
            UnaryOp::Neg => v.wrapping_neg(),
            UnaryOp::Abs => v.wrapping_abs(),
            UnaryOp::BitNot => !v,
            UnaryOp::Not => (v == 0) as i16,
        }
    }
}
