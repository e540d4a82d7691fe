use std::fmt;

use itertools::Itertools;

use ev16::{BinaryOp, UnaryOp, INIT_EVENT};

use crate::error::{CompileError, ErrorKind};
use crate::pos::SourcePos;

mod emit;
mod expand;
mod optimize;
mod stack;
mod typecheck;

/// Type an expression evaluates to. Statements produce `Unit`. `Bool` only
/// exists at compile time to keep arithmetic off comparison results; at
/// runtime both are integer-shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Unit,
    Bool,
    Int,
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnType::Unit => "unit",
            ReturnType::Bool => "boolean",
            ReturnType::Int => "integer",
        };
        write!(f, "{}", name)
    }
}

/// Variant tag of a tree node, with the per-variant attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Statement sequence.
    Block,
    /// Top-level container of event handlers and subroutines.
    Program,
    /// children: [store subtree, value expression]
    Assignment,
    /// Parser-produced `lhs op= rhs`; expanded into a plain assignment.
    /// children: [memory reference (write), value expression]
    CompoundAssignment { op: BinaryOp },
    /// children: [condition, then block, optional else block]
    IfWhen {
        /// `when`: the then block fires only on a false-to-true transition.
        edge_sensitive: bool,
        end_line: usize,
    },
    /// Optimizer-produced if/when with the comparison lifted out.
    /// children: [left, right, then block, optional else block]
    FoldedIfWhen {
        op: BinaryOp,
        edge_sensitive: bool,
        end_line: usize,
    },
    /// children: [condition, body]
    While,
    /// children: [left, right, body]
    FoldedWhile { op: BinaryOp },
    /// Start of an event handler region.
    EventDecl { event_id: u16 },
    /// Fire an event; children set up the payload words, if any.
    Emit {
        event_id: u16,
        array_addr: u16,
        array_size: u16,
    },
    /// Start of a subroutine region.
    SubDecl { sub_id: u16 },
    CallSub { sub_id: u16 },
    /// children: [left, right]
    Binary { op: BinaryOp },
    /// children: [operand]
    Unary { op: UnaryOp },
    Immediate { value: i16 },
    /// Pop the stack into a scalar address.
    Store { addr: u16 },
    /// Push a scalar address onto the stack.
    Load { addr: u16 },
    /// Indexed store; the value is on the stack already.
    /// children: [index expression]
    ArrayWrite { addr: u16, size: u16, name: String },
    /// children: [index expression]
    ArrayRead { addr: u16, size: u16, name: String },
    /// Native function call; children store the argument values into the
    /// caller-allocated slots listed in `args_addr`.
    Call { fun_id: u16, args_addr: Vec<u16> },
    Return,
    /// Literal vector. Expanded away before type checking.
    StaticVector { values: Vec<i16> },
    /// Abstract reference to an array or scalar, read or write.
    /// children: optional [index expression], where a two-value
    /// `StaticVector` index denotes the inclusive slice `[lo:hi]`.
    /// Expanded away before type checking.
    MemoryVector {
        addr: u16,
        size: u16,
        name: String,
        write: bool,
    },
}

/// A node of the syntax tree. Children are owned; `clone` is a deep copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub pos: SourcePos,
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(pos: SourcePos, kind: NodeKind) -> Self {
        Node {
            pos,
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(pos: SourcePos, kind: NodeKind, children: Vec<Node>) -> Self {
        Node {
            pos,
            kind,
            children,
        }
    }

    pub fn block(pos: SourcePos, statements: Vec<Node>) -> Self {
        Node::with_children(pos, NodeKind::Block, statements)
    }

    pub fn program(pos: SourcePos, statements: Vec<Node>) -> Self {
        Node::with_children(pos, NodeKind::Program, statements)
    }

    pub fn immediate(pos: SourcePos, value: i16) -> Self {
        Node::new(pos, NodeKind::Immediate { value })
    }

    pub fn load(pos: SourcePos, addr: u16) -> Self {
        Node::new(pos, NodeKind::Load { addr })
    }

    pub fn store(pos: SourcePos, addr: u16) -> Self {
        Node::new(pos, NodeKind::Store { addr })
    }

    pub fn binary(pos: SourcePos, op: BinaryOp, left: Node, right: Node) -> Self {
        Node::with_children(pos, NodeKind::Binary { op }, vec![left, right])
    }

    pub fn unary(pos: SourcePos, op: UnaryOp, operand: Node) -> Self {
        Node::with_children(pos, NodeKind::Unary { op }, vec![operand])
    }

    pub fn assignment(pos: SourcePos, lhs: Node, rhs: Node) -> Self {
        Node::with_children(pos, NodeKind::Assignment, vec![lhs, rhs])
    }

    /// A read access with the same address as a scalar store.
    pub fn load_from_store(store: &Node) -> Result<Node, CompileError> {
        match store.kind {
            NodeKind::Store { addr } => Ok(Node::load(store.pos, addr)),
            _ => Err(CompileError::internal(
                store.pos,
                format!("cannot read back a {}", store.name()),
            )),
        }
    }

    /// A read access mirroring an indexed write. Only immediate indices are
    /// accepted: with a mutating index the read would re-evaluate it, which
    /// is not what the user meant.
    pub fn read_from_write(write: &Node) -> Result<Node, CompileError> {
        match &write.kind {
            NodeKind::ArrayWrite { addr, size, name } => match write.children.first() {
                Some(index) if matches!(index.kind, NodeKind::Immediate { .. }) => {
                    Ok(Node::with_children(
                        write.pos,
                        NodeKind::ArrayRead {
                            addr: *addr,
                            size: *size,
                            name: name.clone(),
                        },
                        vec![index.clone()],
                    ))
                }
                _ => Err(CompileError::new(write.pos, ErrorKind::IllegalIndex)),
            },
            _ => Err(CompileError::internal(
                write.pos,
                format!("cannot read back a {}", write.name()),
            )),
        }
    }

    /// Detach the children, leaving the node a leaf. The caller takes
    /// ownership; used when a pass replaces a node with a descendant.
    pub fn take_children(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.children)
    }

    /// Deep copy of the subtree. Positions are inherited so errors in the
    /// copy still point at the original text.
    pub fn deep_copy(&self) -> Node {
        self.clone()
    }

    /// Human-readable name of the node kind, for error messages.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Block => "block",
            NodeKind::Program => "program block",
            NodeKind::Assignment => "assignment",
            NodeKind::CompoundAssignment { .. } => "compound assignment",
            NodeKind::IfWhen { .. } => "if/when",
            NodeKind::FoldedIfWhen { .. } => "folded if/when",
            NodeKind::While => "while",
            NodeKind::FoldedWhile { .. } => "folded while",
            NodeKind::EventDecl { .. } => "event declaration",
            NodeKind::Emit { .. } => "emit",
            NodeKind::SubDecl { .. } => "subroutine declaration",
            NodeKind::CallSub { .. } => "subroutine call",
            NodeKind::Binary { .. } => "binary function",
            NodeKind::Unary { .. } => "unary function",
            NodeKind::Immediate { .. } => "constant",
            NodeKind::Store { .. } => "variable access (write)",
            NodeKind::Load { .. } => "variable access (read)",
            NodeKind::ArrayWrite { .. } => "array access (write)",
            NodeKind::ArrayRead { .. } => "array access (read)",
            NodeKind::Call { .. } => "native function call",
            NodeKind::Return => "return",
            NodeKind::StaticVector { .. } => "array constructor",
            NodeKind::MemoryVector { .. } => "vector access",
        }
    }

    /// One-line description of this node, without children.
    pub fn describe(&self) -> String {
        match &self.kind {
            NodeKind::Block => "Block".to_string(),
            NodeKind::Program => "ProgramBlock".to_string(),
            NodeKind::Assignment => "Assign".to_string(),
            NodeKind::CompoundAssignment { op } => format!("Assign ({}=)", op),
            NodeKind::IfWhen { edge_sensitive, .. } => {
                if *edge_sensitive {
                    "When".to_string()
                } else {
                    "If".to_string()
                }
            }
            NodeKind::FoldedIfWhen {
                op, edge_sensitive, ..
            } => {
                let head = if *edge_sensitive { "When" } else { "If" };
                format!("Folded {}: {}", head, op)
            }
            NodeKind::While => "While".to_string(),
            NodeKind::FoldedWhile { op } => format!("Folded While: {}", op),
            NodeKind::EventDecl { event_id } if *event_id == INIT_EVENT => {
                "Event: init".to_string()
            }
            NodeKind::EventDecl { event_id } => format!("Event: {}", event_id),
            NodeKind::Emit {
                event_id,
                array_addr,
                array_size,
            } => format!("Emit: {} addr {} size {}", event_id, array_addr, array_size),
            NodeKind::SubDecl { sub_id } => format!("Sub: {}", sub_id),
            NodeKind::CallSub { sub_id } => format!("CallSub: {}", sub_id),
            NodeKind::Binary { op } => format!("BinaryOp: {}", op),
            NodeKind::Unary { op } => format!("UnaryOp: {}", op),
            NodeKind::Immediate { value } => format!("Const: {}", value),
            NodeKind::Store { addr } => format!("Store: addr {}", addr),
            NodeKind::Load { addr } => format!("Load: addr {}", addr),
            NodeKind::ArrayWrite { addr, name, .. } => {
                format!("ArrayWrite: {} addr {}", name, addr)
            }
            NodeKind::ArrayRead { addr, name, .. } => {
                format!("ArrayRead: {} addr {}", name, addr)
            }
            NodeKind::Call { fun_id, .. } => format!("NativeCall: {}", fun_id),
            NodeKind::Return => "Return".to_string(),
            NodeKind::StaticVector { values } => {
                format!("Vector: [{}]", values.iter().format(", "))
            }
            NodeKind::MemoryVector {
                addr, name, write, ..
            } => {
                let mode = if *write { "write" } else { "read" };
                format!("MemVector: {} addr {} ({})", name, addr, mode)
            }
        }
    }

    /// Pretty-print the subtree, two spaces per level.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, indent: usize) {
        for _ in 0..indent {
            out.push_str("  ");
        }
        out.push_str(&self.describe());
        out.push('\n');
        for child in &self.children {
            child.dump_into(out, indent + 1);
        }
    }

    /// True if evaluating the subtree could do more than read memory.
    /// Array reads only bounds-check, which counts as pure here.
    pub fn has_side_effects(&self) -> bool {
        match self.kind {
            NodeKind::Call { .. } | NodeKind::Emit { .. } | NodeKind::CallSub { .. } => true,
            _ => self.children.iter().any(Node::has_side_effects),
        }
    }

    pub(crate) fn error(&self, kind: ErrorKind) -> CompileError {
        CompileError::new(self.pos, kind)
    }

    pub(crate) fn internal_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::internal(self.pos, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1, 0)
    }

    #[test]
    fn test_dump_roundtrips_through_deep_copy() {
        let tree = Node::assignment(
            pos(),
            Node::store(pos(), 0),
            Node::binary(
                pos(),
                BinaryOp::Add,
                Node::load(pos(), 1),
                Node::immediate(pos(), 2),
            ),
        );
        let copy = tree.deep_copy();
        assert_eq!(copy.dump(), tree.dump());
        assert_eq!(copy, tree);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let original = Node::binary(
            pos(),
            BinaryOp::Mul,
            Node::load(pos(), 3),
            Node::immediate(pos(), 4),
        );
        let mut copy = original.deep_copy();
        copy.children[1].kind = NodeKind::Immediate { value: 9 };
        assert_eq!(
            original.children[1].kind,
            NodeKind::Immediate { value: 4 }
        );
    }

    #[test]
    fn test_take_children_transfers_ownership() {
        let mut block = Node::block(
            pos(),
            vec![Node::immediate(pos(), 1), Node::immediate(pos(), 2)],
        );
        let children = block.take_children();
        assert_eq!(children.len(), 2);
        assert!(block.children.is_empty());
    }

    #[test]
    fn test_dump_indents_children() {
        let tree = Node::block(pos(), vec![Node::immediate(pos(), 7)]);
        assert_eq!(tree.dump(), "Block\n  Const: 7\n");
    }

    #[test]
    fn test_read_from_write_requires_immediate_index() {
        let write = Node::with_children(
            pos(),
            NodeKind::ArrayWrite {
                addr: 10,
                size: 4,
                name: "a".to_string(),
            },
            vec![Node::load(pos(), 0)],
        );
        let err = Node::read_from_write(&write).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalIndex);

        let write = Node::with_children(
            pos(),
            NodeKind::ArrayWrite {
                addr: 10,
                size: 4,
                name: "a".to_string(),
            },
            vec![Node::immediate(pos(), 2)],
        );
        let read = Node::read_from_write(&write).unwrap();
        assert!(matches!(read.kind, NodeKind::ArrayRead { addr: 10, .. }));
    }

    #[test]
    fn test_side_effect_detection() {
        let pure = Node::binary(
            pos(),
            BinaryOp::Add,
            Node::load(pos(), 0),
            Node::immediate(pos(), 1),
        );
        assert!(!pure.has_side_effects());

        let call = Node::new(
            pos(),
            NodeKind::Call {
                fun_id: 0,
                args_addr: vec![],
            },
        );
        let block = Node::block(pos(), vec![call]);
        assert!(block.has_side_effects());
    }
}
