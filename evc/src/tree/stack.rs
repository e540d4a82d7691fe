use crate::tree::{Node, NodeKind};

impl Node {
    /// Operand-stack words needed to evaluate this subtree. Binary
    /// operations hold the left result while the right side evaluates;
    /// an indexed store holds the value while the index evaluates. The
    /// program's maximum is checked against the target's stack limit.
    pub fn stack_depth(&self) -> u16 {
        let children_max = || {
            self.children
                .iter()
                .map(Node::stack_depth)
                .max()
                .unwrap_or(0)
        };
        match &self.kind {
            NodeKind::Immediate { .. } | NodeKind::Load { .. } => 1,
            NodeKind::Store { .. } => 1,
            NodeKind::ArrayRead { .. } => self.children[0].stack_depth().max(1),
            NodeKind::ArrayWrite { .. } => 1 + self.children[0].stack_depth(),
            NodeKind::Binary { .. } => self.children[0]
                .stack_depth()
                .max(1 + self.children[1].stack_depth()),
            NodeKind::Unary { .. } => self.children[0].stack_depth(),
            NodeKind::FoldedIfWhen { .. } | NodeKind::FoldedWhile { .. } => {
                let operands = self.children[0]
                    .stack_depth()
                    .max(1 + self.children[1].stack_depth());
                operands.max(
                    self.children[2..]
                        .iter()
                        .map(Node::stack_depth)
                        .max()
                        .unwrap_or(0),
                )
            }
            NodeKind::EventDecl { .. }
            | NodeKind::SubDecl { .. }
            | NodeKind::CallSub { .. }
            | NodeKind::Return => 0,
            // assignments peak on whichever side is deeper: the store side
            // already accounts for the value it pops
            _ => children_max(),
        }
    }
}
