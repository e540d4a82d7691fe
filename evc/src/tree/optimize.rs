use ev16::{BinaryOp, UnaryOp};

use crate::error::{CompileError, ErrorKind};
use crate::tree::{Node, NodeKind};

impl Node {
    /// Simplify the tree, bottom-up. Constant expressions fold, identity
    /// operands vanish, dead branches drop, and conditions headed by a
    /// comparison merge into the branch node. Running the pass again on
    /// its own output changes nothing.
    pub fn optimize(mut self) -> Result<Node, CompileError> {
        match &self.kind {
            NodeKind::Block | NodeKind::Program => self.optimize_sequence(),
            NodeKind::IfWhen { .. } => self.optimize_if_when(),
            NodeKind::While => self.optimize_while(),
            NodeKind::Binary { .. } => self.optimize_binary(),
            NodeKind::Unary { .. } => self.optimize_unary(),
            NodeKind::ArrayRead { .. } | NodeKind::ArrayWrite { .. } => {
                self.optimize_indexed_access()
            }
            _ => {
                self.optimize_children()?;
                Ok(self)
            }
        }
    }

    fn optimize_children(&mut self) -> Result<(), CompileError> {
        let children = self.take_children();
        for child in children {
            self.children.push(child.optimize()?);
        }
        Ok(())
    }

    /// Nested blocks inline into their parent; empty blocks disappear
    /// with them.
    fn optimize_sequence(mut self) -> Result<Node, CompileError> {
        let children = self.take_children();
        for child in children {
            let child = child.optimize()?;
            if child.kind == NodeKind::Block {
                self.children.extend(child.children);
            } else {
                self.children.push(child);
            }
        }
        Ok(self)
    }

    fn optimize_binary(mut self) -> Result<Node, CompileError> {
        self.optimize_children()?;
        let op = match self.kind {
            NodeKind::Binary { op } => op,
            _ => unreachable!(),
        };

        let imm = |node: &Node| match node.kind {
            NodeKind::Immediate { value } => Some(value),
            _ => None,
        };
        let left = imm(&self.children[0]);
        let right = imm(&self.children[1]);

        if let (Some(l), Some(r)) = (left, right) {
            let value = op
                .eval(l, r)
                .ok_or_else(|| self.error(ErrorKind::DivideByZero))?;
            return Ok(Node::immediate(self.pos, value));
        }

        // identity and absorbing operands; an eliminated subtree must be
        // side-effect free
        match op {
            BinaryOp::Add => {
                if right == Some(0) {
                    return Ok(self.children.swap_remove(0));
                }
                if left == Some(0) {
                    return Ok(self.children.swap_remove(1));
                }
            }
            BinaryOp::Sub => {
                if right == Some(0) {
                    return Ok(self.children.swap_remove(0));
                }
            }
            BinaryOp::Mul => {
                if right == Some(1) {
                    return Ok(self.children.swap_remove(0));
                }
                if left == Some(1) {
                    return Ok(self.children.swap_remove(1));
                }
                if right == Some(0) && !self.children[0].has_side_effects() {
                    return Ok(Node::immediate(self.pos, 0));
                }
                if left == Some(0) && !self.children[1].has_side_effects() {
                    return Ok(Node::immediate(self.pos, 0));
                }
            }
            BinaryOp::And => {
                if let Some(r) = right {
                    if r != 0 {
                        return Ok(self.children.swap_remove(0));
                    }
                    if !self.children[0].has_side_effects() {
                        return Ok(Node::immediate(self.pos, 0));
                    }
                }
                if let Some(l) = left {
                    if l != 0 {
                        return Ok(self.children.swap_remove(1));
                    }
                    if !self.children[1].has_side_effects() {
                        return Ok(Node::immediate(self.pos, 0));
                    }
                }
            }
            BinaryOp::Or => {
                if let Some(r) = right {
                    if r == 0 {
                        return Ok(self.children.swap_remove(0));
                    }
                    if !self.children[0].has_side_effects() {
                        return Ok(Node::immediate(self.pos, 1));
                    }
                }
                if let Some(l) = left {
                    if l == 0 {
                        return Ok(self.children.swap_remove(1));
                    }
                    if !self.children[1].has_side_effects() {
                        return Ok(Node::immediate(self.pos, 1));
                    }
                }
            }
            _ => {}
        }
        Ok(self)
    }

    fn optimize_unary(mut self) -> Result<Node, CompileError> {
        self.optimize_children()?;
        let op = match self.kind {
            NodeKind::Unary { op } => op,
            _ => unreachable!(),
        };

        if let NodeKind::Immediate { value } = self.children[0].kind {
            return Ok(Node::immediate(self.pos, op.eval(value)));
        }

        if op == UnaryOp::Not {
            match &self.children[0].kind {
                NodeKind::Unary { op: UnaryOp::Not } => {
                    let mut inner = self.children.swap_remove(0);
                    return Ok(inner.children.swap_remove(0));
                }
                NodeKind::Binary { op: inner } => {
                    if let Some(negated) = inner.negated() {
                        let mut comparison = self.children.swap_remove(0);
                        comparison.kind = NodeKind::Binary { op: negated };
                        return Ok(comparison);
                    }
                }
                _ => {}
            }
        }
        Ok(self)
    }

    /// A literal index survives folding only here: check it and collapse
    /// the access to a plain scalar one.
    fn optimize_indexed_access(mut self) -> Result<Node, CompileError> {
        self.optimize_children()?;
        let index = match self.children[0].kind {
            NodeKind::Immediate { value } => value,
            _ => return Ok(self),
        };
        match &self.kind {
            NodeKind::ArrayRead { addr, size, name } => {
                self.check_bounds(name, *size, index)?;
                Ok(Node::load(self.pos, addr + index as u16))
            }
            NodeKind::ArrayWrite { addr, size, name } => {
                self.check_bounds(name, *size, index)?;
                Ok(Node::store(self.pos, addr + index as u16))
            }
            _ => unreachable!(),
        }
    }

    /// Logical negation of a condition, pushed all the way inward so the
    /// comparisons underneath stay foldable into compare branches.
    fn negate_condition(mut self) -> Node {
        match self.kind {
            NodeKind::Binary { op } if op.is_comparison() => {
                self.kind = NodeKind::Binary {
                    op: op.negated().unwrap(),
                };
                self
            }
            NodeKind::Binary { op: BinaryOp::And } | NodeKind::Binary { op: BinaryOp::Or } => {
                let swapped = if self.kind == (NodeKind::Binary { op: BinaryOp::And }) {
                    BinaryOp::Or
                } else {
                    BinaryOp::And
                };
                let children = self
                    .take_children()
                    .into_iter()
                    .map(Node::negate_condition)
                    .collect();
                Node::with_children(self.pos, NodeKind::Binary { op: swapped }, children)
            }
            NodeKind::Unary { op: UnaryOp::Not } => self.children.swap_remove(0),
            NodeKind::Immediate { value } => Node::immediate(self.pos, (value == 0) as i16),
            _ => Node::unary(self.pos, UnaryOp::Not, self),
        }
    }

    fn optimize_if_when(mut self) -> Result<Node, CompileError> {
        let (edge_sensitive, end_line) = match self.kind {
            NodeKind::IfWhen {
                edge_sensitive,
                end_line,
            } => (edge_sensitive, end_line),
            _ => unreachable!(),
        };
        self.optimize_children()?;
        let pos = self.pos;
        let mut children = self.take_children();
        let else_block = if children.len() > 2 {
            children.pop()
        } else {
            None
        };
        let then_block = children.pop().expect("if/when without a then block");
        let mut cond = children.pop().expect("if/when without a condition");

        if matches!(cond.kind, NodeKind::Unary { op: UnaryOp::Not }) {
            cond = cond.children.swap_remove(0).negate_condition();
        }

        match cond.kind {
            NodeKind::Immediate { value } => {
                if value == 0 {
                    // the then block is dead for both `if` and `when`
                    return Ok(else_block.unwrap_or_else(|| Node::block(pos, vec![])));
                }
                if !edge_sensitive {
                    return Ok(then_block);
                }
                // a constantly-true `when` still fires only once; the
                // runtime edge state decides, so the node stays
                let mut children = vec![cond, then_block];
                children.extend(else_block);
                Ok(Node::with_children(
                    pos,
                    NodeKind::IfWhen {
                        edge_sensitive,
                        end_line,
                    },
                    children,
                ))
            }
            NodeKind::Binary { op } if op.is_comparison() => {
                let mut folded = cond.take_children();
                folded.push(then_block);
                folded.extend(else_block);
                Ok(Node::with_children(
                    pos,
                    NodeKind::FoldedIfWhen {
                        op,
                        edge_sensitive,
                        end_line,
                    },
                    folded,
                ))
            }
            _ => {
                let mut children = vec![cond, then_block];
                children.extend(else_block);
                Ok(Node::with_children(
                    pos,
                    NodeKind::IfWhen {
                        edge_sensitive,
                        end_line,
                    },
                    children,
                ))
            }
        }
    }

    fn optimize_while(mut self) -> Result<Node, CompileError> {
        self.optimize_children()?;
        let pos = self.pos;
        let mut children = self.take_children();
        let body = children.pop().expect("while without a body");
        let mut cond = children.pop().expect("while without a condition");

        if matches!(cond.kind, NodeKind::Unary { op: UnaryOp::Not }) {
            cond = cond.children.swap_remove(0).negate_condition();
        }

        match cond.kind {
            NodeKind::Immediate { value } => {
                if value == 0 {
                    // never entered
                    return Ok(Node::block(pos, vec![]));
                }
                // deliberate infinite loop
                Ok(Node::with_children(pos, NodeKind::While, vec![cond, body]))
            }
            NodeKind::Binary { op } if op.is_comparison() => {
                let mut folded = cond.take_children();
                folded.push(body);
                Ok(Node::with_children(
                    pos,
                    NodeKind::FoldedWhile { op },
                    folded,
                ))
            }
            _ => Ok(Node::with_children(pos, NodeKind::While, vec![cond, body])),
        }
    }
}
