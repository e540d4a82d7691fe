use crate::error::{CompileError, ErrorKind};
use crate::tree::{Node, NodeKind, ReturnType};

impl Node {
    /// Verify the tree is well-typed, bottom-up. Never mutates the tree;
    /// running it twice yields the same result.
    pub fn type_check(&self) -> Result<ReturnType, CompileError> {
        use ReturnType::*;
        match &self.kind {
            NodeKind::Immediate { .. } | NodeKind::Load { .. } => Ok(Int),
            NodeKind::Store { .. } => Ok(Unit),
            NodeKind::ArrayRead { .. } => {
                self.expect_type(Int, self.children[0].type_check()?)?;
                Ok(Int)
            }
            NodeKind::ArrayWrite { .. } => {
                self.expect_type(Int, self.children[0].type_check()?)?;
                Ok(Unit)
            }
            NodeKind::Assignment => {
                self.expect_type(Unit, self.children[0].type_check()?)?;
                self.expect_type(Int, self.children[1].type_check()?)?;
                Ok(Unit)
            }
            NodeKind::Binary { op } => {
                let left = self.children[0].type_check()?;
                let right = self.children[1].type_check()?;
                if op.is_logical() {
                    self.expect_type(Bool, left)?;
                    self.expect_type(Bool, right)?;
                    Ok(Bool)
                } else {
                    self.expect_type(Int, left)?;
                    self.expect_type(Int, right)?;
                    Ok(if op.is_comparison() { Bool } else { Int })
                }
            }
            NodeKind::Unary { op } => {
                let operand = self.children[0].type_check()?;
                if *op == ev16::UnaryOp::Not {
                    self.expect_type(Bool, operand)?;
                    Ok(Bool)
                } else {
                    self.expect_type(Int, operand)?;
                    Ok(Int)
                }
            }
            NodeKind::IfWhen { .. } => {
                self.expect_type(Bool, self.children[0].type_check()?)?;
                for block in &self.children[1..] {
                    block.type_check()?;
                }
                Ok(Unit)
            }
            NodeKind::While => {
                self.expect_type(Bool, self.children[0].type_check()?)?;
                self.children[1].type_check()?;
                Ok(Unit)
            }
            NodeKind::FoldedIfWhen { .. } => {
                self.expect_type(Int, self.children[0].type_check()?)?;
                self.expect_type(Int, self.children[1].type_check()?)?;
                for block in &self.children[2..] {
                    block.type_check()?;
                }
                Ok(Unit)
            }
            NodeKind::FoldedWhile { .. } => {
                self.expect_type(Int, self.children[0].type_check()?)?;
                self.expect_type(Int, self.children[1].type_check()?)?;
                self.children[2].type_check()?;
                Ok(Unit)
            }
            NodeKind::Block
            | NodeKind::Program
            | NodeKind::Emit { .. }
            | NodeKind::Call { .. } => {
                for child in &self.children {
                    child.type_check()?;
                }
                Ok(Unit)
            }
            NodeKind::EventDecl { .. }
            | NodeKind::SubDecl { .. }
            | NodeKind::CallSub { .. }
            | NodeKind::Return => Ok(Unit),
            NodeKind::CompoundAssignment { .. }
            | NodeKind::StaticVector { .. }
            | NodeKind::MemoryVector { .. } => Err(self.internal_error(format!(
                "{} not eliminated by tree expansion",
                self.name()
            ))),
        }
    }

    fn expect_type(&self, expected: ReturnType, found: ReturnType) -> Result<(), CompileError> {
        if expected != found {
            return Err(self.error(ErrorKind::TypeMismatch { expected, found }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ev16::{BinaryOp, UnaryOp};

    use super::*;
    use crate::pos::SourcePos;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1, 0)
    }

    fn comparison() -> Node {
        Node::binary(
            pos(),
            BinaryOp::Lt,
            Node::load(pos(), 0),
            Node::immediate(pos(), 10),
        )
    }

    #[test]
    fn test_arithmetic_is_int() {
        let sum = Node::binary(
            pos(),
            BinaryOp::Add,
            Node::immediate(pos(), 1),
            Node::load(pos(), 0),
        );
        assert_eq!(sum.type_check().unwrap(), ReturnType::Int);
    }

    #[test]
    fn test_comparison_is_bool() {
        assert_eq!(comparison().type_check().unwrap(), ReturnType::Bool);
    }

    #[test]
    fn test_arithmetic_on_comparison_rejected() {
        let bad = Node::binary(pos(), BinaryOp::Add, comparison(), Node::immediate(pos(), 1));
        let err = bad.type_check().unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::TypeMismatch {
                expected: ReturnType::Int,
                found: ReturnType::Bool
            }
        );
    }

    #[test]
    fn test_logical_needs_bool_operands() {
        let bad = Node::binary(
            pos(),
            BinaryOp::And,
            comparison(),
            Node::immediate(pos(), 1),
        );
        let err = bad.type_check().unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::TypeMismatch {
                expected: ReturnType::Bool,
                found: ReturnType::Int
            }
        );

        let good = Node::binary(pos(), BinaryOp::And, comparison(), comparison());
        assert_eq!(good.type_check().unwrap(), ReturnType::Bool);
    }

    #[test]
    fn test_condition_must_be_bool() {
        let bad = Node::with_children(
            pos(),
            NodeKind::While,
            vec![Node::load(pos(), 0), Node::block(pos(), vec![])],
        );
        assert!(bad.type_check().is_err());

        let good = Node::with_children(
            pos(),
            NodeKind::While,
            vec![comparison(), Node::block(pos(), vec![])],
        );
        assert_eq!(good.type_check().unwrap(), ReturnType::Unit);
    }

    #[test]
    fn test_logical_not() {
        let good = Node::unary(pos(), UnaryOp::Not, comparison());
        assert_eq!(good.type_check().unwrap(), ReturnType::Bool);

        let bad = Node::unary(pos(), UnaryOp::Not, Node::immediate(pos(), 1));
        assert!(bad.type_check().is_err());

        let bad = Node::unary(pos(), UnaryOp::Neg, comparison());
        assert!(bad.type_check().is_err());
    }

    #[test]
    fn test_residual_vector_is_internal_error() {
        let stray = Node::new(
            pos(),
            NodeKind::MemoryVector {
                addr: 0,
                size: 3,
                name: "a".to_string(),
                write: false,
            },
        );
        let err = stray.type_check().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Internal(_)));
    }

    #[test]
    fn test_type_check_does_not_mutate() {
        let tree = Node::with_children(
            pos(),
            NodeKind::IfWhen {
                edge_sensitive: false,
                end_line: 3,
            },
            vec![
                comparison(),
                Node::block(
                    pos(),
                    vec![Node::assignment(
                        pos(),
                        Node::store(pos(), 1),
                        Node::immediate(pos(), 1),
                    )],
                ),
            ],
        );
        let before = tree.dump();
        tree.type_check().unwrap();
        tree.type_check().unwrap();
        assert_eq!(tree.dump(), before);
    }
}
