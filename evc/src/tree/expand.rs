use crate::error::{CompileError, ErrorKind};
use crate::tree::{Node, NodeKind};

impl Node {
    /// Lower the abstract vector nodes into concrete scalar operations.
    ///
    /// After this pass the tree contains only scalar loads, stores, indexed
    /// accesses, immediates, arithmetic and control flow; no
    /// `StaticVector`, `MemoryVector` or `CompoundAssignment` remains.
    /// `slot` is the index this node occupies in its parent's child list.
    pub fn expand(mut self, slot: usize) -> Result<Node, CompileError> {
        match &self.kind {
            NodeKind::Assignment => self.expand_assignment(),
            NodeKind::CompoundAssignment { .. } => self.expand_compound(slot),
            NodeKind::IfWhen { .. } | NodeKind::While => self.expand_conditional(),
            NodeKind::StaticVector { .. } | NodeKind::MemoryVector { .. } => Err(
                self.internal_error(format!("{} left in statement slot {}", self.name(), slot)),
            ),
            _ => {
                let children = self.take_children();
                for (index, child) in children.into_iter().enumerate() {
                    self.children.push(child.expand(index)?);
                }
                Ok(self)
            }
        }
    }

    /// Number of scalar slots this expression covers. Checks literal
    /// indices against the array bounds on the way.
    fn vector_size(&self) -> Result<u16, CompileError> {
        match &self.kind {
            NodeKind::Immediate { .. }
            | NodeKind::Load { .. }
            | NodeKind::ArrayRead { .. }
            | NodeKind::Store { .. }
            | NodeKind::ArrayWrite { .. } => Ok(1),
            NodeKind::StaticVector { values } => Ok(values.len() as u16),
            NodeKind::MemoryVector { size, name, .. } => match self.children.first() {
                None => Ok(*size),
                Some(index) => match &index.kind {
                    NodeKind::StaticVector { values } if values.len() == 2 => {
                        let (lo, hi) = (values[0], values[1]);
                        self.check_bounds(name, *size, lo)?;
                        self.check_bounds(name, *size, hi)?;
                        if hi < lo {
                            return Err(self
                                .internal_error(format!("reversed range {}:{} on `{}`", lo, hi, name)));
                        }
                        Ok((hi - lo + 1) as u16)
                    }
                    NodeKind::StaticVector { values } if values.len() == 1 => {
                        self.check_bounds(name, *size, values[0])?;
                        Ok(1)
                    }
                    _ => Ok(1),
                },
            },
            NodeKind::Binary { .. } => {
                let left = self.children[0].vector_size()?;
                let right = self.children[1].vector_size()?;
                if left == right || right == 1 {
                    Ok(left)
                } else if left == 1 {
                    Ok(right)
                } else {
                    Err(self.error(ErrorKind::SizeMismatch {
                        expected: left,
                        found: right,
                    }))
                }
            }
            NodeKind::Unary { .. } => self.children[0].vector_size(),
            _ => Err(self.internal_error(format!("{} used as an expression", self.name()))),
        }
    }

    /// Build the scalar node for slot `k` of this expression. Expressions
    /// of size one broadcast: any `k` yields a deep copy of the single
    /// slot. Only pure expressions appear in vector position, so the
    /// duplication is safe.
    fn scalar_slot(&self, k: u16) -> Result<Node, CompileError> {
        match &self.kind {
            NodeKind::Immediate { .. }
            | NodeKind::Load { .. }
            | NodeKind::ArrayRead { .. }
            | NodeKind::Store { .. }
            | NodeKind::ArrayWrite { .. } => Ok(self.deep_copy()),
            NodeKind::StaticVector { values } => {
                let value = if values.len() == 1 {
                    values[0]
                } else {
                    *values.get(k as usize).ok_or_else(|| {
                        self.internal_error(format!("slot {} of a {}-vector", k, values.len()))
                    })?
                };
                Ok(Node::immediate(self.pos, value))
            }
            NodeKind::MemoryVector {
                addr,
                size,
                name,
                write,
            } => {
                let scalar = |offset: i16| -> Result<Node, CompileError> {
                    let at = addr.wrapping_add(offset as u16);
                    Ok(if *write {
                        Node::store(self.pos, at)
                    } else {
                        Node::load(self.pos, at)
                    })
                };
                match self.children.first() {
                    None => scalar(k as i16),
                    Some(index) => match &index.kind {
                        NodeKind::StaticVector { values } if values.len() == 2 => {
                            scalar(values[0] + k as i16)
                        }
                        NodeKind::StaticVector { values } if values.len() == 1 => {
                            scalar(values[0])
                        }
                        _ => {
                            let index = index.lower_scalar()?;
                            let kind = if *write {
                                NodeKind::ArrayWrite {
                                    addr: *addr,
                                    size: *size,
                                    name: name.clone(),
                                }
                            } else {
                                NodeKind::ArrayRead {
                                    addr: *addr,
                                    size: *size,
                                    name: name.clone(),
                                }
                            };
                            Ok(Node::with_children(self.pos, kind, vec![index]))
                        }
                    },
                }
            }
            NodeKind::Binary { op } => {
                let left = &self.children[0];
                let right = &self.children[1];
                let kl = if left.vector_size()? == 1 { 0 } else { k };
                let kr = if right.vector_size()? == 1 { 0 } else { k };
                Ok(Node::binary(
                    self.pos,
                    *op,
                    left.scalar_slot(kl)?,
                    right.scalar_slot(kr)?,
                ))
            }
            NodeKind::Unary { op } => Ok(Node::unary(
                self.pos,
                *op,
                self.children[0].scalar_slot(k)?,
            )),
            _ => Err(self.internal_error(format!("{} used as an expression", self.name()))),
        }
    }

    /// Lower an expression that must cover exactly one scalar slot.
    fn lower_scalar(&self) -> Result<Node, CompileError> {
        let size = self.vector_size()?;
        if size != 1 {
            return Err(self.error(ErrorKind::SizeMismatch {
                expected: 1,
                found: size,
            }));
        }
        self.scalar_slot(0)
    }

    pub(crate) fn check_bounds(&self, name: &str, size: u16, index: i16) -> Result<(), CompileError> {
        if index < 0 || index as u16 >= size {
            return Err(self.error(ErrorKind::OutOfBounds {
                name: name.to_string(),
                index,
                size,
            }));
        }
        Ok(())
    }

    /// An assignment of k slots becomes a block of k scalar assignments.
    fn expand_assignment(mut self) -> Result<Node, CompileError> {
        let pos = self.pos;
        let mut children = self.take_children();
        let rhs = children.pop().ok_or_else(|| self.internal_error("assignment without value"))?;
        let lhs = children
            .pop()
            .ok_or_else(|| self.internal_error("assignment without destination"))?;

        let left = lhs.vector_size()?;
        let right = rhs.vector_size()?;
        if left != right {
            return Err(CompileError::new(
                pos,
                ErrorKind::SizeMismatch {
                    expected: left,
                    found: right,
                },
            ));
        }

        if left == 1 {
            return Ok(Node::assignment(pos, lhs.scalar_slot(0)?, rhs.scalar_slot(0)?));
        }
        let mut statements = Vec::with_capacity(left as usize);
        for k in 0..left {
            statements.push(Node::assignment(
                pos,
                lhs.scalar_slot(k)?,
                rhs.scalar_slot(k)?,
            ));
        }
        Ok(Node::block(pos, statements))
    }

    /// `lhs op= rhs` becomes `lhs = lhs op rhs`, duplicating the
    /// destination as a read access. A destination indexed by anything but
    /// a literal is rejected: the duplicate would evaluate the index
    /// twice.
    fn expand_compound(mut self, slot: usize) -> Result<Node, CompileError> {
        let op = match self.kind {
            NodeKind::CompoundAssignment { op } => op,
            _ => unreachable!(),
        };
        let pos = self.pos;
        let mut children = self.take_children();
        let rhs = children
            .pop()
            .ok_or_else(|| self.internal_error("compound assignment without value"))?;
        let lhs = children
            .pop()
            .ok_or_else(|| self.internal_error("compound assignment without destination"))?;

        let read = match &lhs.kind {
            NodeKind::MemoryVector { .. } => {
                if let Some(index) = lhs.children.first() {
                    if !matches!(index.kind, NodeKind::StaticVector { .. }) {
                        return Err(CompileError::new(pos, ErrorKind::IllegalIndex));
                    }
                }
                let mut read = lhs.deep_copy();
                if let NodeKind::MemoryVector { write, .. } = &mut read.kind {
                    *write = false;
                }
                read
            }
            NodeKind::Store { .. } => Node::load_from_store(&lhs)?,
            NodeKind::ArrayWrite { .. } => Node::read_from_write(&lhs)?,
            _ => {
                return Err(CompileError::internal(
                    pos,
                    format!("compound assignment into a {}", lhs.name()),
                ))
            }
        };

        let value = Node::binary(pos, op, read, rhs);
        Node::assignment(pos, lhs, value).expand(slot)
    }

    /// The condition in child slot 0 is scalar; blocks expand as
    /// statements.
    fn expand_conditional(mut self) -> Result<Node, CompileError> {
        let children = self.take_children();
        for (index, child) in children.into_iter().enumerate() {
            if index == 0 {
                self.children.push(child.lower_scalar()?);
            } else {
                self.children.push(child.expand(index)?);
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use ev16::BinaryOp;

    use super::*;
    use crate::pos::SourcePos;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1, 0)
    }

    fn mem_vector(addr: u16, size: u16, name: &str, write: bool) -> Node {
        Node::new(
            pos(),
            NodeKind::MemoryVector {
                addr,
                size,
                name: name.to_string(),
                write,
            },
        )
    }

    fn indexed(mut vector: Node, index: Node) -> Node {
        vector.children.push(index);
        vector
    }

    fn static_vector(values: &[i16]) -> Node {
        Node::new(
            pos(),
            NodeKind::StaticVector {
                values: values.to_vec(),
            },
        )
    }

    fn contains_vector(node: &Node) -> bool {
        matches!(
            node.kind,
            NodeKind::StaticVector { .. } | NodeKind::MemoryVector { .. }
        ) || node.children.iter().any(contains_vector)
    }

    #[test]
    fn test_scalar_assignment_lowers_to_store() {
        // x = 1, where x is the scalar at address 5
        let tree = Node::assignment(pos(), mem_vector(5, 1, "x", true), static_vector(&[1]));
        let expanded = tree.expand(0).unwrap();
        assert_eq!(
            expanded,
            Node::assignment(pos(), Node::store(pos(), 5), Node::immediate(pos(), 1))
        );
    }

    #[test]
    fn test_whole_array_assignment_fans_out() {
        // a = b, both of size 3
        let tree = Node::assignment(
            pos(),
            mem_vector(0, 3, "a", true),
            mem_vector(10, 3, "b", false),
        );
        let expanded = tree.expand(0).unwrap();
        assert_eq!(expanded.kind, NodeKind::Block);
        assert_eq!(expanded.children.len(), 3);
        for (k, stmt) in expanded.children.iter().enumerate() {
            let store = &stmt.children[0];
            let load = &stmt.children[1];
            assert_eq!(store.kind, NodeKind::Store { addr: k as u16 });
            assert_eq!(load.kind, NodeKind::Load { addr: 10 + k as u16 });
        }
    }

    #[test]
    fn test_slice_assignment() {
        // a[1:2] = b[0:1], arrays of size 4
        let tree = Node::assignment(
            pos(),
            indexed(mem_vector(0, 4, "a", true), static_vector(&[1, 2])),
            indexed(mem_vector(10, 4, "b", false), static_vector(&[0, 1])),
        );
        let expanded = tree.expand(0).unwrap();
        assert_eq!(expanded.children.len(), 2);
        assert_eq!(
            expanded.children[0].children[0].kind,
            NodeKind::Store { addr: 1 }
        );
        assert_eq!(
            expanded.children[0].children[1].kind,
            NodeKind::Load { addr: 10 }
        );
        assert_eq!(
            expanded.children[1].children[0].kind,
            NodeKind::Store { addr: 2 }
        );
        assert_eq!(
            expanded.children[1].children[1].kind,
            NodeKind::Load { addr: 11 }
        );
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let tree = Node::assignment(
            pos(),
            mem_vector(0, 3, "a", true),
            mem_vector(10, 2, "b", false),
        );
        let err = tree.expand(0).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::SizeMismatch {
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn test_literal_index_folds_to_scalar_access() {
        // x = a[2]
        let tree = Node::assignment(
            pos(),
            mem_vector(20, 1, "x", true),
            indexed(mem_vector(0, 4, "a", false), static_vector(&[2])),
        );
        let expanded = tree.expand(0).unwrap();
        assert_eq!(expanded.children[1].kind, NodeKind::Load { addr: 2 });
    }

    #[test]
    fn test_literal_index_out_of_bounds() {
        let tree = Node::assignment(
            pos(),
            mem_vector(20, 1, "x", true),
            indexed(mem_vector(0, 4, "a", false), static_vector(&[4])),
        );
        let err = tree.expand(0).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::OutOfBounds { index: 4, size: 4, .. }));
    }

    #[test]
    fn test_computed_index_becomes_indexed_access() {
        // a[i] = 1, i scalar at address 9
        let index = indexed(mem_vector(9, 1, "i", false), static_vector(&[0]));
        let lhs = indexed(mem_vector(0, 4, "a", true), index);
        let tree = Node::assignment(pos(), lhs, static_vector(&[1]));
        let expanded = tree.expand(0).unwrap();
        let store = &expanded.children[0];
        assert!(matches!(store.kind, NodeKind::ArrayWrite { addr: 0, size: 4, .. }));
        assert_eq!(store.children[0].kind, NodeKind::Load { addr: 9 });
    }

    #[test]
    fn test_broadcast_duplicates_scalar_side() {
        // a = a + x, a of size 2, x scalar
        let rhs = Node::binary(
            pos(),
            BinaryOp::Add,
            mem_vector(0, 2, "a", false),
            mem_vector(8, 1, "x", false),
        );
        let tree = Node::assignment(pos(), mem_vector(0, 2, "a", true), rhs);
        let expanded = tree.expand(0).unwrap();
        assert_eq!(expanded.children.len(), 2);
        for (k, stmt) in expanded.children.iter().enumerate() {
            let sum = &stmt.children[1];
            assert_eq!(sum.children[0].kind, NodeKind::Load { addr: k as u16 });
            assert_eq!(sum.children[1].kind, NodeKind::Load { addr: 8 });
        }
    }

    #[test]
    fn test_no_vector_nodes_survive() {
        let body = Node::assignment(
            pos(),
            indexed(mem_vector(0, 4, "a", true), static_vector(&[0, 2])),
            Node::binary(
                pos(),
                BinaryOp::Mul,
                indexed(mem_vector(10, 4, "b", false), static_vector(&[1, 3])),
                static_vector(&[2]),
            ),
        );
        let program = Node::program(
            pos(),
            vec![Node::new(pos(), NodeKind::EventDecl { event_id: 0 }), body],
        );
        let expanded = program.expand(0).unwrap();
        assert!(!contains_vector(&expanded));
    }

    #[test]
    fn test_condition_must_be_scalar() {
        let cond = mem_vector(0, 3, "a", false);
        let tree = Node::with_children(
            pos(),
            NodeKind::While,
            vec![cond, Node::block(pos(), vec![])],
        );
        let err = tree.expand(0).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::SizeMismatch {
                expected: 1,
                found: 3
            }
        );
    }

    #[test]
    fn test_compound_assignment_desugars() {
        // x += 2
        let tree = Node::with_children(
            pos(),
            NodeKind::CompoundAssignment { op: BinaryOp::Add },
            vec![mem_vector(5, 1, "x", true), static_vector(&[2])],
        );
        let expanded = tree.expand(0).unwrap();
        let expected = Node::assignment(
            pos(),
            Node::store(pos(), 5),
            Node::binary(
                pos(),
                BinaryOp::Add,
                Node::load(pos(), 5),
                Node::immediate(pos(), 2),
            ),
        );
        assert_eq!(expanded, expected);
    }

    #[test]
    fn test_compound_assignment_on_literal_index() {
        // a[1] -= 1
        let lhs = indexed(mem_vector(0, 4, "a", true), static_vector(&[1]));
        let tree = Node::with_children(
            pos(),
            NodeKind::CompoundAssignment { op: BinaryOp::Sub },
            vec![lhs, static_vector(&[1])],
        );
        let expanded = tree.expand(0).unwrap();
        assert_eq!(expanded.children[0].kind, NodeKind::Store { addr: 1 });
        let value = &expanded.children[1];
        assert_eq!(value.children[0].kind, NodeKind::Load { addr: 1 });
    }

    #[test]
    fn test_compound_assignment_rejects_computed_index() {
        // a[i] += 2 would evaluate i twice
        let index = indexed(mem_vector(9, 1, "i", false), static_vector(&[0]));
        let lhs = indexed(mem_vector(0, 4, "a", true), index);
        let tree = Node::with_children(
            pos(),
            NodeKind::CompoundAssignment { op: BinaryOp::Add },
            vec![lhs, static_vector(&[2])],
        );
        let err = tree.expand(0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalIndex);
    }
}
