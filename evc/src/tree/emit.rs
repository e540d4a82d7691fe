use ev16::{payload_i12, OpClass, VmDescription, INIT_EVENT, PAYLOAD_MASK, WHEN_FLAG};

use crate::error::CompileError;
use crate::prelink::{Patch, PreLinkBytecode, RegionId};
use crate::tree::{Node, NodeKind};

impl Node {
    /// Append this subtree's bytecode to the pre-link buffer. Branch
    /// offsets are emitted as zero placeholders with a registered patch;
    /// the linker writes the real distances after concatenation.
    pub fn emit(&self, bc: &mut PreLinkBytecode, desc: &VmDescription) -> Result<(), CompileError> {
        match &self.kind {
            NodeKind::Program => {
                bc.open(RegionId::Event(INIT_EVENT));
                for child in &self.children {
                    match child.kind {
                        NodeKind::EventDecl { event_id } => {
                            bc.close(desc);
                            bc.open(RegionId::Event(event_id));
                        }
                        NodeKind::SubDecl { sub_id } => {
                            bc.close(desc);
                            bc.open(RegionId::Sub(sub_id));
                        }
                        _ => child.emit(bc, desc)?,
                    }
                }
                bc.close(desc);
                Ok(())
            }
            NodeKind::Block => {
                for child in &self.children {
                    child.emit(bc, desc)?;
                }
                Ok(())
            }
            NodeKind::Assignment => {
                self.children[1].emit(bc, desc)?;
                self.children[0].emit(bc, desc)
            }
            NodeKind::Immediate { value } => {
                if desc.is_small_immediate(*value) {
                    bc.push(desc.opcodes.encode(OpClass::SmallImmediate, payload_i12(*value)));
                } else {
                    bc.push(desc.opcodes.encode(OpClass::LargeImmediate, 0));
                    bc.push(*value as u16);
                }
                Ok(())
            }
            NodeKind::Load { addr } => {
                self.check_payload(*addr)?;
                bc.push(desc.opcodes.encode(OpClass::Load, *addr));
                Ok(())
            }
            NodeKind::Store { addr } => {
                self.check_payload(*addr)?;
                bc.push(desc.opcodes.encode(OpClass::Store, *addr));
                Ok(())
            }
            NodeKind::ArrayRead { addr, size, .. } => {
                self.children[0].emit(bc, desc)?;
                self.check_payload(*addr)?;
                bc.push(desc.opcodes.encode(OpClass::IndexedLoad, *addr));
                bc.push(*size);
                Ok(())
            }
            NodeKind::ArrayWrite { addr, size, .. } => {
                self.children[0].emit(bc, desc)?;
                self.check_payload(*addr)?;
                bc.push(desc.opcodes.encode(OpClass::IndexedStore, *addr));
                bc.push(*size);
                Ok(())
            }
            NodeKind::Binary { op } => {
                self.children[0].emit(bc, desc)?;
                self.children[1].emit(bc, desc)?;
                bc.push(desc.opcodes.encode(OpClass::BinaryOp, u8::from(*op) as u16));
                Ok(())
            }
            NodeKind::Unary { op } => {
                self.children[0].emit(bc, desc)?;
                bc.push(desc.opcodes.encode(OpClass::UnaryOp, u8::from(*op) as u16));
                Ok(())
            }
            NodeKind::IfWhen { edge_sensitive, .. } => {
                self.children[0].emit(bc, desc)?;
                let flags = if *edge_sensitive { WHEN_FLAG } else { 0 };
                let base = bc.here();
                bc.push(desc.opcodes.encode(OpClass::ConditionalBranch, flags));
                let skip = bc.new_label();
                let site = bc.here();
                bc.patch(Patch::OffsetWord {
                    site,
                    base,
                    target: skip,
                });
                bc.push(0);
                self.children[1].emit(bc, desc)?;
                self.emit_else(bc, desc, skip, self.children.get(2))
            }
            NodeKind::FoldedIfWhen {
                op, edge_sensitive, ..
            } => {
                self.children[0].emit(bc, desc)?;
                self.children[1].emit(bc, desc)?;
                let flags = if *edge_sensitive { WHEN_FLAG } else { 0 };
                let base = bc.here();
                bc.push(desc.opcodes.encode(OpClass::CompareBranch, flags));
                bc.push(u8::from(*op) as u16);
                let skip = bc.new_label();
                let site = bc.here();
                bc.patch(Patch::OffsetWord {
                    site,
                    base,
                    target: skip,
                });
                bc.push(0);
                self.children[2].emit(bc, desc)?;
                self.emit_else(bc, desc, skip, self.children.get(3))
            }
            NodeKind::While => {
                // a constant condition only survives optimization when true
                if let NodeKind::Immediate { value } = self.children[0].kind {
                    if value == 0 {
                        return Ok(());
                    }
                    let top = bc.label_here();
                    self.children[1].emit(bc, desc)?;
                    Self::emit_jump_to(bc, desc, top);
                    return Ok(());
                }
                let top = bc.label_here();
                self.children[0].emit(bc, desc)?;
                let base = bc.here();
                bc.push(desc.opcodes.encode(OpClass::ConditionalBranch, 0));
                let exit = bc.new_label();
                let site = bc.here();
                bc.patch(Patch::OffsetWord {
                    site,
                    base,
                    target: exit,
                });
                bc.push(0);
                self.children[1].emit(bc, desc)?;
                Self::emit_jump_to(bc, desc, top);
                bc.define_label(exit);
                Ok(())
            }
            NodeKind::FoldedWhile { op } => {
                let top = bc.label_here();
                self.children[0].emit(bc, desc)?;
                self.children[1].emit(bc, desc)?;
                let base = bc.here();
                bc.push(desc.opcodes.encode(OpClass::CompareBranch, 0));
                bc.push(u8::from(*op) as u16);
                let exit = bc.new_label();
                let site = bc.here();
                bc.patch(Patch::OffsetWord {
                    site,
                    base,
                    target: exit,
                });
                bc.push(0);
                self.children[2].emit(bc, desc)?;
                Self::emit_jump_to(bc, desc, top);
                bc.define_label(exit);
                Ok(())
            }
            NodeKind::Emit {
                event_id,
                array_addr,
                array_size,
            } => {
                for child in &self.children {
                    child.emit(bc, desc)?;
                }
                self.check_payload(*event_id)?;
                bc.push(desc.opcodes.encode(OpClass::Emit, *event_id));
                bc.push(*array_addr);
                bc.push(*array_size);
                Ok(())
            }
            NodeKind::Call { fun_id, .. } => {
                for child in &self.children {
                    child.emit(bc, desc)?;
                }
                self.check_payload(*fun_id)?;
                bc.push(desc.opcodes.encode(OpClass::NativeCall, *fun_id));
                Ok(())
            }
            NodeKind::CallSub { sub_id } => {
                let site = bc.here();
                bc.patch(Patch::SubAddress {
                    site,
                    sub_id: *sub_id,
                });
                bc.push(desc.opcodes.encode(OpClass::SubCall, 0));
                Ok(())
            }
            NodeKind::Return => {
                bc.push(desc.opcodes.encode(OpClass::Return, 0));
                Ok(())
            }
            NodeKind::EventDecl { .. } | NodeKind::SubDecl { .. } => Err(self.internal_error(
                format!("{} emitted outside a program block", self.name()),
            )),
            NodeKind::CompoundAssignment { .. }
            | NodeKind::StaticVector { .. }
            | NodeKind::MemoryVector { .. } => Err(self.internal_error(format!(
                "{} not eliminated before emission",
                self.name()
            ))),
        }
    }

    /// Terminate a then block: jump over the else block if there is one,
    /// and land the skip label.
    fn emit_else(
        &self,
        bc: &mut PreLinkBytecode,
        desc: &VmDescription,
        skip: usize,
        else_block: Option<&Node>,
    ) -> Result<(), CompileError> {
        match else_block {
            Some(else_block) => {
                let end = bc.new_label();
                Self::emit_jump_to(bc, desc, end);
                bc.define_label(skip);
                else_block.emit(bc, desc)?;
                bc.define_label(end);
            }
            None => bc.define_label(skip),
        }
        Ok(())
    }

    fn emit_jump_to(bc: &mut PreLinkBytecode, desc: &VmDescription, target: usize) {
        let site = bc.here();
        bc.patch(Patch::JumpPayload {
            site,
            base: site,
            target,
        });
        bc.push(desc.opcodes.encode(OpClass::Jump, 0));
    }

    fn check_payload(&self, value: u16) -> Result<(), CompileError> {
        if value > PAYLOAD_MASK {
            return Err(self.internal_error(format!(
                "{} does not fit a 12-bit payload in a {}",
                value,
                self.name()
            )));
        }
        Ok(())
    }
}
