use indexmap::IndexMap;
use itertools::Itertools;
use thiserror::Error;

use ev16::{payload_i12, VmDescription, PAYLOAD_MASK};

use crate::compiler::CompileOutput;
use crate::prelink::{Patch, Region, RegionId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("program is {required} words but the target provides {limit}")]
    Overflow { required: usize, limit: u16 },

    #[error("undefined subroutine #{0}")]
    UndefinedSubroutine(u16),

    #[error("undefined branch target in {0}")]
    UndefinedLabel(RegionId),

    #[error("relative jump of {0} words does not fit the jump payload")]
    JumpOutOfRange(isize),

    #[error("subroutine address 0x{0:04X} does not fit the call payload")]
    SubAddressOverflow(usize),
}

/// Address-resolved bytecode: one flat word stream, plus the entry
/// address of every event handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedImage {
    pub words: Vec<u16>,
    /// Event id to entry address, in declaration order.
    pub entries: IndexMap<u16, usize>,
    pub max_stack: u16,
}

/// Concatenate the regions in declaration order and resolve every pending
/// patch against the final addresses.
pub fn link(output: &CompileOutput, desc: &VmDescription) -> Result<LinkedImage, LinkError> {
    let mut bases: IndexMap<RegionId, usize> = IndexMap::new();
    let mut next = 0usize;
    for (id, region) in output.bytecode.regions() {
        bases.insert(*id, next);
        next += region.words.len();
    }
    if next > desc.bytecode_size as usize {
        return Err(LinkError::Overflow {
            required: next,
            limit: desc.bytecode_size,
        });
    }

    let mut words: Vec<u16> = output
        .bytecode
        .regions()
        .flat_map(|(_, region)| region.words.iter().copied())
        .collect_vec();

    for (id, region) in output.bytecode.regions() {
        let base_addr = bases[id];
        for patch in &region.patches {
            match patch {
                Patch::JumpPayload { site, base, target } => {
                    let offset = label_offset(region, *target, *id)? as isize - *base as isize;
                    if !(-2048..=2047).contains(&offset) {
                        return Err(LinkError::JumpOutOfRange(offset));
                    }
                    let word = &mut words[base_addr + site];
                    *word = (*word & !PAYLOAD_MASK) | payload_i12(offset as i16);
                }
                Patch::OffsetWord { site, base, target } => {
                    let offset = label_offset(region, *target, *id)? as isize - *base as isize;
                    words[base_addr + site] = (offset as i16) as u16;
                }
                Patch::SubAddress { site, sub_id } => {
                    let addr = *bases
                        .get(&RegionId::Sub(*sub_id))
                        .ok_or(LinkError::UndefinedSubroutine(*sub_id))?;
                    if addr > PAYLOAD_MASK as usize {
                        return Err(LinkError::SubAddressOverflow(addr));
                    }
                    let word = &mut words[base_addr + site];
                    *word = (*word & !PAYLOAD_MASK) | addr as u16;
                }
            }
        }
    }

    let entries = bases
        .iter()
        .filter_map(|(id, addr)| match id {
            RegionId::Event(event) => Some((*event, *addr)),
            RegionId::Sub(_) => None,
        })
        .collect();

    Ok(LinkedImage {
        words,
        entries,
        max_stack: output.max_stack,
    })
}

fn label_offset(region: &Region, label: usize, id: RegionId) -> Result<usize, LinkError> {
    region
        .labels
        .get(label)
        .copied()
        .flatten()
        .ok_or(LinkError::UndefinedLabel(id))
}

#[cfg(test)]
mod tests {
    use ev16::{sign_extend_12, BinaryOp, OpClass};

    use super::*;
    use crate::compiler::compile;
    use crate::pos::SourcePos;
    use crate::symbols::SymbolTables;
    use crate::tree::{Node, NodeKind};

    fn pos() -> SourcePos {
        SourcePos::new(1, 1, 0)
    }

    fn tables() -> SymbolTables {
        let mut symbols = SymbolTables::new();
        symbols.events.define("tick", 0);
        symbols.subroutines.define("bump");
        symbols
    }

    #[test]
    fn test_sub_call_gets_absolute_address() {
        let desc = VmDescription::sample("demo-bot");
        let program = Node::program(
            pos(),
            vec![
                Node::new(pos(), NodeKind::EventDecl { event_id: 0 }),
                Node::new(pos(), NodeKind::CallSub { sub_id: 0 }),
                Node::new(pos(), NodeKind::SubDecl { sub_id: 0 }),
                Node::assignment(pos(), Node::store(pos(), 0), Node::immediate(pos(), 1)),
            ],
        );
        let output = compile(program, &tables(), &desc).unwrap();
        let image = link(&output, &desc).unwrap();

        // handler: SubCall, Stop; sub starts right after
        let sub_entry = 2;
        assert_eq!(
            image.words[0],
            desc.opcodes.encode(OpClass::SubCall, sub_entry)
        );
        assert_eq!(image.entries.get(&0), Some(&0));
    }

    #[test]
    fn test_loop_offsets_resolve() {
        let desc = VmDescription::sample("demo-bot");
        // while x < 10 do x = x + 1 end
        let x = 0u16;
        let cond = Node::binary(
            pos(),
            BinaryOp::Lt,
            Node::load(pos(), x),
            Node::immediate(pos(), 10),
        );
        let body = Node::block(
            pos(),
            vec![Node::assignment(
                pos(),
                Node::store(pos(), x),
                Node::binary(
                    pos(),
                    BinaryOp::Add,
                    Node::load(pos(), x),
                    Node::immediate(pos(), 1),
                ),
            )],
        );
        let program = Node::program(
            pos(),
            vec![
                Node::new(pos(), NodeKind::EventDecl { event_id: 0 }),
                Node::with_children(pos(), NodeKind::While, vec![cond, body]),
            ],
        );
        let output = compile(program, &tables(), &desc).unwrap();
        let image = link(&output, &desc).unwrap();

        // Load, Imm, CompareBranch, op, offset, Load, Imm, BinaryOp,
        // Store, Jump, Stop
        let compare_at = 2;
        let offset = image.words[compare_at + 2] as i16;
        assert_eq!(compare_at as i16 + offset, 10, "exit lands on Stop");

        let jump_at = 9;
        let rel = sign_extend_12(image.words[jump_at] & PAYLOAD_MASK);
        assert_eq!(jump_at as i16 + rel, 0, "back edge lands on loop top");
    }

    #[test]
    fn test_missing_subroutine_fails() {
        let desc = VmDescription::sample("demo-bot");
        let mut symbols = tables();
        symbols.subroutines.define("ghost");
        let program = Node::program(
            pos(),
            vec![
                Node::new(pos(), NodeKind::EventDecl { event_id: 0 }),
                Node::new(pos(), NodeKind::CallSub { sub_id: 1 }),
            ],
        );
        let output = compile(program, &symbols, &desc).unwrap();
        assert_eq!(
            link(&output, &desc).unwrap_err(),
            LinkError::UndefinedSubroutine(1)
        );
    }
}
