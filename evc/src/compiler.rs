use ev16::{VmDescription, INIT_EVENT};

use crate::error::{CompileError, ErrorKind};
use crate::prelink::PreLinkBytecode;
use crate::symbols::SymbolTables;
use crate::tree::{Node, NodeKind};

/// Result of a successful compilation: pre-link bytecode plus the operand
/// stack high-water mark across all handlers and subroutines.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub bytecode: PreLinkBytecode,
    pub max_stack: u16,
}

/// Compile a program tree against the given symbol tables and target.
///
/// The passes run in fixed order: tree expansion, type check,
/// optimization, stack-depth analysis, emission. The tree is consumed;
/// on error nothing is returned and the caller keeps only the error.
pub fn compile(
    program: Node,
    symbols: &SymbolTables,
    desc: &VmDescription,
) -> Result<CompileOutput, CompileError> {
    if program.kind != NodeKind::Program {
        return Err(program.internal_error("compile expects a program block"));
    }
    check_symbols(&program, symbols)?;

    let program = program.expand(0)?;
    program.type_check()?;
    let program = program.optimize()?;

    let max_stack = program.stack_depth();
    if max_stack > desc.stack_size {
        return Err(CompileError::new(
            program.pos,
            ErrorKind::StackOverflow {
                required: max_stack,
                limit: desc.stack_size,
            },
        ));
    }

    let mut bytecode = PreLinkBytecode::new();
    program.emit(&mut bytecode, desc)?;

    let required = bytecode.total_words();
    if required > desc.bytecode_size as usize {
        return Err(CompileError::new(
            program.pos,
            ErrorKind::BytecodeOverflow {
                required,
                limit: desc.bytecode_size,
            },
        ));
    }

    Ok(CompileOutput { bytecode, max_stack })
}

/// The parser resolves names to ids; re-verify the ids against the tables
/// before trusting them.
fn check_symbols(node: &Node, symbols: &SymbolTables) -> Result<(), CompileError> {
    match &node.kind {
        NodeKind::EventDecl { event_id } if *event_id != INIT_EVENT => {
            if symbols.events.by_id(*event_id).is_none() {
                return Err(node.error(unknown("event", *event_id)));
            }
        }
        NodeKind::Emit {
            event_id,
            array_size,
            ..
        } => match symbols.events.by_id(*event_id) {
            None => return Err(node.error(unknown("event", *event_id))),
            Some((_, def)) if def.arg_size != *array_size => {
                return Err(node.error(ErrorKind::SizeMismatch {
                    expected: def.arg_size,
                    found: *array_size,
                }));
            }
            Some(_) => {}
        },
        NodeKind::SubDecl { sub_id } | NodeKind::CallSub { sub_id } => {
            if *sub_id as usize >= symbols.subroutines.len() {
                return Err(node.error(unknown("subroutine", *sub_id)));
            }
        }
        NodeKind::Call { fun_id, .. } => {
            if *fun_id as usize >= symbols.natives.len() {
                return Err(node.error(unknown("native function", *fun_id)));
            }
        }
        _ => {}
    }
    for child in &node.children {
        check_symbols(child, symbols)?;
    }
    Ok(())
}

fn unknown(what: &'static str, id: u16) -> ErrorKind {
    ErrorKind::UnknownSymbol {
        what,
        name: format!("#{}", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pos::SourcePos;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1, 0)
    }

    fn tables() -> SymbolTables {
        let mut symbols = SymbolTables::new();
        symbols.events.define("tick", 0);
        symbols.subroutines.define("reset");
        symbols
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let program = Node::program(
            pos(),
            vec![Node::new(pos(), NodeKind::EventDecl { event_id: 7 })],
        );
        let err = compile(program, &tables(), &VmDescription::sample("demo-bot")).unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::UnknownSymbol { what: "event", .. }
        ));
    }

    #[test]
    fn test_unknown_subroutine_is_rejected() {
        let program = Node::program(
            pos(),
            vec![
                Node::new(pos(), NodeKind::EventDecl { event_id: 0 }),
                Node::new(pos(), NodeKind::CallSub { sub_id: 3 }),
            ],
        );
        let err = compile(program, &tables(), &VmDescription::sample("demo-bot")).unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::UnknownSymbol {
                what: "subroutine",
                ..
            }
        ));
    }

    #[test]
    fn test_emit_payload_size_is_checked() {
        let mut symbols = tables();
        symbols.events.define("ranging", 2);
        let program = Node::program(
            pos(),
            vec![
                Node::new(pos(), NodeKind::EventDecl { event_id: 0 }),
                Node::new(
                    pos(),
                    NodeKind::Emit {
                        event_id: 1,
                        array_addr: 0,
                        array_size: 3,
                    },
                ),
            ],
        );
        let err = compile(program, &symbols, &VmDescription::sample("demo-bot")).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::SizeMismatch {
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_stack_limit_is_enforced() {
        let mut desc = VmDescription::sample("demo-bot");
        desc.stack_size = 2;
        // 1 + (2 + (3 + load)) needs four slots
        let deep = Node::binary(
            pos(),
            ev16::BinaryOp::Add,
            Node::immediate(pos(), 1),
            Node::binary(
                pos(),
                ev16::BinaryOp::Add,
                Node::immediate(pos(), 2),
                Node::binary(
                    pos(),
                    ev16::BinaryOp::Add,
                    Node::immediate(pos(), 3),
                    Node::load(pos(), 0),
                ),
            ),
        );
        let program = Node::program(
            pos(),
            vec![
                Node::new(pos(), NodeKind::EventDecl { event_id: 0 }),
                Node::assignment(pos(), Node::store(pos(), 0), deep),
            ],
        );
        let err = compile(program, &tables(), &desc).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::StackOverflow {
                required: 4,
                limit: 2
            }
        );
    }

    #[test]
    fn test_bytecode_size_is_enforced() {
        let mut desc = VmDescription::sample("demo-bot");
        desc.bytecode_size = 4;
        let statements = (0..4)
            .map(|i| Node::assignment(pos(), Node::store(pos(), i), Node::immediate(pos(), 1)))
            .collect::<Vec<_>>();
        let mut children = vec![Node::new(pos(), NodeKind::EventDecl { event_id: 0 })];
        children.extend(statements);
        let err = compile(Node::program(pos(), children), &tables(), &desc).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BytecodeOverflow { .. }));
    }
}
