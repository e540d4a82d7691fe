use indexmap::IndexMap;

use crate::error::{CompileError, ErrorKind};
use crate::pos::SourcePos;

/// Memory slot of a variable: base address plus size in words.
/// Scalars have size 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarSlot {
    pub addr: u16,
    pub size: u16,
}

/// Variable name to slot map with a bump allocator over data memory.
/// Insertion order is allocation order.
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    slots: IndexMap<String, VarSlot>,
    next: u16,
}

impl VariableMap {
    pub fn new() -> Self {
        VariableMap::default()
    }

    /// Allocate `size` words for `name` at the next free address.
    pub fn define(&mut self, name: &str, size: u16) -> VarSlot {
        let slot = VarSlot {
            addr: self.next,
            size,
        };
        self.next += size;
        self.slots.insert(name.to_string(), slot);
        slot
    }

    pub fn get(&self, name: &str, pos: SourcePos) -> Result<VarSlot, CompileError> {
        self.slots.get(name).copied().ok_or_else(|| {
            CompileError::new(
                pos,
                ErrorKind::UnknownSymbol {
                    what: "variable",
                    name: name.to_string(),
                },
            )
        })
    }

    /// Total data memory used, in words.
    pub fn used(&self) -> u16 {
        self.next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDef {
    pub id: u16,
    /// Number of payload words the event carries.
    pub arg_size: u16,
}

#[derive(Debug, Clone, Default)]
pub struct EventMap {
    events: IndexMap<String, EventDef>,
}

impl EventMap {
    pub fn new() -> Self {
        EventMap::default()
    }

    pub fn define(&mut self, name: &str, arg_size: u16) -> EventDef {
        let def = EventDef {
            id: self.events.len() as u16,
            arg_size,
        };
        self.events.insert(name.to_string(), def);
        def
    }

    pub fn get(&self, name: &str, pos: SourcePos) -> Result<EventDef, CompileError> {
        self.events.get(name).copied().ok_or_else(|| {
            CompileError::new(
                pos,
                ErrorKind::UnknownSymbol {
                    what: "event",
                    name: name.to_string(),
                },
            )
        })
    }

    pub fn by_id(&self, id: u16) -> Option<(&str, EventDef)> {
        self.events
            .iter()
            .find(|(_, def)| def.id == id)
            .map(|(name, def)| (name.as_str(), *def))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubroutineMap {
    subs: IndexMap<String, u16>,
}

impl SubroutineMap {
    pub fn new() -> Self {
        SubroutineMap::default()
    }

    pub fn define(&mut self, name: &str) -> u16 {
        let id = self.subs.len() as u16;
        self.subs.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, name: &str, pos: SourcePos) -> Result<u16, CompileError> {
        self.subs.get(name).copied().ok_or_else(|| {
            CompileError::new(
                pos,
                ErrorKind::UnknownSymbol {
                    what: "subroutine",
                    name: name.to_string(),
                },
            )
        })
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

/// Direction of a native function parameter, seen from the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeParam {
    pub size: u16,
    pub direction: ParamDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFunction {
    pub id: u16,
    pub params: Vec<NativeParam>,
}

#[derive(Debug, Clone, Default)]
pub struct NativeFunctionMap {
    funcs: IndexMap<String, NativeFunction>,
}

impl NativeFunctionMap {
    pub fn new() -> Self {
        NativeFunctionMap::default()
    }

    pub fn define(&mut self, name: &str, params: Vec<NativeParam>) -> u16 {
        let id = self.funcs.len() as u16;
        self.funcs.insert(name.to_string(), NativeFunction { id, params });
        id
    }

    pub fn get(&self, name: &str, pos: SourcePos) -> Result<&NativeFunction, CompileError> {
        self.funcs.get(name).ok_or_else(|| {
            CompileError::new(
                pos,
                ErrorKind::UnknownSymbol {
                    what: "native function",
                    name: name.to_string(),
                },
            )
        })
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

/// The four tables the compiler borrows from its caller. The parser fills
/// them; the compiler only reads.
#[derive(Debug, Clone, Default)]
pub struct SymbolTables {
    pub variables: VariableMap,
    pub events: EventMap,
    pub subroutines: SubroutineMap,
    pub natives: NativeFunctionMap,
}

impl SymbolTables {
    pub fn new() -> Self {
        SymbolTables::default()
    }
}
