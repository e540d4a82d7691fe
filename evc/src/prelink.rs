use std::fmt;

use indexmap::IndexMap;

use ev16::{VmDescription, INIT_EVENT, OpClass};

/// Jump target inside a region, assigned before its offset is known.
pub type Label = usize;

/// One bytecode region per event handler and subroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionId {
    Event(u16),
    Sub(u16),
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionId::Event(id) if *id == INIT_EVENT => write!(f, "event init"),
            RegionId::Event(id) => write!(f, "event {}", id),
            RegionId::Sub(id) => write!(f, "sub {}", id),
        }
    }
}

/// A pending fix-up the linker applies once region addresses are known.
/// Sites and bases are region-relative word offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Write a signed 12-bit offset, relative to `base`, into the payload
    /// of the word at `site`.
    JumpPayload {
        site: usize,
        base: usize,
        target: Label,
    },
    /// Write a signed word offset, relative to `base`, over the whole word
    /// at `site`.
    OffsetWord {
        site: usize,
        base: usize,
        target: Label,
    },
    /// Write the absolute address of a subroutine into the payload of the
    /// word at `site`.
    SubAddress { site: usize, sub_id: u16 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    pub words: Vec<u16>,
    /// Label offsets, indexed by label. `None` until defined.
    pub labels: Vec<Option<usize>>,
    pub patches: Vec<Patch>,
}

/// Bytecode before linking: one word stream per region, with symbolic
/// jumps. The linker concatenates the regions and resolves the patches.
#[derive(Debug, Clone, Default)]
pub struct PreLinkBytecode {
    regions: IndexMap<RegionId, Region>,
    current: Option<RegionId>,
}

impl PreLinkBytecode {
    pub fn new() -> Self {
        PreLinkBytecode::default()
    }

    /// Start a new region; subsequent words go there.
    pub fn open(&mut self, id: RegionId) {
        self.regions.insert(id, Region::default());
        self.current = Some(id);
    }

    /// Seal the current region with its terminator: `Stop` for event
    /// handlers, `Return` for subroutines. An untouched implicit init
    /// region is dropped instead.
    pub fn close(&mut self, desc: &VmDescription) {
        let Some(id) = self.current.take() else {
            return;
        };
        let region = self.regions.get_mut(&id).expect("current region exists");
        if id == RegionId::Event(INIT_EVENT) && region.words.is_empty() {
            self.regions.shift_remove(&id);
            return;
        }
        let terminator = match id {
            RegionId::Event(_) => OpClass::Stop,
            RegionId::Sub(_) => OpClass::Return,
        };
        region.words.push(desc.opcodes.encode(terminator, 0));
    }

    fn current_mut(&mut self) -> &mut Region {
        let id = self.current.expect("emitting outside any region");
        self.regions.get_mut(&id).expect("current region exists")
    }

    /// Append a word to the current region.
    pub fn push(&mut self, word: u16) {
        self.current_mut().words.push(word);
    }

    /// Next word offset in the current region.
    pub fn here(&mut self) -> usize {
        self.current_mut().words.len()
    }

    pub fn new_label(&mut self) -> Label {
        let region = self.current_mut();
        region.labels.push(None);
        region.labels.len() - 1
    }

    /// Pin a label to the current offset.
    pub fn define_label(&mut self, label: Label) {
        let at = self.here();
        self.current_mut().labels[label] = Some(at);
    }

    pub fn label_here(&mut self) -> Label {
        let label = self.new_label();
        self.define_label(label);
        label
    }

    pub fn patch(&mut self, patch: Patch) {
        self.current_mut().patches.push(patch);
    }

    pub fn regions(&self) -> impl Iterator<Item = (&RegionId, &Region)> {
        self.regions.iter()
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    pub fn total_words(&self) -> usize {
        self.regions.values().map(|r| r.words.len()).sum()
    }
}
