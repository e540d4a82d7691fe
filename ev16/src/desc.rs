use serde::{Deserialize, Serialize};

use crate::op::{OpcodeTable, SMALL_IMM_MAX, SMALL_IMM_MIN};

/// Event id of the implicit startup handler.
pub const INIT_EVENT: u16 = 0xFFFF;

/// Description of one EV16 target: memory sizes, the operand stack limit,
/// and the opcode numbering its interpreter is wired for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmDescription {
    pub name: String,
    /// Data memory size in words.
    pub variables_size: u16,
    /// Program memory size in words.
    pub bytecode_size: u16,
    /// Operand stack limit in words.
    pub stack_size: u16,
    #[serde(default)]
    pub opcodes: OpcodeTable,
}

impl VmDescription {
    /// A small target with the default opcode numbering, for tests.
    pub fn sample(name: &str) -> Self {
        VmDescription {
            name: name.to_string(),
            variables_size: 256,
            bytecode_size: 1024,
            stack_size: 32,
            opcodes: OpcodeTable::default(),
        }
    }

    /// Does a constant fit the one-word immediate form?
    pub fn is_small_immediate(&self, value: i16) -> bool {
        (SMALL_IMM_MIN..=SMALL_IMM_MAX).contains(&value)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let desc = VmDescription::sample("demo-bot");
        let json = desc.to_json().unwrap();
        assert_eq!(VmDescription::from_json(&json).unwrap(), desc);
    }

    #[test]
    fn test_opcode_table_defaults_when_absent() {
        let json = r#"{
            "name": "bare-bot",
            "variables_size": 64,
            "bytecode_size": 256,
            "stack_size": 16
        }"#;
        let desc = VmDescription::from_json(json).unwrap();
        assert_eq!(desc.opcodes, OpcodeTable::default());
    }

    #[test]
    fn test_small_immediate_range() {
        let desc = VmDescription::sample("demo-bot");
        assert!(desc.is_small_immediate(0));
        assert!(desc.is_small_immediate(-2048));
        assert!(desc.is_small_immediate(2047));
        assert!(!desc.is_small_immediate(2048));
        assert!(!desc.is_small_immediate(-2049));
    }
}
