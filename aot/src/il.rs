// il.rs - IL instruction model
//
// Instructions as the metadata reader hands them over: an offset within the
// method body, the opcode, and one decoded operand.

use crate::metadata::{FieldRef, MethodRef, TypeRef};
use serde::Deserialize;
use std::fmt;

/// A decoded IL instruction
#[derive(Debug, Clone, Deserialize)]
pub struct Instruction {
    /// Byte offset within the method body
    #[serde(default)]
    pub offset: u32,
    /// Decoded opcode
    pub opcode: Opcode,
    /// Operand (if any)
    #[serde(default)]
    pub operand: Operand,
}

/// Instruction operand
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    #[default]
    None,
    Int32(i32),
    Int64(i64),
    String(String),
    /// Branch target (IL offset)
    Branch(u32),
    Local(u16),
    Argument(u16),
    Method(MethodRef),
    Field(FieldRef),
    Type(TypeRef),
}

/// IL opcodes (short and long forms are folded together, the operand carries the index)
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Opcode {
    // Base
    #[serde(rename = "nop")]
    NOP,
    #[serde(rename = "break")]
    BREAK,
    #[serde(rename = "ldarg")]
    LDARG,
    #[serde(rename = "ldarga")]
    LDARGA,
    #[serde(rename = "starg")]
    STARG,
    #[serde(rename = "ldloc")]
    LDLOC,
    #[serde(rename = "ldloca")]
    LDLOCA,
    #[serde(rename = "stloc")]
    STLOC,
    #[serde(rename = "ldnull")]
    LDNULL,
    #[serde(rename = "ldc.i4")]
    LDC_I4,
    #[serde(rename = "ldc.i8")]
    LDC_I8,
    #[serde(rename = "ldc.r4")]
    LDC_R4,
    #[serde(rename = "ldc.r8")]
    LDC_R8,
    #[serde(rename = "ldstr")]
    LDSTR,
    #[serde(rename = "dup")]
    DUP,
    #[serde(rename = "pop")]
    POP,

    // Calls
    #[serde(rename = "call")]
    CALL,
    #[serde(rename = "callvirt")]
    CALLVIRT,
    #[serde(rename = "calli")]
    CALLI,
    #[serde(rename = "newobj")]
    NEWOBJ,
    #[serde(rename = "ldftn")]
    LDFTN,
    #[serde(rename = "jmp")]
    JMP,
    #[serde(rename = "ret")]
    RET,

    // Branches
    #[serde(rename = "br")]
    BR,
    #[serde(rename = "brfalse")]
    BRFALSE,
    #[serde(rename = "brtrue")]
    BRTRUE,
    #[serde(rename = "beq")]
    BEQ,
    #[serde(rename = "bne.un")]
    BNE_UN,
    #[serde(rename = "bge")]
    BGE,
    #[serde(rename = "bgt")]
    BGT,
    #[serde(rename = "ble")]
    BLE,
    #[serde(rename = "blt")]
    BLT,
    #[serde(rename = "switch")]
    SWITCH,

    // Arithmetic
    #[serde(rename = "add")]
    ADD,
    #[serde(rename = "sub")]
    SUB,
    #[serde(rename = "mul")]
    MUL,
    #[serde(rename = "div")]
    DIV,
    #[serde(rename = "div.un")]
    DIV_UN,
    #[serde(rename = "rem")]
    REM,
    #[serde(rename = "rem.un")]
    REM_UN,
    #[serde(rename = "and")]
    AND,
    #[serde(rename = "or")]
    OR,
    #[serde(rename = "xor")]
    XOR,
    #[serde(rename = "shl")]
    SHL,
    #[serde(rename = "shr")]
    SHR,
    #[serde(rename = "shr.un")]
    SHR_UN,
    #[serde(rename = "neg")]
    NEG,
    #[serde(rename = "not")]
    NOT,

    // Comparison
    #[serde(rename = "ceq")]
    CEQ,
    #[serde(rename = "cgt")]
    CGT,
    #[serde(rename = "cgt.un")]
    CGT_UN,
    #[serde(rename = "clt")]
    CLT,
    #[serde(rename = "clt.un")]
    CLT_UN,

    // Conversions
    #[serde(rename = "conv.i1")]
    CONV_I1,
    #[serde(rename = "conv.i2")]
    CONV_I2,
    #[serde(rename = "conv.i4")]
    CONV_I4,
    #[serde(rename = "conv.i8")]
    CONV_I8,
    #[serde(rename = "conv.u1")]
    CONV_U1,
    #[serde(rename = "conv.u2")]
    CONV_U2,
    #[serde(rename = "conv.u4")]
    CONV_U4,
    #[serde(rename = "conv.u8")]
    CONV_U8,

    // Objects and fields
    #[serde(rename = "ldfld")]
    LDFLD,
    #[serde(rename = "ldflda")]
    LDFLDA,
    #[serde(rename = "stfld")]
    STFLD,
    #[serde(rename = "ldsfld")]
    LDSFLD,
    #[serde(rename = "ldsflda")]
    LDSFLDA,
    #[serde(rename = "stsfld")]
    STSFLD,
    #[serde(rename = "box")]
    BOX,
    #[serde(rename = "unbox")]
    UNBOX,
    #[serde(rename = "castclass")]
    CASTCLASS,
    #[serde(rename = "isinst")]
    ISINST,
    #[serde(rename = "newarr")]
    NEWARR,
    #[serde(rename = "ldlen")]
    LDLEN,
    #[serde(rename = "throw")]
    THROW,
}

impl Opcode {
    /// IL mnemonic as written in disassembly listings
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::NOP => "nop",
            Opcode::BREAK => "break",
            Opcode::LDARG => "ldarg",
            Opcode::LDARGA => "ldarga",
            Opcode::STARG => "starg",
            Opcode::LDLOC => "ldloc",
            Opcode::LDLOCA => "ldloca",
            Opcode::STLOC => "stloc",
            Opcode::LDNULL => "ldnull",
            Opcode::LDC_I4 => "ldc.i4",
            Opcode::LDC_I8 => "ldc.i8",
            Opcode::LDC_R4 => "ldc.r4",
            Opcode::LDC_R8 => "ldc.r8",
            Opcode::LDSTR => "ldstr",
            Opcode::DUP => "dup",
            Opcode::POP => "pop",
            Opcode::CALL => "call",
            Opcode::CALLVIRT => "callvirt",
            Opcode::CALLI => "calli",
            Opcode::NEWOBJ => "newobj",
            Opcode::LDFTN => "ldftn",
            Opcode::JMP => "jmp",
            Opcode::RET => "ret",
            Opcode::BR => "br",
            Opcode::BRFALSE => "brfalse",
            Opcode::BRTRUE => "brtrue",
            Opcode::BEQ => "beq",
            Opcode::BNE_UN => "bne.un",
            Opcode::BGE => "bge",
            Opcode::BGT => "bgt",
            Opcode::BLE => "ble",
            Opcode::BLT => "blt",
            Opcode::SWITCH => "switch",
            Opcode::ADD => "add",
            Opcode::SUB => "sub",
            Opcode::MUL => "mul",
            Opcode::DIV => "div",
            Opcode::DIV_UN => "div.un",
            Opcode::REM => "rem",
            Opcode::REM_UN => "rem.un",
            Opcode::AND => "and",
            Opcode::OR => "or",
            Opcode::XOR => "xor",
            Opcode::SHL => "shl",
            Opcode::SHR => "shr",
            Opcode::SHR_UN => "shr.un",
            Opcode::NEG => "neg",
            Opcode::NOT => "not",
            Opcode::CEQ => "ceq",
            Opcode::CGT => "cgt",
            Opcode::CGT_UN => "cgt.un",
            Opcode::CLT => "clt",
            Opcode::CLT_UN => "clt.un",
            Opcode::CONV_I1 => "conv.i1",
            Opcode::CONV_I2 => "conv.i2",
            Opcode::CONV_I4 => "conv.i4",
            Opcode::CONV_I8 => "conv.i8",
            Opcode::CONV_U1 => "conv.u1",
            Opcode::CONV_U2 => "conv.u2",
            Opcode::CONV_U4 => "conv.u4",
            Opcode::CONV_U8 => "conv.u8",
            Opcode::LDFLD => "ldfld",
            Opcode::LDFLDA => "ldflda",
            Opcode::STFLD => "stfld",
            Opcode::LDSFLD => "ldsfld",
            Opcode::LDSFLDA => "ldsflda",
            Opcode::STSFLD => "stsfld",
            Opcode::BOX => "box",
            Opcode::UNBOX => "unbox",
            Opcode::CASTCLASS => "castclass",
            Opcode::ISINST => "isinst",
            Opcode::NEWARR => "newarr",
            Opcode::LDLEN => "ldlen",
            Opcode::THROW => "throw",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl Instruction {
    /// Method referenced by the operand, if any
    pub fn method_ref(&self) -> Option<&MethodRef> {
        match &self.operand {
            Operand::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Field referenced by the operand, if any
    pub fn field_ref(&self) -> Option<&FieldRef> {
        match &self.operand {
            Operand::Field(field) => Some(field),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_instruction() {
        let inst: Instruction = serde_json::from_value(json!({
            "offset": 6,
            "opcode": "ldc.i4",
            "operand": { "int32": 42 }
        }))
        .unwrap();
        assert_eq!(inst.offset, 6);
        assert_eq!(inst.opcode, Opcode::LDC_I4);
        assert!(matches!(inst.operand, Operand::Int32(42)));
        assert!(inst.method_ref().is_none());
    }

    #[test]
    fn test_operand_defaults_to_none() {
        let inst: Instruction = serde_json::from_value(json!({ "opcode": "ret" })).unwrap();
        assert!(matches!(inst.operand, Operand::None));
        assert_eq!(inst.opcode.to_string(), "ret");
    }
}
