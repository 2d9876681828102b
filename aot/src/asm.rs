// asm.rs - Abstract x86 instruction set
//
// Instruction and data objects produced by the opcode handlers. They only
// become text when an `Assembler` renders them.

use std::fmt;

/// 32-bit general purpose registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    EAX,
    ECX,
    EDX,
    EBP,
    ESP,
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
    /// dword at [base + disp]
    Mem { base: Reg, disp: i32 },
    /// Address of a symbol
    Symbol(String),
    /// dword stored at a symbol
    SymbolMem(String),
}

/// Condition codes for conditional jumps and setcc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    E,
    NE,
    G,
    L,
    Z,
    NZ,
}

/// x86 instruction (simplified IR)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmInst {
    // Structure
    Label { name: String },
    Comment { text: String },
    Extern { symbol: String },

    // Stack
    Push { src: Operand },
    Pop { dst: Operand },

    // Moves
    Mov { dst: Operand, src: Operand },
    /// movzx dst, al
    MovzxAl { dst: Reg },

    // Arithmetic
    Add { dst: Operand, src: Operand },
    Sub { dst: Operand, src: Operand },
    Imul { dst: Reg, src: Operand },
    Cdq,
    Idiv { src: Operand },
    And { dst: Operand, src: Operand },
    Or { dst: Operand, src: Operand },
    Xor { dst: Operand, src: Operand },
    /// Shift left by cl
    Shl { dst: Operand },
    /// Arithmetic shift right by cl
    Sar { dst: Operand },
    Neg { dst: Operand },
    Not { dst: Operand },

    // Comparison
    Cmp { a: Operand, b: Operand },
    Test { a: Operand, b: Operand },
    /// setcc al
    Set { cond: Cond },

    // Control flow
    Jmp { target: String },
    Jcc { cond: Cond, target: String },
    Call { target: String },
    /// Return, popping `pop` bytes of arguments
    Ret { pop: u32 },
    Cli,
    Hlt,
}

/// A static data member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMember {
    pub name: String,
    pub size: u32,
    pub zero_fill: bool,
}

impl AsmInst {
    pub fn label(name: impl Into<String>) -> Self {
        AsmInst::Label { name: name.into() }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        AsmInst::Comment { text: text.into() }
    }

    pub fn call(target: impl Into<String>) -> Self {
        AsmInst::Call {
            target: target.into(),
        }
    }

    pub fn push(src: Operand) -> Self {
        AsmInst::Push { src }
    }

    pub fn pop(dst: Operand) -> Self {
        AsmInst::Pop { dst }
    }
}

impl DataMember {
    pub fn zeroed(name: impl Into<String>, size: u32) -> Self {
        DataMember {
            name: name.into(),
            size,
            zero_fill: true,
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reg::EAX => "eax",
            Reg::ECX => "ecx",
            Reg::EDX => "edx",
            Reg::EBP => "ebp",
            Reg::ESP => "esp",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Imm(value) => write!(f, "dword {}", value),
            Operand::Mem { base, disp } if *disp < 0 => write!(f, "dword [{} - {}]", base, -disp),
            Operand::Mem { base, disp: 0 } => write!(f, "dword [{}]", base),
            Operand::Mem { base, disp } => write!(f, "dword [{} + {}]", base, disp),
            Operand::Symbol(name) => write!(f, "dword {}", name),
            Operand::SymbolMem(name) => write!(f, "dword [{}]", name),
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self {
            Cond::E => "e",
            Cond::NE => "ne",
            Cond::G => "g",
            Cond::L => "l",
            Cond::Z => "z",
            Cond::NZ => "nz",
        };
        f.write_str(suffix)
    }
}

impl fmt::Display for AsmInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmInst::Label { name } => write!(f, "{}:", name),
            AsmInst::Comment { text } => write!(f, "\t; {}", text),
            AsmInst::Extern { symbol } => write!(f, "extern {}", symbol),
            AsmInst::Push { src } => write!(f, "\tpush {}", src),
            AsmInst::Pop { dst } => write!(f, "\tpop {}", dst),
            AsmInst::Mov { dst, src } => write!(f, "\tmov {}, {}", dst, src),
            AsmInst::MovzxAl { dst } => write!(f, "\tmovzx {}, al", dst),
            AsmInst::Add { dst, src } => write!(f, "\tadd {}, {}", dst, src),
            AsmInst::Sub { dst, src } => write!(f, "\tsub {}, {}", dst, src),
            AsmInst::Imul { dst, src } => write!(f, "\timul {}, {}", dst, src),
            AsmInst::Cdq => f.write_str("\tcdq"),
            AsmInst::Idiv { src } => write!(f, "\tidiv {}", src),
            AsmInst::And { dst, src } => write!(f, "\tand {}, {}", dst, src),
            AsmInst::Or { dst, src } => write!(f, "\tor {}, {}", dst, src),
            AsmInst::Xor { dst, src } => write!(f, "\txor {}, {}", dst, src),
            AsmInst::Shl { dst } => write!(f, "\tshl {}, cl", dst),
            AsmInst::Sar { dst } => write!(f, "\tsar {}, cl", dst),
            AsmInst::Neg { dst } => write!(f, "\tneg {}", dst),
            AsmInst::Not { dst } => write!(f, "\tnot {}", dst),
            AsmInst::Cmp { a, b } => write!(f, "\tcmp {}, {}", a, b),
            AsmInst::Test { a, b } => write!(f, "\ttest {}, {}", a, b),
            AsmInst::Set { cond } => write!(f, "\tset{} al", cond),
            AsmInst::Jmp { target } => write!(f, "\tjmp {}", target),
            AsmInst::Jcc { cond, target } => write!(f, "\tj{} {}", cond, target),
            AsmInst::Call { target } => write!(f, "\tcall {}", target),
            AsmInst::Ret { pop: 0 } => f.write_str("\tret"),
            AsmInst::Ret { pop } => write!(f, "\tret {}", pop),
            AsmInst::Cli => f.write_str("\tcli"),
            AsmInst::Hlt => f.write_str("\thlt"),
        }
    }
}

impl fmt::Display for DataMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.zero_fill {
            write!(f, "{}: times {} db 0", self.name, self.size)
        } else {
            write!(f, "{}: resb {}", self.name, self.size)
        }
    }
}
