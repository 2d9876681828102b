// assembler.rs - Emission sink and NASM text rendering
//
// Handlers append abstract instructions and data members; nothing is written
// until `flush`, which renders the whole listing in one go.

use crate::asm::{AsmInst, DataMember};
use crate::error::Result;
use std::collections::HashSet;
use std::io::Write;

/// Symbol the entry stub is exported under
pub const START_SYMBOL: &str = "il2asm_start";

/// Accumulates emitted code and data
pub trait Assembler {
    fn emit(&mut self, inst: AsmInst);
    fn emit_data(&mut self, member: DataMember);
    fn flush(&mut self) -> Result<()>;
}

/// Buffers a listing and renders it as NASM source on flush
#[derive(Debug)]
pub struct TextAssembler<W: Write> {
    out: W,
    instructions: Vec<AsmInst>,
    data: Vec<DataMember>,
}

impl<W: Write> TextAssembler<W> {
    pub fn new(out: W) -> Self {
        TextAssembler {
            out,
            instructions: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn instructions(&self) -> &[AsmInst] {
        &self.instructions
    }

    pub fn data_members(&self) -> &[DataMember] {
        &self.data
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self) -> std::io::Result<()> {
        // Extern declarations go before the section so nasm sees them first
        let mut declared = HashSet::new();
        for inst in &self.instructions {
            if let AsmInst::Extern { symbol } = inst {
                if declared.insert(symbol.as_str()) {
                    writeln!(self.out, "{}", inst)?;
                }
            }
        }

        writeln!(self.out, "bits 32")?;
        writeln!(self.out, "section .text")?;
        writeln!(self.out, "global {}", START_SYMBOL)?;
        writeln!(self.out, "{}:", START_SYMBOL)?;
        for inst in &self.instructions {
            if !matches!(inst, AsmInst::Extern { .. }) {
                writeln!(self.out, "{}", inst)?;
            }
        }

        if !self.data.is_empty() {
            writeln!(self.out)?;
            writeln!(self.out, "section .data")?;
            for member in &self.data {
                writeln!(self.out, "{}", member)?;
            }
        }
        Ok(())
    }
}

impl<W: Write> Assembler for TextAssembler<W> {
    fn emit(&mut self, inst: AsmInst) {
        self.instructions.push(inst);
    }

    fn emit_data(&mut self, member: DataMember) {
        self.data.push(member);
    }

    fn flush(&mut self) -> Result<()> {
        self.render()?;
        self.out.flush()?;
        Ok(())
    }
}
