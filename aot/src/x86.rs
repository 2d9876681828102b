// x86.rs - 32-bit x86 opcode map
//
// Stack machine convention:
// - The IL evaluation stack is the machine stack, one dword per value
// - ebp frame: arguments at [ebp + 8 + offset], locals at [ebp - 4 - offset]
// - Callee pops its arguments (`ret N`), return value in eax
// - Every IL instruction gets a method-local label so branches can reach it

use crate::asm::{AsmInst, Cond, Operand, Reg};
use crate::descriptor::{method_ref_label, MethodInfo};
use crate::dispatch::{Op, OpCodeMap, OpContext};
use crate::error::Result;
use crate::il::{Instruction, Opcode, Operand as IlOperand};

type Emit = fn(&mut OpContext<'_, '_>, &Instruction) -> Result<()>;

/// Build the x86 dispatch table
pub fn op_code_map() -> OpCodeMap {
    OpCodeMap::new(MethodHeader, MethodFooter, PInvokeBody)
        .with(Opcode::NOP, InstructionOp(nop))
        .with(Opcode::LDARG, InstructionOp(ldarg))
        .with(Opcode::STARG, InstructionOp(starg))
        .with(Opcode::LDLOC, InstructionOp(ldloc))
        .with(Opcode::STLOC, InstructionOp(stloc))
        .with(Opcode::LDNULL, InstructionOp(ldnull))
        .with(Opcode::LDC_I4, InstructionOp(ldc_i4))
        .with(Opcode::LDSFLD, InstructionOp(ldsfld))
        .with(Opcode::STSFLD, InstructionOp(stsfld))
        .with(Opcode::LDSFLDA, InstructionOp(ldsflda))
        .with(Opcode::CALL, InstructionOp(call))
        .with(Opcode::RET, InstructionOp(ret))
        .with(Opcode::POP, InstructionOp(pop))
        .with(Opcode::DUP, InstructionOp(dup))
        .with(Opcode::ADD, InstructionOp(add))
        .with(Opcode::SUB, InstructionOp(sub))
        .with(Opcode::MUL, InstructionOp(mul))
        .with(Opcode::DIV, InstructionOp(div))
        .with(Opcode::REM, InstructionOp(rem))
        .with(Opcode::AND, InstructionOp(and))
        .with(Opcode::OR, InstructionOp(or))
        .with(Opcode::XOR, InstructionOp(xor))
        .with(Opcode::SHL, InstructionOp(shl))
        .with(Opcode::SHR, InstructionOp(shr))
        .with(Opcode::NEG, InstructionOp(neg))
        .with(Opcode::NOT, InstructionOp(not))
        .with(Opcode::CONV_I4, InstructionOp(nop))
        .with(Opcode::CEQ, InstructionOp(ceq))
        .with(Opcode::CGT, InstructionOp(cgt))
        .with(Opcode::CLT, InstructionOp(clt))
        .with(Opcode::BR, InstructionOp(br))
        .with(Opcode::BRTRUE, InstructionOp(brtrue))
        .with(Opcode::BRFALSE, InstructionOp(brfalse))
        .with(Opcode::BEQ, InstructionOp(beq))
        .with(Opcode::BNE_UN, InstructionOp(bne_un))
}

/// Prologue: label, frame setup, zeroed locals
struct MethodHeader;

impl Op for MethodHeader {
    fn assemble(&self, cx: &mut OpContext<'_, '_>) -> Result<()> {
        let info = cx.method;
        cx.emit(AsmInst::label(info.label.clone()));
        cx.emit(AsmInst::push(Operand::Reg(Reg::EBP)));
        cx.emit(AsmInst::Mov {
            dst: Operand::Reg(Reg::EBP),
            src: Operand::Reg(Reg::ESP),
        });
        for _ in &info.locals {
            cx.emit(AsmInst::push(Operand::Imm(0)));
        }
        Ok(())
    }
}

/// Epilogue shared by every `ret` in the method
struct MethodFooter;

impl Op for MethodFooter {
    fn assemble(&self, cx: &mut OpContext<'_, '_>) -> Result<()> {
        let info = cx.method;
        cx.emit(AsmInst::label(info.exit_label()));
        if info.has_return_value {
            cx.emit(AsmInst::pop(Operand::Reg(Reg::EAX)));
        }
        cx.emit(AsmInst::Mov {
            dst: Operand::Reg(Reg::ESP),
            src: Operand::Reg(Reg::EBP),
        });
        cx.emit(AsmInst::pop(Operand::Reg(Reg::EBP)));
        cx.emit(AsmInst::Ret {
            pop: info.arguments_size(),
        });
        Ok(())
    }
}

/// Trampoline into a native (cdecl) export for a PInvoke method
struct PInvokeBody;

impl Op for PInvokeBody {
    fn assemble(&self, cx: &mut OpContext<'_, '_>) -> Result<()> {
        let info = cx.method;
        let def = cx.definition;
        let pinvoke = def
            .pinvoke
            .as_ref()
            .ok_or_else(|| cx.invalid_operand("method is not a PInvoke target"))?;
        let symbol = pinvoke
            .entry_point
            .clone()
            .unwrap_or_else(|| def.name.clone());

        cx.emit(AsmInst::Extern {
            symbol: symbol.clone(),
        });
        cx.emit(AsmInst::comment(format!("native {}!{}", pinvoke.module, symbol)));
        // cdecl: right to left, so the first argument ends up on top
        for arg in info.arguments.iter().rev() {
            cx.emit(AsmInst::push(arg_slot(arg.offset)));
        }
        cx.emit(AsmInst::call(symbol));
        if info.arguments_size() > 0 {
            cx.emit(AsmInst::Add {
                dst: Operand::Reg(Reg::ESP),
                src: Operand::Imm(info.arguments_size() as i64),
            });
        }
        if info.has_return_value {
            cx.emit(AsmInst::push(Operand::Reg(Reg::EAX)));
        }
        Ok(())
    }
}

/// Per-instruction handler: labels the instruction, then emits its code
struct InstructionOp(Emit);

impl Op for InstructionOp {
    fn assemble(&self, cx: &mut OpContext<'_, '_>) -> Result<()> {
        let inst = cx
            .instruction
            .ok_or_else(|| cx.invalid_operand("no current instruction"))?;
        cx.emit(AsmInst::label(cx.method.instruction_label(inst.offset)));
        (self.0)(cx, inst)
    }
}

fn arg_slot(offset: u32) -> Operand {
    Operand::Mem {
        base: Reg::EBP,
        disp: 8 + offset as i32,
    }
}

fn local_slot(offset: u32) -> Operand {
    Operand::Mem {
        base: Reg::EBP,
        disp: -4 - offset as i32,
    }
}

fn stack_top() -> Operand {
    Operand::Mem {
        base: Reg::ESP,
        disp: 0,
    }
}

fn eax() -> Operand {
    Operand::Reg(Reg::EAX)
}

fn ecx() -> Operand {
    Operand::Reg(Reg::ECX)
}

fn argument(cx: &OpContext<'_, '_>, inst: &Instruction) -> Result<Operand> {
    let info: &MethodInfo = cx.method;
    match inst.operand {
        IlOperand::Argument(idx) => info
            .arguments
            .get(idx as usize)
            .map(|a| arg_slot(a.offset))
            .ok_or_else(|| cx.invalid_operand(format!("argument {} out of range", idx))),
        _ => Err(cx.invalid_operand("expected an argument index")),
    }
}

fn local(cx: &OpContext<'_, '_>, inst: &Instruction) -> Result<Operand> {
    let info: &MethodInfo = cx.method;
    match inst.operand {
        IlOperand::Local(idx) => info
            .locals
            .get(idx as usize)
            .map(|v| local_slot(v.offset))
            .ok_or_else(|| cx.invalid_operand(format!("local {} out of range", idx))),
        _ => Err(cx.invalid_operand("expected a local index")),
    }
}

fn branch_target(cx: &OpContext<'_, '_>, inst: &Instruction) -> Result<String> {
    match inst.operand {
        IlOperand::Branch(offset) => Ok(cx.method.instruction_label(offset)),
        _ => Err(cx.invalid_operand("expected a branch target")),
    }
}

fn static_field(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<String> {
    match &inst.operand {
        IlOperand::Field(field) => cx.queue_static_field(field),
        _ => Err(cx.invalid_operand("expected a field reference")),
    }
}

// =============================================================================
// Loads and stores
// =============================================================================

fn nop(_cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    Ok(())
}

fn ldarg(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let slot = argument(cx, inst)?;
    cx.emit(AsmInst::push(slot));
    Ok(())
}

fn starg(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let slot = argument(cx, inst)?;
    cx.emit(AsmInst::pop(slot));
    Ok(())
}

fn ldloc(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let slot = local(cx, inst)?;
    cx.emit(AsmInst::push(slot));
    Ok(())
}

fn stloc(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let slot = local(cx, inst)?;
    cx.emit(AsmInst::pop(slot));
    Ok(())
}

fn ldnull(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    cx.emit(AsmInst::push(Operand::Imm(0)));
    Ok(())
}

fn ldc_i4(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    match inst.operand {
        IlOperand::Int32(value) => {
            cx.emit(AsmInst::push(Operand::Imm(value as i64)));
            Ok(())
        }
        _ => Err(cx.invalid_operand("expected an int32 constant")),
    }
}

fn ldsfld(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let symbol = static_field(cx, inst)?;
    cx.emit(AsmInst::push(Operand::SymbolMem(symbol)));
    Ok(())
}

fn stsfld(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let symbol = static_field(cx, inst)?;
    cx.emit(AsmInst::pop(Operand::SymbolMem(symbol)));
    Ok(())
}

fn ldsflda(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let symbol = static_field(cx, inst)?;
    cx.emit(AsmInst::push(Operand::Symbol(symbol)));
    Ok(())
}

fn pop(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    cx.emit(AsmInst::Add {
        dst: Operand::Reg(Reg::ESP),
        src: Operand::Imm(4),
    });
    Ok(())
}

fn dup(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    cx.emit(AsmInst::push(stack_top()));
    Ok(())
}

// =============================================================================
// Calls
// =============================================================================

fn call(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let IlOperand::Method(target) = &inst.operand else {
        return Err(cx.invalid_operand("expected a method reference"));
    };
    // Arguments are already pushed left to right; the callee pops them
    cx.emit(AsmInst::call(method_ref_label(target)));
    if !target.return_type.is_void() {
        cx.emit(AsmInst::push(eax()));
    }
    Ok(())
}

fn ret(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    let target = cx.method.exit_label();
    cx.emit(AsmInst::Jmp { target });
    Ok(())
}

// =============================================================================
// Arithmetic
// =============================================================================

fn binary(cx: &mut OpContext<'_, '_>, op: fn(Operand, Operand) -> AsmInst) -> Result<()> {
    cx.emit(AsmInst::pop(eax()));
    cx.emit(op(stack_top(), eax()));
    Ok(())
}

fn add(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    binary(cx, |dst, src| AsmInst::Add { dst, src })
}

fn sub(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    binary(cx, |dst, src| AsmInst::Sub { dst, src })
}

fn and(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    binary(cx, |dst, src| AsmInst::And { dst, src })
}

fn or(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    binary(cx, |dst, src| AsmInst::Or { dst, src })
}

fn xor(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    binary(cx, |dst, src| AsmInst::Xor { dst, src })
}

fn mul(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    cx.emit(AsmInst::pop(eax()));
    cx.emit(AsmInst::Imul {
        dst: Reg::EAX,
        src: stack_top(),
    });
    cx.emit(AsmInst::Mov {
        dst: stack_top(),
        src: eax(),
    });
    Ok(())
}

fn divide(cx: &mut OpContext<'_, '_>, result: Reg) {
    cx.emit(AsmInst::pop(ecx()));
    cx.emit(AsmInst::pop(eax()));
    cx.emit(AsmInst::Cdq);
    cx.emit(AsmInst::Idiv { src: ecx() });
    cx.emit(AsmInst::push(Operand::Reg(result)));
}

fn div(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    divide(cx, Reg::EAX);
    Ok(())
}

fn rem(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    divide(cx, Reg::EDX);
    Ok(())
}

fn shl(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    cx.emit(AsmInst::pop(ecx()));
    cx.emit(AsmInst::Shl { dst: stack_top() });
    Ok(())
}

fn shr(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    cx.emit(AsmInst::pop(ecx()));
    cx.emit(AsmInst::Sar { dst: stack_top() });
    Ok(())
}

fn neg(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    cx.emit(AsmInst::Neg { dst: stack_top() });
    Ok(())
}

fn not(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    cx.emit(AsmInst::Not { dst: stack_top() });
    Ok(())
}

// =============================================================================
// Comparison and branches
// =============================================================================

/// Pop two values and compare the first pushed against the second
fn compare_top(cx: &mut OpContext<'_, '_>) {
    cx.emit(AsmInst::pop(ecx()));
    cx.emit(AsmInst::pop(eax()));
    cx.emit(AsmInst::Cmp { a: eax(), b: ecx() });
}

fn set(cx: &mut OpContext<'_, '_>, cond: Cond) -> Result<()> {
    compare_top(cx);
    cx.emit(AsmInst::Set { cond });
    cx.emit(AsmInst::MovzxAl { dst: Reg::EAX });
    cx.emit(AsmInst::push(eax()));
    Ok(())
}

fn ceq(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    set(cx, Cond::E)
}

fn cgt(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    set(cx, Cond::G)
}

fn clt(cx: &mut OpContext<'_, '_>, _inst: &Instruction) -> Result<()> {
    set(cx, Cond::L)
}

fn br(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    let target = branch_target(cx, inst)?;
    cx.emit(AsmInst::Jmp { target });
    Ok(())
}

fn branch_on_value(cx: &mut OpContext<'_, '_>, inst: &Instruction, cond: Cond) -> Result<()> {
    let target = branch_target(cx, inst)?;
    cx.emit(AsmInst::pop(eax()));
    cx.emit(AsmInst::Test { a: eax(), b: eax() });
    cx.emit(AsmInst::Jcc { cond, target });
    Ok(())
}

fn brtrue(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    branch_on_value(cx, inst, Cond::NZ)
}

fn brfalse(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    branch_on_value(cx, inst, Cond::Z)
}

fn branch_on_compare(cx: &mut OpContext<'_, '_>, inst: &Instruction, cond: Cond) -> Result<()> {
    let target = branch_target(cx, inst)?;
    compare_top(cx);
    cx.emit(AsmInst::Jcc { cond, target });
    Ok(())
}

fn beq(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    branch_on_compare(cx, inst, Cond::E)
}

fn bne_un(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    branch_on_compare(cx, inst, Cond::NE)
}
