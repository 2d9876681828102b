// dispatch.rs - Opcode dispatch table and handler protocol
//
// A platform supplies one handler per supported opcode plus three
// distinguished handlers (method header, method footer, native-call bridge).
// Handlers are built once when the table is created and the table is never
// mutated afterwards.

use crate::asm::AsmInst;
use crate::assembler::Assembler;
use crate::config::TargetPlatform;
use crate::descriptor::MethodInfo;
use crate::error::{CompileError, Result};
use crate::il::{Instruction, Opcode};
use crate::metadata::{Assembly, FieldRef, MethodDef, MethodRef};
use crate::resolver::Resolver;
use crate::worklist::MethodKey;
use crate::x86;
use std::collections::HashMap;
use std::rc::Rc;

/// Everything a handler may look at or touch while emitting code
pub struct OpContext<'c, 'r> {
    /// Layout of the method being compiled
    pub method: &'c MethodInfo,
    /// Raw declaration of the method being compiled
    pub definition: &'c MethodDef,
    /// Current instruction; `None` for header, footer and bridge handlers
    pub instruction: Option<&'c Instruction>,
    /// Assembly declaring the method being compiled
    pub origin: &'c Rc<Assembly>,
    pub resolver: &'c mut Resolver<'r>,
    pub asm: &'c mut dyn Assembler,
}

impl OpContext<'_, '_> {
    pub fn emit(&mut self, inst: AsmInst) {
        self.asm.emit(inst);
    }

    pub fn queue_method(&mut self, method: &MethodRef) -> Result<MethodKey> {
        self.resolver.queue_method(self.origin, method)
    }

    pub fn queue_static_field(&mut self, field: &FieldRef) -> Result<String> {
        self.resolver.queue_static_field(self.origin, field)
    }

    /// Error for an instruction whose operand does not fit its opcode
    pub fn invalid_operand(&self, detail: impl Into<String>) -> CompileError {
        CompileError::InvalidOperand {
            opcode: self
                .instruction
                .map(|i| i.opcode.to_string())
                .unwrap_or_default(),
            method: self.method.label.clone(),
            detail: detail.into(),
        }
    }
}

/// A code generation handler
pub trait Op {
    fn assemble(&self, cx: &mut OpContext<'_, '_>) -> Result<()>;
}

/// Opcode to handler mapping for one target platform
pub struct OpCodeMap {
    ops: HashMap<Opcode, Box<dyn Op>>,
    method_header: Box<dyn Op>,
    method_footer: Box<dyn Op>,
    pinvoke_body: Box<dyn Op>,
}

impl OpCodeMap {
    pub fn new(
        method_header: impl Op + 'static,
        method_footer: impl Op + 'static,
        pinvoke_body: impl Op + 'static,
    ) -> Self {
        OpCodeMap {
            ops: HashMap::new(),
            method_header: Box::new(method_header),
            method_footer: Box::new(method_footer),
            pinvoke_body: Box::new(pinvoke_body),
        }
    }

    /// Bind a handler to an opcode (builder style, before the map is handed out)
    pub fn with(mut self, opcode: Opcode, op: impl Op + 'static) -> Self {
        self.ops.insert(opcode, Box::new(op));
        self
    }

    /// The opcode map registered for a platform
    pub fn for_platform(platform: TargetPlatform) -> Self {
        match platform {
            TargetPlatform::X86 => x86::op_code_map(),
        }
    }

    pub fn get(&self, opcode: Opcode) -> Option<&dyn Op> {
        self.ops.get(&opcode).map(|op| op.as_ref())
    }

    pub fn method_header(&self) -> &dyn Op {
        self.method_header.as_ref()
    }

    pub fn method_footer(&self) -> &dyn Op {
        self.method_footer.as_ref()
    }

    pub fn pinvoke_body(&self) -> &dyn Op {
        self.pinvoke_body.as_ref()
    }
}

impl std::fmt::Debug for OpCodeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut opcodes: Vec<_> = self.ops.keys().collect();
        opcodes.sort();
        f.debug_struct("OpCodeMap").field("ops", &opcodes).finish()
    }
}
