// engine.rs - Whole-program compilation driver
//
// Seeds the worklist with the runtime hooks and the entry point, emits the
// start stub, then drains pending methods (header, body, footer) and pending
// static fields until nothing new turns up.

use crate::asm::{AsmInst, DataMember, Operand, Reg};
use crate::assembler::Assembler;
use crate::config::CompileOptions;
use crate::descriptor::{method_label, value_type_size, MethodInfo};
use crate::dispatch::{Op, OpCodeMap, OpContext};
use crate::error::{CompileError, Result};
use crate::il::{Instruction, Operand as IlOperand};
use crate::loader::AssemblyResolver;
use crate::metadata::Assembly;
use crate::resolver::Resolver;
use crate::worklist::{FieldItem, FieldKey, MethodItem, MethodKey};
use std::collections::HashSet;
use std::rc::Rc;

/// What a finished run compiled, in emission order
#[derive(Debug, Default)]
pub struct RunSummary {
    pub methods: Vec<MethodKey>,
    pub fields: Vec<FieldKey>,
}

pub struct Engine<'a> {
    map: OpCodeMap,
    options: CompileOptions,
    assemblies: &'a dyn AssemblyResolver,
}

impl<'a> Engine<'a> {
    /// Engine using the opcode map registered for `options.platform`
    pub fn new(options: CompileOptions, assemblies: &'a dyn AssemblyResolver) -> Self {
        let map = OpCodeMap::for_platform(options.platform);
        Self::with_op_code_map(options, map, assemblies)
    }

    /// Engine using a caller-supplied opcode map
    pub fn with_op_code_map(
        options: CompileOptions,
        map: OpCodeMap,
        assemblies: &'a dyn AssemblyResolver,
    ) -> Self {
        Engine {
            map,
            options,
            assemblies,
        }
    }

    /// Compile everything reachable from the entry point of `entry`
    pub fn execute(&self, entry: Rc<Assembly>, asm: &mut dyn Assembler) -> Result<RunSummary> {
        if entry.is_library() {
            return Err(CompileError::NoEntryPoint(entry.name.clone()));
        }
        tracing::info!(assembly = %entry.name, platform = %self.options.platform, "compiling");

        let mut resolver = Resolver::new(self.assemblies);
        let runtime = &self.options.runtime;
        let initialize = resolver.queue_method(&entry, &runtime.initialize_ref())?;
        let finalize = resolver.queue_method(&entry, &runtime.finalize_ref())?;
        let main = resolver.queue_entry_point(&entry)?;

        // Start stub: the program's exit value is Main's return value, or 0
        asm.emit(AsmInst::call(method_label(&initialize)));
        asm.emit(AsmInst::call(method_label(&main.key)));
        if main.method.returns_value() {
            asm.emit(AsmInst::push(Operand::Reg(Reg::EAX)));
        } else {
            asm.emit(AsmInst::push(Operand::Imm(0)));
        }
        asm.emit(AsmInst::call(method_label(&finalize)));
        asm.emit(AsmInst::Cli);
        asm.emit(AsmInst::Hlt);

        let summary = self.drain(&mut resolver, asm)?;
        asm.flush()?;

        tracing::info!(
            methods = summary.methods.len(),
            static_fields = summary.fields.len(),
            "compilation finished"
        );
        Ok(summary)
    }

    /// Run the worklist to a fixed point
    fn drain(&self, resolver: &mut Resolver<'_>, asm: &mut dyn Assembler) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        loop {
            while let Some(item) = resolver.worklist().next_pending_method() {
                self.compile_method(resolver, &item, asm)?;
                resolver.worklist_mut().mark_method_done(&item.key);
                summary.methods.push(item.key);
            }

            while let Some(item) = resolver.worklist().next_pending_field() {
                self.emit_static_field(&item, asm)?;
                resolver.worklist_mut().mark_field_done(&item.key);
                summary.fields.push(item.key);
            }

            if resolver.worklist().is_drained() {
                return Ok(summary);
            }
        }
    }

    fn compile_method(
        &self,
        resolver: &mut Resolver<'_>,
        item: &MethodItem,
        asm: &mut dyn Assembler,
    ) -> Result<()> {
        tracing::debug!(method = %item.key, "processing method");
        let info = MethodInfo::new(&item.key, &item.method);
        let method = item.method.as_ref();

        let mut cx = OpContext {
            method: &info,
            definition: method,
            instruction: None,
            origin: &item.origin,
            resolver,
            asm,
        };

        self.map.method_header().assemble(&mut cx)?;
        if self.options.debug {
            emit_layout_comments(&mut cx, &item.key);
        }

        if method.has_body() {
            check_offsets(&item.key, method.instructions())?;
            for inst in method.instructions() {
                // Queue referenced members before any code is generated for them
                queue_references(&mut cx, inst)?;
                let op = self.map.get(inst.opcode).ok_or_else(|| {
                    CompileError::UnsupportedInstruction {
                        opcode: inst.opcode.to_string(),
                        method: item.key.to_string(),
                    }
                })?;
                cx.instruction = Some(inst);
                op.assemble(&mut cx)?;
            }
            cx.instruction = None;
        } else if method.is_native_bridge() {
            self.map.pinvoke_body().assemble(&mut cx)?;
        } else {
            cx.emit(AsmInst::comment(
                "method body not generated: provided externally",
            ));
        }

        self.map.method_footer().assemble(&mut cx)
    }

    fn emit_static_field(&self, item: &FieldItem, asm: &mut dyn Assembler) -> Result<()> {
        let field = &item.field;
        tracing::debug!(field = %item.key, constant = ?field.constant, "processing static field");

        if field.has_constant_value() {
            return Err(CompileError::UnsupportedConstantField(item.key.to_string()));
        }

        let pointer_size = self.options.platform.pointer_size();
        let size = if field.field_type.value_type {
            value_type_size(&field.field_type.full_name, pointer_size).ok_or_else(|| {
                CompileError::UnknownValueTypeSize {
                    type_name: field.field_type.full_name.clone(),
                    field: item.key.to_string(),
                }
            })?
        } else {
            pointer_size
        };

        asm.emit_data(DataMember::zeroed(item.symbol.clone(), size));
        Ok(())
    }
}

/// Every instruction needs its own label, and every branch must land on one
fn check_offsets(key: &MethodKey, instructions: &[Instruction]) -> Result<()> {
    let invalid = |inst: &Instruction, detail: String| CompileError::InvalidOperand {
        opcode: inst.opcode.to_string(),
        method: key.to_string(),
        detail,
    };

    let mut offsets = HashSet::with_capacity(instructions.len());
    for inst in instructions {
        if !offsets.insert(inst.offset) {
            return Err(invalid(inst, format!("duplicate IL offset {:04X}", inst.offset)));
        }
    }
    for inst in instructions {
        if let IlOperand::Branch(target) = inst.operand {
            if !offsets.contains(&target) {
                return Err(invalid(inst, format!("branch to missing IL offset {:04X}", target)));
            }
        }
    }
    Ok(())
}

fn queue_references(cx: &mut OpContext<'_, '_>, inst: &Instruction) -> Result<()> {
    if let Some(method) = inst.method_ref() {
        cx.queue_method(method)?;
    } else if let Some(field) = inst.field_ref() {
        cx.resolver.queue_field(cx.origin, field)?;
    }
    Ok(())
}

fn emit_layout_comments(cx: &mut OpContext<'_, '_>, key: &MethodKey) {
    let info = cx.method;
    let def = cx.definition;
    cx.emit(AsmInst::comment(format!("Method: {}", key)));
    if def.locals().is_empty() {
        cx.emit(AsmInst::comment("  (No locals)"));
    } else {
        cx.emit(AsmInst::comment("  Locals:"));
        for (i, (local, slot)) in def.locals().iter().zip(&info.locals).enumerate() {
            cx.emit(AsmInst::comment(format!(
                "    [{}] {} {} @ -{}",
                i, local.ty.full_name, local.name, slot.offset
            )));
        }
    }
    cx.emit(AsmInst::comment("  Args:"));
    for (i, (param, slot)) in def.parameters.iter().zip(&info.arguments).enumerate() {
        cx.emit(AsmInst::comment(format!(
            "    [{}] {} {} @ +{}",
            i, param.ty.full_name, param.name, slot.offset
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::TextAssembler;
    use crate::il::Opcode;
    use crate::loader::AssemblyCache;
    use serde_json::{json, Value};

    fn int32() -> Value {
        json!({ "full_name": "System.Int32", "value_type": true })
    }

    fn local(name: &str) -> Value {
        json!({ "kind": "module", "name": name })
    }

    fn runtime() -> Rc<Assembly> {
        Rc::new(
            serde_json::from_value(json!({
                "name": "Runtime",
                "modules": [{ "name": "Runtime.dll", "types": [{
                    "full_name": "Runtime.RuntimeEngine",
                    "methods": [
                        { "name": "InitializeApplication", "body": { "instructions": [{ "offset": 0, "opcode": "ret" }] } },
                        { "name": "FinalizeApplication", "parameters": [{ "name": "exitCode", "type": int32() }],
                          "body": { "instructions": [{ "offset": 0, "opcode": "ret" }] } }
                    ]
                }] }]
            }))
            .unwrap(),
        )
    }

    fn program_type(methods: Value, fields: Value) -> Value {
        json!({ "full_name": "App.Program", "methods": methods, "fields": fields })
    }

    fn app(types: Value) -> Rc<Assembly> {
        Rc::new(
            serde_json::from_value(json!({
                "name": "App",
                "entry_point": { "declaring_type": "App.Program", "name": "Main" },
                "modules": [{ "name": "App.dll", "types": types }]
            }))
            .unwrap(),
        )
    }

    fn helper_ref() -> Value {
        json!({ "declaring_type": { "full_name": "App.Program", "scope": local("App.dll") }, "name": "Helper", "return_type": int32() })
    }

    fn counter_ref() -> Value {
        json!({ "declaring_type": { "full_name": "App.Program", "scope": local("App.dll") }, "name": "counter", "field_type": int32() })
    }

    /// Main calls Helper, Helper reads a static counter
    fn sample() -> Rc<Assembly> {
        app(json!([program_type(
            json!([
                { "name": "Main", "body": { "instructions": [
                    { "offset": 0, "opcode": "call", "operand": { "method": helper_ref() } },
                    { "offset": 5, "opcode": "pop" },
                    { "offset": 6, "opcode": "ret" }
                ] } },
                { "name": "Helper", "return_type": int32(), "body": { "instructions": [
                    { "offset": 0, "opcode": "ldsfld", "operand": { "field": counter_ref() } },
                    { "offset": 5, "opcode": "ret" }
                ] } }
            ]),
            json!([{ "name": "counter", "field_type": int32(), "is_static": true }])
        )]))
    }

    fn cache() -> AssemblyCache {
        let cache = AssemblyCache::new(Vec::new());
        cache.insert(runtime());
        cache
    }

    fn run(entry: Rc<Assembly>, options: CompileOptions) -> (Result<RunSummary>, TextAssembler<Vec<u8>>) {
        let cache = cache();
        let engine = Engine::new(options, &cache);
        let mut asm = TextAssembler::new(Vec::new());
        let result = engine.execute(entry, &mut asm);
        (result, asm)
    }

    #[test]
    fn test_compiles_reachable_program() {
        let (result, asm) = run(sample(), CompileOptions::default());
        let summary = result.unwrap();

        let methods: Vec<String> = summary.methods.iter().map(|k| k.to_string()).collect();
        assert_eq!(
            methods,
            vec![
                "App.Program.Helper()",
                "App.Program.Main()",
                "Runtime.RuntimeEngine.FinalizeApplication(System.Int32)",
                "Runtime.RuntimeEngine.InitializeApplication()",
            ]
        );
        assert_eq!(summary.fields.len(), 1);
        assert_eq!(
            asm.data_members(),
            &[DataMember::zeroed("static_field$$App_Program$$counter", 4)]
        );

        let stub: Vec<AsmInst> = asm.instructions()[..4].to_vec();
        assert_eq!(
            stub,
            vec![
                AsmInst::call("Runtime_RuntimeEngine$$InitializeApplication"),
                AsmInst::call("App_Program$$Main"),
                AsmInst::push(Operand::Imm(0)),
                AsmInst::call("Runtime_RuntimeEngine$$FinalizeApplication$$System_Int32"),
            ]
        );

        // One header per method
        for key in &summary.methods {
            let header = AsmInst::label(method_label(key));
            let count = asm.instructions().iter().filter(|i| **i == header).count();
            assert_eq!(count, 1, "{}", key);
        }
        let output = String::from_utf8(asm.into_inner()).unwrap();
        assert!(output.contains("App_Program$$Helper:"));
        assert!(output.contains("Runtime_RuntimeEngine$$FinalizeApplication$$System_Int32:"));
    }

    #[test]
    fn test_entry_point_return_value_is_exit_code() {
        let entry = app(json!([program_type(
            json!([{ "name": "Main", "return_type": int32(), "body": { "instructions": [
                { "offset": 0, "opcode": "ldc.i4", "operand": { "int32": 3 } },
                { "offset": 5, "opcode": "ret" }
            ] } }]),
            json!([])
        )]));
        let (result, asm) = run(entry, CompileOptions::default());
        result.unwrap();
        assert_eq!(asm.instructions()[2], AsmInst::push(Operand::Reg(Reg::EAX)));
    }

    #[test]
    fn test_deterministic_output() {
        let render = || {
            let (result, asm) = run(sample(), CompileOptions::default());
            result.unwrap();
            asm.into_inner()
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn test_library_is_rejected_before_emitting() {
        let library: Rc<Assembly> =
            Rc::new(serde_json::from_value(json!({ "name": "Lib", "modules": [] })).unwrap());
        let (result, asm) = run(library, CompileOptions::default());
        assert!(matches!(result, Err(CompileError::NoEntryPoint(_))));
        assert!(asm.instructions().is_empty());
        assert!(asm.into_inner().is_empty());
    }

    #[test]
    fn test_unsupported_instruction_aborts_without_output() {
        let entry = app(json!([program_type(
            json!([{ "name": "Main", "body": { "instructions": [
                { "offset": 0, "opcode": "ldstr", "operand": { "string": "hi" } },
                { "offset": 5, "opcode": "ret" }
            ] } }]),
            json!([])
        )]));
        let (result, asm) = run(entry, CompileOptions::default());
        assert!(matches!(
            result,
            Err(CompileError::UnsupportedInstruction { ref opcode, .. }) if opcode == "ldstr"
        ));
        assert!(asm.into_inner().is_empty());
    }

    #[test]
    fn test_injected_map_missing_opcode() {
        struct Quiet;
        impl Op for Quiet {
            fn assemble(&self, _cx: &mut OpContext<'_, '_>) -> Result<()> {
                Ok(())
            }
        }

        // No handler for `ret` at all
        let map = OpCodeMap::new(Quiet, Quiet, Quiet).with(Opcode::CALL, Quiet);
        let cache = cache();
        let engine = Engine::with_op_code_map(CompileOptions::default(), map, &cache);
        let mut asm = TextAssembler::new(Vec::new());
        let err = engine.execute(sample(), &mut asm).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedInstruction { .. }));
    }

    #[test]
    fn test_field_sizes() {
        let fields = json!([
            { "name": "b", "field_type": { "full_name": "System.Byte", "value_type": true }, "is_static": true },
            { "name": "s", "field_type": { "full_name": "System.Int16", "value_type": true }, "is_static": true },
            { "name": "l", "field_type": { "full_name": "System.UInt64", "value_type": true }, "is_static": true },
            { "name": "o", "field_type": { "full_name": "System.Object" }, "is_static": true }
        ]);
        let load = |offset: u32, name: &str| {
            json!({ "offset": offset, "opcode": "ldsflda", "operand": { "field": {
                "declaring_type": { "full_name": "App.Program", "scope": local("App.dll") },
                "name": name,
                "field_type": int32()
            } } })
        };
        let entry = app(json!([program_type(
            json!([{ "name": "Main", "body": { "instructions": [
                load(0, "o"), load(5, "l"), load(10, "b"), load(15, "s"),
                { "offset": 20, "opcode": "ret" }
            ] } }]),
            fields
        )]));
        let (result, asm) = run(entry, CompileOptions::default());
        result.unwrap();
        let sizes: Vec<(String, u32)> = asm
            .data_members()
            .iter()
            .map(|d| (d.name.clone(), d.size))
            .collect();
        assert_eq!(
            sizes,
            vec![
                ("static_field$$App_Program$$b".to_string(), 1),
                ("static_field$$App_Program$$l".to_string(), 8),
                ("static_field$$App_Program$$o".to_string(), 4),
                ("static_field$$App_Program$$s".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_duplicate_offsets_rejected() {
        let entry = app(json!([program_type(
            json!([{ "name": "Main", "body": { "instructions": [
                { "offset": 0, "opcode": "nop" },
                { "offset": 0, "opcode": "ret" }
            ] } }]),
            json!([])
        )]));
        let (result, asm) = run(entry, CompileOptions::default());
        match result {
            Err(CompileError::InvalidOperand { opcode, method, detail }) => {
                assert_eq!(opcode, "ret");
                assert_eq!(method, "App.Program.Main()");
                assert!(detail.contains("0000"), "{}", detail);
            }
            other => panic!("expected InvalidOperand, got {:?}", other),
        }
        assert!(asm.into_inner().is_empty());
    }

    #[test]
    fn test_branch_to_missing_offset_rejected() {
        let entry = app(json!([program_type(
            json!([{ "name": "Main", "body": { "instructions": [
                { "offset": 0, "opcode": "br", "operand": { "branch": 7 } },
                { "offset": 5, "opcode": "ret" }
            ] } }]),
            json!([])
        )]));
        let (result, _) = run(entry, CompileOptions::default());
        assert!(matches!(
            result,
            Err(CompileError::InvalidOperand { ref opcode, .. }) if opcode == "br"
        ));
    }

    #[test]
    fn test_unknown_value_type_size() {
        let entry = app(json!([program_type(
            json!([{ "name": "Main", "body": { "instructions": [
                { "offset": 0, "opcode": "ldsflda", "operand": { "field": {
                    "declaring_type": { "full_name": "App.Program", "scope": local("App.dll") },
                    "name": "origin",
                    "field_type": { "full_name": "App.Point", "value_type": true }
                } } },
                { "offset": 5, "opcode": "ret" }
            ] } }]),
            json!([{ "name": "origin", "field_type": { "full_name": "App.Point", "value_type": true }, "is_static": true }])
        )]));
        let (result, _) = run(entry, CompileOptions::default());
        assert!(matches!(result, Err(CompileError::UnknownValueTypeSize { .. })));
    }

    #[test]
    fn test_constant_field_halts() {
        let entry = app(json!([program_type(
            json!([{ "name": "Main", "body": { "instructions": [
                { "offset": 0, "opcode": "ldsfld", "operand": { "field": counter_ref() } },
                { "offset": 5, "opcode": "pop" },
                { "offset": 6, "opcode": "ret" }
            ] } }]),
            json!([{ "name": "counter", "field_type": int32(), "is_static": true, "constant": 7 }])
        )]));
        let (result, _) = run(entry, CompileOptions::default());
        assert!(matches!(result, Err(CompileError::UnsupportedConstantField(_))));
    }

    #[test]
    fn test_bodiless_methods() {
        let native_ref = json!({ "declaring_type": { "full_name": "App.Program", "scope": local("App.dll") }, "name": "Beep" });
        let icall_ref = json!({ "declaring_type": { "full_name": "App.Program", "scope": local("App.dll") }, "name": "Halt" });
        let entry = app(json!([program_type(
            json!([
                { "name": "Main", "body": { "instructions": [
                    { "offset": 0, "opcode": "call", "operand": { "method": native_ref } },
                    { "offset": 5, "opcode": "call", "operand": { "method": icall_ref } },
                    { "offset": 10, "opcode": "ret" }
                ] } },
                { "name": "Beep", "pinvoke": { "module": "kernel32" } },
                { "name": "Halt" }
            ]),
            json!([])
        )]));
        let (result, asm) = run(entry, CompileOptions::default());
        assert_eq!(result.unwrap().methods.len(), 5);
        assert!(asm
            .instructions()
            .contains(&AsmInst::Extern { symbol: "Beep".into() }));
        assert!(asm
            .instructions()
            .contains(&AsmInst::comment("method body not generated: provided externally")));
    }

    #[test]
    fn test_debug_comments() {
        let options = CompileOptions {
            debug: true,
            ..CompileOptions::default()
        };
        let (result, asm) = run(sample(), options);
        result.unwrap();
        assert!(asm
            .instructions()
            .contains(&AsmInst::comment("Method: App.Program.Main()")));
        assert!(asm
            .instructions()
            .contains(&AsmInst::comment("    [0] System.Int32 exitCode @ +0")));
    }

    #[test]
    fn test_missing_runtime_is_unresolved() {
        let cache = AssemblyCache::new(Vec::new());
        let engine = Engine::new(CompileOptions::default(), &cache);
        let mut asm = TextAssembler::new(Vec::new());
        let err = engine.execute(sample(), &mut asm).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedReference { .. }));
    }
}
