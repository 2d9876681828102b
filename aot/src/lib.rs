// il2asm - IL bytecode to x86 assembly AOT compiler
//
// This library compiles a managed executable, and everything it can reach,
// ahead of time into a single NASM listing for a freestanding x86 target.
//
// # Architecture
//
// The compiler is a worklist fixed point over members:
//
// 1. **Loading** (`loader.rs`): Read JSON assembly metadata, resolve references by name
// 2. **Resolution** (`resolver.rs`): Map method and field references to declarations
// 3. **Scheduling** (`worklist.rs`): Track every discovered member as pending or done
// 4. **Layout** (`descriptor.rs`): Stack frame offsets and symbol names per method
// 5. **Dispatch** (`dispatch.rs`, `x86.rs`): One handler per opcode for the platform
// 6. **Emission** (`assembler.rs`): Buffer instructions and data, render on success
//
// # Calling Convention
//
// The generated code is a pure stack machine:
// - Arguments are pushed left to right and popped by the callee (`ret N`)
// - Every argument and local occupies one 4-byte slot addressed off ebp
// - Return values travel in eax and are pushed back by the caller
//
// # Runtime Hooks
//
// The start stub calls the runtime's initialize hook, then the entry point,
// then the finalize hook with the exit code, and halts the processor.

pub mod asm;
pub mod assembler;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod il;
pub mod loader;
pub mod metadata;
pub mod resolver;
pub mod worklist;
pub mod x86;

pub use assembler::{Assembler, TextAssembler};
pub use config::{CompileOptions, RuntimeRefs, TargetPlatform};
pub use dispatch::{Op, OpCodeMap, OpContext};
pub use engine::{Engine, RunSummary};
pub use error::{CompileError, Result};
pub use il::{Instruction, Opcode};
pub use loader::{AssemblyCache, AssemblyResolver};
pub use metadata::Assembly;

use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Compile the executable at `assembly_path` for the named target platform
pub fn compile(assembly_path: &Path, target: &str, output: &mut dyn Assembler) -> Result<RunSummary> {
    let options = CompileOptions {
        platform: target.parse()?,
        ..CompileOptions::default()
    };
    compile_with_options(assembly_path, options, Vec::new(), output)
}

/// Compile with explicit options and additional assembly search directories
///
/// Referenced assemblies are looked up next to the entry assembly first,
/// then in `search_dirs` in order.
pub fn compile_with_options(
    assembly_path: &Path,
    options: CompileOptions,
    search_dirs: Vec<PathBuf>,
    output: &mut dyn Assembler,
) -> Result<RunSummary> {
    let entry = Rc::new(loader::load(assembly_path)?);

    let mut dirs = Vec::with_capacity(search_dirs.len() + 1);
    if let Some(parent) = assembly_path.parent() {
        dirs.push(parent.to_path_buf());
    }
    dirs.extend(search_dirs);

    let cache = AssemblyCache::new(dirs);
    cache.insert(entry.clone());

    Engine::new(options, &cache).execute(entry, output)
}
