// config.rs - Compilation options
//
// Target platform selection and the well-known runtime hooks every program
// is wrapped in.

use crate::error::CompileError;
use crate::metadata::{MethodRef, Scope, TypeRef};
use std::fmt;
use std::str::FromStr;

/// Platforms with a registered opcode map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetPlatform {
    #[default]
    X86,
}

impl TargetPlatform {
    /// Width of a pointer (and of any non-scalar static field slot)
    pub fn pointer_size(&self) -> u32 {
        match self {
            TargetPlatform::X86 => 4,
        }
    }
}

impl FromStr for TargetPlatform {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i686" => Ok(TargetPlatform::X86),
            _ => Err(CompileError::UnsupportedPlatform(s.to_string())),
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPlatform::X86 => f.write_str("x86"),
        }
    }
}

/// Runtime hooks called around the entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeRefs {
    /// Assembly holding the runtime type
    pub assembly: String,
    /// Full name of the runtime type
    pub type_name: String,
    /// `void Initialize()`
    pub initialize: String,
    /// `void Finalize(int exitCode)`
    pub finalize: String,
}

impl Default for RuntimeRefs {
    fn default() -> Self {
        RuntimeRefs {
            assembly: "Runtime".to_string(),
            type_name: "Runtime.RuntimeEngine".to_string(),
            initialize: "InitializeApplication".to_string(),
            finalize: "FinalizeApplication".to_string(),
        }
    }
}

impl RuntimeRefs {
    pub fn initialize_ref(&self) -> MethodRef {
        self.method_ref(&self.initialize, Vec::new())
    }

    pub fn finalize_ref(&self) -> MethodRef {
        let exit_code = TypeRef {
            full_name: "System.Int32".to_string(),
            value_type: true,
            scope: None,
        };
        self.method_ref(&self.finalize, vec![exit_code])
    }

    fn method_ref(&self, name: &str, parameters: Vec<TypeRef>) -> MethodRef {
        MethodRef {
            declaring_type: TypeRef {
                full_name: self.type_name.clone(),
                value_type: false,
                scope: Some(Scope::Assembly {
                    name: self.assembly.clone(),
                }),
            },
            name: name.to_string(),
            parameters,
            return_type: TypeRef::void(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub platform: TargetPlatform,
    /// Emit method/local/argument layout comments
    pub debug: bool,
    pub runtime: RuntimeRefs,
}
