// error.rs - Fatal compilation errors
//
// Every condition here aborts the whole run. There is no recoverable mode.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("target platform '{0}' is not supported")]
    UnsupportedPlatform(String),

    #[error("assembly '{0}' has no entry point (libraries are not supported)")]
    NoEntryPoint(String),

    #[error("unable to resolve {kind} '{name}'")]
    UnresolvedReference { kind: &'static str, name: String },

    #[error("unhandled scope for '{reference}': {scope}")]
    UnknownScope { reference: String, scope: String },

    #[error("no handler for opcode '{opcode}' in {method}")]
    UnsupportedInstruction { opcode: String, method: String },

    #[error("invalid operand for '{opcode}' in {method}: {detail}")]
    InvalidOperand {
        opcode: String,
        method: String,
        detail: String,
    },

    #[error("unable to determine size of value type '{type_name}' (field {field})")]
    UnknownValueTypeSize { type_name: String, field: String },

    #[error("static field '{0}' has a constant value, which is not supported yet")]
    UnsupportedConstantField(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid assembly metadata in {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl CompileError {
    pub(crate) fn unresolved_method(name: impl Into<String>) -> Self {
        CompileError::UnresolvedReference {
            kind: "method",
            name: name.into(),
        }
    }

    pub(crate) fn unresolved_field(name: impl Into<String>) -> Self {
        CompileError::UnresolvedReference {
            kind: "field",
            name: name.into(),
        }
    }
}
