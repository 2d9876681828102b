// descriptor.rs - Member layout and symbol naming
//
// Computes the frame layout of a method (argument and local slots) and the
// symbol names emitted for methods and static fields.

use crate::metadata::{MethodDef, MethodRef};
use crate::worklist::{FieldKey, MethodKey};

/// Every argument and local occupies one fixed stack slot
pub const SLOT_SIZE: u32 = 4;

/// Joins the parts of a symbol; never produced by mangling
const SEPARATOR: &str = "$$";

/// Frame layout of a method being compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Emitted label of the method
    pub label: String,
    /// Locals in declaration order
    pub locals: Vec<Variable>,
    /// Arguments in declaration order (offsets assigned last-to-first)
    pub arguments: Vec<Argument>,
    pub has_return_value: bool,
}

/// A local variable slot, offset counted down from the frame base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    pub offset: u32,
    pub size: u32,
}

/// An argument slot, offset counted up from the last pushed argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argument {
    pub offset: u32,
    pub size: u32,
}

impl MethodInfo {
    pub fn new(key: &MethodKey, method: &MethodDef) -> Self {
        let mut offset = 0;
        let locals = method
            .locals()
            .iter()
            .map(|_| {
                let var = Variable {
                    offset,
                    size: SLOT_SIZE,
                };
                offset += SLOT_SIZE;
                var
            })
            .collect();

        // Arguments are pushed left to right, so the last one sits closest to the frame
        let count = method.parameters.len();
        let mut arguments = vec![
            Argument {
                offset: 0,
                size: SLOT_SIZE
            };
            count
        ];
        let mut offset = 0;
        for arg in arguments.iter_mut().rev() {
            arg.offset = offset;
            offset += arg.size;
        }

        MethodInfo {
            label: method_label(key),
            locals,
            arguments,
            has_return_value: method.returns_value(),
        }
    }

    /// Bytes the caller pushed for arguments
    pub fn arguments_size(&self) -> u32 {
        self.arguments.iter().map(|a| a.size).sum()
    }

    /// Label of the shared epilogue
    pub fn exit_label(&self) -> String {
        format!("{}.exit", self.label)
    }

    /// Label of the instruction at `offset` within this method
    pub fn instruction_label(&self, offset: u32) -> String {
        format!("{}.IL_{:04X}", self.label, offset)
    }
}

/// Label of a method, stable across runs
///
/// Distinct method identities always get distinct labels: the mangled
/// parts never contain `$$`, which separates type, name and each parameter.
pub fn method_label(key: &MethodKey) -> String {
    let mut label = leading(mangle(&key.declaring_type));
    label.push_str(SEPARATOR);
    label.push_str(&mangle(&key.name));
    for param in &key.parameters {
        label.push_str(SEPARATOR);
        label.push_str(&mangle(param));
    }
    label
}

/// Label a call site uses for the referenced method
pub fn method_ref_label(method: &MethodRef) -> String {
    method_label(&MethodKey::from_ref(method))
}

/// Data symbol of a static field
pub fn static_field_symbol(key: &FieldKey) -> String {
    format!(
        "static_field{sep}{}{sep}{}",
        mangle(&key.declaring_type),
        mangle(&key.name),
        sep = SEPARATOR
    )
}

/// Storage size of a known scalar value type
pub fn value_type_size(full_name: &str, pointer_size: u32) -> Option<u32> {
    match full_name {
        "System.Byte" | "System.SByte" => Some(1),
        "System.UInt16" | "System.Int16" => Some(2),
        "System.UInt32" | "System.Int32" => Some(4),
        "System.UInt64" | "System.Int64" => Some(8),
        "System.UIntPtr" | "System.IntPtr" => Some(pointer_size),
        _ => None,
    }
}

/// Reversible rewrite of a metadata name into NASM identifier characters
///
/// `.` becomes `_`; every other character outside `[A-Za-z0-9]` becomes `$`
/// followed by one code character (or `$x` and six hex digits), so a `$` is
/// never followed by another `$`.
fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        match c {
            c if c.is_ascii_alphanumeric() => out.push(c),
            // Leading dot (`.ctor`) is kept apart from a leading underscore
            '.' if i == 0 => out.push_str("$d"),
            '.' => out.push('_'),
            '_' => out.push_str("$_"),
            '$' => out.push_str("$D"),
            '&' => out.push_str("$R"),
            '*' => out.push_str("$P"),
            '[' => out.push_str("$A"),
            ']' => out.push_str("$B"),
            '`' => out.push_str("$G"),
            ',' => out.push_str("$C"),
            '<' => out.push_str("$L"),
            '>' => out.push_str("$M"),
            '+' => out.push_str("$N"),
            '/' => out.push_str("$S"),
            other => out.push_str(&format!("$x{:06x}", other as u32)),
        }
    }
    out
}

// NASM drops a leading `$`, and `<Module>` would mangle to one
fn leading(mangled: String) -> String {
    if mangled.starts_with('$') {
        format!("_{}", mangled)
    } else {
        mangled
    }
}
