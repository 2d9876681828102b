// metadata.rs - Read-only assembly object model
//
// Assemblies, modules, types and their members as produced by the metadata
// reader. Nothing in here is mutated once loaded; definitions are shared
// through `Rc` so work items can hold on to them across the whole run.

use crate::il::Instruction;
use serde::Deserialize;
use std::fmt;
use std::rc::Rc;

pub const VOID: &str = "System.Void";

/// A loaded assembly
#[derive(Debug, Clone, Deserialize)]
pub struct Assembly {
    pub name: String,
    #[serde(default)]
    pub entry_point: Option<EntryPoint>,
    #[serde(default)]
    pub modules: Vec<Module>,
}

/// Entry point designation of an executable assembly
#[derive(Debug, Clone, Deserialize)]
pub struct EntryPoint {
    pub declaring_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeDef {
    pub full_name: String,
    #[serde(default)]
    pub methods: Vec<Rc<MethodDef>>,
    #[serde(default)]
    pub constructors: Vec<Rc<MethodDef>>,
    #[serde(default)]
    pub fields: Vec<Rc<FieldDef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodDef {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default = "TypeRef::void")]
    pub return_type: TypeRef,
    #[serde(default)]
    pub body: Option<MethodBody>,
    /// Set for methods implemented by a native library
    #[serde(default)]
    pub pinvoke: Option<PInvokeInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodBody {
    #[serde(default)]
    pub locals: Vec<LocalVar>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalVar {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PInvokeInfo {
    /// Native library name
    pub module: String,
    /// Exported symbol (defaults to the method name)
    #[serde(default)]
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: TypeRef,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub constant: Option<Constant>,
}

/// Compile-time constant attached to a field
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Constant {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Reference to a type, possibly living in another assembly
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypeRef {
    pub full_name: String,
    #[serde(default)]
    pub value_type: bool,
    #[serde(default)]
    pub scope: Option<Scope>,
}

/// Where a referenced type is declared
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// A module of the assembly that holds the reference
    Module { name: String },
    /// Another assembly, located through the assembly resolver
    Assembly { name: String },
    /// A bare module reference (netmodule); not handled by the compiler
    ModuleReference { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MethodRef {
    pub declaring_type: TypeRef,
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<TypeRef>,
    #[serde(default = "TypeRef::void")]
    pub return_type: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldRef {
    pub declaring_type: TypeRef,
    pub name: String,
    pub field_type: TypeRef,
}

impl Assembly {
    /// Find a module by name
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Find a type in the first module that declares it
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        self.modules.iter().find_map(|m| m.find_type(full_name))
    }

    pub fn is_library(&self) -> bool {
        self.entry_point.is_none()
    }
}

impl Module {
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.full_name == full_name)
    }
}

impl TypeDef {
    /// Find a method by name and exact parameter type list
    pub fn find_method(&self, name: &str, parameters: &[TypeRef]) -> Option<&Rc<MethodDef>> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.matches_parameters(parameters))
    }

    /// Find an instance constructor by exact parameter type list
    pub fn find_constructor(&self, parameters: &[TypeRef]) -> Option<&Rc<MethodDef>> {
        self.constructors
            .iter()
            .find(|c| c.name == ".ctor" && c.matches_parameters(parameters))
    }

    pub fn find_static_constructor(&self) -> Option<&Rc<MethodDef>> {
        self.constructors.iter().find(|c| c.name == ".cctor")
    }

    pub fn find_field(&self, name: &str) -> Option<&Rc<FieldDef>> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl MethodDef {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn is_native_bridge(&self) -> bool {
        self.pinvoke.is_some()
    }

    pub fn returns_value(&self) -> bool {
        !self.return_type.is_void()
    }

    /// Parameter type names in declaration order
    pub fn parameter_types(&self) -> Vec<String> {
        self.parameters
            .iter()
            .map(|p| p.ty.full_name.clone())
            .collect()
    }

    pub fn locals(&self) -> &[LocalVar] {
        self.body.as_ref().map(|b| b.locals.as_slice()).unwrap_or(&[])
    }

    pub fn instructions(&self) -> &[Instruction] {
        self.body
            .as_ref()
            .map(|b| b.instructions.as_slice())
            .unwrap_or(&[])
    }

    fn matches_parameters(&self, parameters: &[TypeRef]) -> bool {
        self.parameters.len() == parameters.len()
            && self
                .parameters
                .iter()
                .zip(parameters)
                .all(|(p, r)| p.ty.full_name == r.full_name)
    }
}

impl FieldDef {
    pub fn has_constant_value(&self) -> bool {
        self.constant.is_some()
    }
}

impl TypeRef {
    pub fn void() -> Self {
        TypeRef {
            full_name: VOID.to_string(),
            value_type: false,
            scope: None,
        }
    }

    pub fn is_void(&self) -> bool {
        self.full_name == VOID
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Module { name } => write!(f, "module {}", name),
            Scope::Assembly { name } => write!(f, "assembly {}", name),
            Scope::ModuleReference { name } => write!(f, "module reference {}", name),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.declaring_type.full_name, self.name)?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&param.full_name)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type.full_name, self.name)
    }
}
