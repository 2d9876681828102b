// resolver.rs - Reference resolution and work discovery
//
// Turns method and field references into concrete declarations, crossing
// assembly boundaries through the assembly resolver, and schedules whatever
// it finds. The resolver owns the worklist for the duration of one run and is
// handed to every opcode handler, so nested discovery never needs global state.

use crate::descriptor::static_field_symbol;
use crate::error::{CompileError, Result};
use crate::loader::AssemblyResolver;
use crate::metadata::{Assembly, FieldDef, FieldRef, MethodDef, MethodRef, Scope, TypeDef, TypeRef};
use crate::worklist::{FieldItem, FieldKey, MethodItem, MethodKey, Worklist};
use std::rc::Rc;

pub struct Resolver<'a> {
    assemblies: &'a dyn AssemblyResolver,
    worklist: Worklist,
}

impl<'a> Resolver<'a> {
    pub fn new(assemblies: &'a dyn AssemblyResolver) -> Self {
        Resolver {
            assemblies,
            worklist: Worklist::new(),
        }
    }

    pub fn worklist(&self) -> &Worklist {
        &self.worklist
    }

    pub fn worklist_mut(&mut self) -> &mut Worklist {
        &mut self.worklist
    }

    /// Schedule the entry point of an executable assembly
    pub fn queue_entry_point(&mut self, assembly: &Rc<Assembly>) -> Result<MethodItem> {
        let entry = assembly
            .entry_point
            .as_ref()
            .ok_or_else(|| CompileError::NoEntryPoint(assembly.name.clone()))?;
        let method = assembly
            .find_type(&entry.declaring_type)
            .and_then(|ty| ty.methods.iter().find(|m| m.name == entry.name))
            .cloned()
            .ok_or_else(|| {
                CompileError::unresolved_method(format!("{}.{}", entry.declaring_type, entry.name))
            })?;

        let item = MethodItem {
            key: MethodKey::new(&entry.declaring_type, &method),
            method,
            origin: assembly.clone(),
        };
        self.worklist.enqueue_method(item.clone());
        Ok(item)
    }

    /// Resolve a method reference and schedule the declaration it names
    pub fn queue_method(&mut self, origin: &Rc<Assembly>, method: &MethodRef) -> Result<MethodKey> {
        let reference = method.to_string();
        let (assembly, def) = self
            .search(origin, &method.declaring_type, &reference, |ty| {
                find_method_def(ty, method)
            })?
            .ok_or_else(|| CompileError::unresolved_method(&reference))?;

        let key = MethodKey::new(&method.declaring_type.full_name, &def);
        self.worklist.enqueue_method(MethodItem {
            key: key.clone(),
            method: def,
            origin: assembly,
        });
        Ok(key)
    }

    /// Resolve a field reference; static fields are scheduled for emission
    pub fn queue_field(&mut self, origin: &Rc<Assembly>, field: &FieldRef) -> Result<Option<String>> {
        let reference = field.to_string();
        let (_, def) = self
            .search(origin, &field.declaring_type, &reference, |ty| {
                ty.find_field(&field.name).cloned()
            })?
            .ok_or_else(|| CompileError::unresolved_field(&reference))?;

        if !def.is_static {
            return Ok(None);
        }
        Ok(Some(self.enqueue_static(&field.declaring_type.full_name, def)))
    }

    /// Resolve a static field reference and return its data symbol
    pub fn queue_static_field(&mut self, origin: &Rc<Assembly>, field: &FieldRef) -> Result<String> {
        self.queue_field(origin, field)?.ok_or_else(|| CompileError::UnresolvedReference {
            kind: "static field",
            name: field.to_string(),
        })
    }

    fn enqueue_static(&mut self, declaring_type: &str, def: Rc<FieldDef>) -> String {
        let key = FieldKey::new(declaring_type, &def);
        let symbol = static_field_symbol(&key);
        self.worklist.enqueue_field(FieldItem {
            key,
            field: def,
            symbol: symbol.clone(),
        });
        symbol
    }

    /// Locate the declaring type of a reference and look a member up in it
    fn search<T>(
        &self,
        origin: &Rc<Assembly>,
        ty: &TypeRef,
        reference: &str,
        find: impl Fn(&TypeDef) -> Option<T>,
    ) -> Result<Option<(Rc<Assembly>, T)>> {
        match &ty.scope {
            Some(Scope::Assembly { name }) => {
                let assembly = if *name == origin.name {
                    origin.clone()
                } else {
                    match self.assemblies.resolve(name)? {
                        Some(assembly) => assembly,
                        None => {
                            tracing::debug!(assembly = %name, reference, "referenced assembly not found");
                            return Ok(None);
                        }
                    }
                };
                // The first module declaring the type decides
                let found = assembly
                    .modules
                    .iter()
                    .find_map(|m| m.find_type(&ty.full_name))
                    .and_then(&find);
                if found.is_some() && assembly.name != origin.name {
                    tracing::debug!(assembly = %assembly.name, reference, "resolved across assemblies");
                }
                Ok(found.map(|member| (assembly, member)))
            }
            Some(Scope::Module { name }) => {
                let found = origin
                    .module(name)
                    .and_then(|m| m.find_type(&ty.full_name))
                    .and_then(&find);
                Ok(found.map(|member| (origin.clone(), member)))
            }
            Some(scope @ Scope::ModuleReference { .. }) => Err(CompileError::UnknownScope {
                reference: reference.to_string(),
                scope: scope.to_string(),
            }),
            None => Err(CompileError::UnknownScope {
                reference: reference.to_string(),
                scope: "**NULL**".to_string(),
            }),
        }
    }
}

fn find_method_def(ty: &TypeDef, method: &MethodRef) -> Option<Rc<MethodDef>> {
    match method.name.as_str() {
        ".ctor" => ty.find_constructor(&method.parameters),
        ".cctor" => ty.find_static_constructor(),
        name => ty.find_method(name, &method.parameters),
    }
    .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::AssemblyCache;
    use serde_json::{json, Value};

    fn int32() -> Value {
        json!({ "full_name": "System.Int32", "value_type": true })
    }

    fn app() -> Rc<Assembly> {
        Rc::new(
            serde_json::from_value(json!({
                "name": "App",
                "entry_point": { "declaring_type": "App.Program", "name": "Main" },
                "modules": [{
                    "name": "App.dll",
                    "types": [{
                        "full_name": "App.Program",
                        "methods": [
                            { "name": "Main" },
                            { "name": "Add", "parameters": [{ "name": "a", "type": int32() }, { "name": "b", "type": int32() }], "return_type": int32() }
                        ],
                        "fields": [
                            { "name": "counter", "field_type": int32(), "is_static": true },
                            { "name": "value", "field_type": int32() }
                        ]
                    }]
                }]
            }))
            .unwrap(),
        )
    }

    fn lib() -> Rc<Assembly> {
        Rc::new(
            serde_json::from_value(json!({
                "name": "Lib",
                "modules": [
                    { "name": "Lib.dll", "types": [{
                        "full_name": "Lib.Counter",
                        "constructors": [{ "name": ".ctor" }, { "name": ".ctor", "parameters": [{ "name": "start", "type": int32() }] }],
                        "methods": [{ "name": "Next", "return_type": int32() }]
                    }] },
                    { "name": "Lib.Extra.dll", "types": [{
                        "full_name": "Lib.Counter",
                        "methods": [{ "name": "Reset" }]
                    }] }
                ]
            }))
            .unwrap(),
        )
    }

    fn cache() -> AssemblyCache {
        let cache = AssemblyCache::new(Vec::new());
        cache.insert(lib());
        cache
    }

    fn scoped(full_name: &str, scope: Value) -> Value {
        json!({ "full_name": full_name, "scope": scope })
    }

    fn method_ref(value: Value) -> MethodRef {
        serde_json::from_value(value).unwrap()
    }

    fn field_ref(name: &str) -> FieldRef {
        serde_json::from_value(json!({
            "declaring_type": scoped("App.Program", json!({ "kind": "module", "name": "App.dll" })),
            "name": name,
            "field_type": int32()
        }))
        .unwrap()
    }

    #[test]
    fn test_module_local_method() {
        let cache = cache();
        let mut resolver = Resolver::new(&cache);
        let add = method_ref(json!({
            "declaring_type": scoped("App.Program", json!({ "kind": "module", "name": "App.dll" })),
            "name": "Add",
            "parameters": [int32(), int32()],
            "return_type": int32()
        }));
        let key = resolver.queue_method(&app(), &add).unwrap();
        assert_eq!(key.to_string(), "App.Program.Add(System.Int32,System.Int32)");
        assert_eq!(resolver.worklist().method_status(&key), Some(false));

        // Same reference again is a no-op
        resolver.queue_method(&app(), &add).unwrap();
        assert_eq!(resolver.worklist().method_count(), 1);
    }

    #[test]
    fn test_signature_mismatch_is_unresolved() {
        let cache = cache();
        let mut resolver = Resolver::new(&cache);
        let add = method_ref(json!({
            "declaring_type": scoped("App.Program", json!({ "kind": "module", "name": "App.dll" })),
            "name": "Add",
            "parameters": [int32()]
        }));
        let err = resolver.queue_method(&app(), &add).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedReference { kind: "method", .. }));
    }

    #[test]
    fn test_cross_assembly_constructor() {
        let cache = cache();
        let mut resolver = Resolver::new(&cache);
        let ctor = method_ref(json!({
            "declaring_type": scoped("Lib.Counter", json!({ "kind": "assembly", "name": "Lib" })),
            "name": ".ctor",
            "parameters": [int32()]
        }));
        let key = resolver.queue_method(&app(), &ctor).unwrap();
        assert_eq!(key.parameters, vec!["System.Int32".to_string()]);
        // Only the matching overload is scheduled
        assert_eq!(resolver.worklist().method_count(), 1);

        let item = resolver.worklist().next_pending_method().unwrap();
        assert_eq!(item.origin.name, "Lib");
    }

    #[test]
    fn test_first_module_declaring_type_wins() {
        let cache = cache();
        let mut resolver = Resolver::new(&cache);
        let reset = method_ref(json!({
            "declaring_type": scoped("Lib.Counter", json!({ "kind": "assembly", "name": "Lib" })),
            "name": "Reset"
        }));
        assert!(matches!(
            resolver.queue_method(&app(), &reset),
            Err(CompileError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_missing_assembly_is_unresolved() {
        let cache = cache();
        let mut resolver = Resolver::new(&cache);
        let call = method_ref(json!({
            "declaring_type": scoped("Gone.Type", json!({ "kind": "assembly", "name": "Gone" })),
            "name": "Run"
        }));
        assert!(matches!(
            resolver.queue_method(&app(), &call),
            Err(CompileError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_unknown_scope() {
        let cache = cache();
        let mut resolver = Resolver::new(&cache);
        let netmodule = method_ref(json!({
            "declaring_type": scoped("App.Program", json!({ "kind": "module_reference", "name": "native.netmodule" })),
            "name": "Main"
        }));
        assert!(matches!(
            resolver.queue_method(&app(), &netmodule),
            Err(CompileError::UnknownScope { .. })
        ));

        let unscoped = method_ref(json!({
            "declaring_type": { "full_name": "App.Program" },
            "name": "Main"
        }));
        assert!(matches!(
            resolver.queue_method(&app(), &unscoped),
            Err(CompileError::UnknownScope { .. })
        ));
    }

    #[test]
    fn test_static_and_instance_fields() {
        let cache = cache();
        let mut resolver = Resolver::new(&cache);
        let symbol = resolver.queue_static_field(&app(), &field_ref("counter")).unwrap();
        assert_eq!(symbol, "static_field$$App_Program$$counter");
        assert_eq!(resolver.worklist().field_count(), 1);

        // Instance fields resolve but never become data members
        assert_eq!(resolver.queue_field(&app(), &field_ref("value")).unwrap(), None);
        assert_eq!(resolver.worklist().field_count(), 1);
        assert!(resolver.queue_static_field(&app(), &field_ref("value")).is_err());
        assert!(resolver.queue_field(&app(), &field_ref("missing")).is_err());
    }

    #[test]
    fn test_entry_point() {
        let cache = cache();
        let mut resolver = Resolver::new(&cache);
        let item = resolver.queue_entry_point(&app()).unwrap();
        assert_eq!(item.key.to_string(), "App.Program.Main()");

        let err = resolver.queue_entry_point(&lib()).unwrap_err();
        assert!(matches!(err, CompileError::NoEntryPoint(ref name) if name == "Lib"));
    }
}
