// loader.rs - Assembly loading and cross-assembly resolution
//
// Assemblies are stored as JSON descriptions named `<assembly>.json`. The
// cache resolves assembly names over an ordered list of search directories
// and keeps every lookup (including misses) for the rest of the run.

use crate::error::{CompileError, Result};
use crate::metadata::Assembly;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Locates assemblies by name on behalf of the reference resolver
pub trait AssemblyResolver {
    fn resolve(&self, name: &str) -> Result<Option<Rc<Assembly>>>;
}

/// Parse an assembly description
pub fn parse(data: &[u8], path: &Path) -> Result<Assembly> {
    serde_json::from_slice(data).map_err(|source| CompileError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and parse an assembly description from disk
pub fn load(path: &Path) -> Result<Assembly> {
    let data = std::fs::read(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&data, path)
}

/// Directory-backed assembly resolver
#[derive(Debug, Default)]
pub struct AssemblyCache {
    search_dirs: Vec<PathBuf>,
    loaded: RefCell<HashMap<String, Option<Rc<Assembly>>>>,
}

impl AssemblyCache {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        AssemblyCache {
            search_dirs,
            loaded: RefCell::new(HashMap::new()),
        }
    }

    /// Register an already loaded assembly so lookups by its name hit it directly
    pub fn insert(&self, assembly: Rc<Assembly>) {
        self.loaded
            .borrow_mut()
            .insert(assembly.name.clone(), Some(assembly));
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        let file_name = format!("{}.json", name);
        self.search_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

impl AssemblyResolver for AssemblyCache {
    fn resolve(&self, name: &str) -> Result<Option<Rc<Assembly>>> {
        if let Some(hit) = self.loaded.borrow().get(name) {
            return Ok(hit.clone());
        }

        let assembly = match self.locate(name) {
            Some(path) => {
                tracing::debug!(assembly = name, path = %path.display(), "loading referenced assembly");
                Some(Rc::new(load(&path)?))
            }
            None => {
                tracing::debug!(assembly = name, "assembly not found in search directories");
                None
            }
        };

        self.loaded
            .borrow_mut()
            .insert(name.to_string(), assembly.clone());
        Ok(assembly)
    }
}
