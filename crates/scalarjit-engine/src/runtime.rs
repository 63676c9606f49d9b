//! Runtime support module
//!
//! The numeric helper library (checked arithmetic, null propagation, casts)
//! is built from IR at build time and embedded in the engine. It is decoded
//! and verified once per process on first use and shared read-only by every
//! compilation afterwards.
//!
//! ```rust,ignore
//! let runtime = RuntimeModule::shared();
//! let add = runtime.get("add_int32").unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;
use scalarjit_ir::runtime::LIBRARY_FORMAT_VERSION;
use scalarjit_ir::{verify_function, IrFunction, RuntimeLibrary, VerifierErrors};

/// Serialized library produced by build.rs
static EMBEDDED_LIBRARY: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/runtime_functions.json"));

/// Process-wide decoded module
static SHARED: OnceLock<Arc<RuntimeModule>> = OnceLock::new();

/// Errors loading a runtime support module
#[derive(Debug, thiserror::Error)]
pub enum RuntimeLoadError {
    #[error("Failed to read runtime module {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed runtime module: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Runtime module format version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Runtime function @{name} defined more than once")]
    Duplicate { name: String },

    #[error("Runtime function @{name} failed verification:\n{errors}")]
    Verify { name: String, errors: VerifierErrors },
}

/// A decoded, verified helper library
#[derive(Debug)]
pub struct RuntimeModule {
    functions: FxHashMap<String, IrFunction>,
}

impl RuntimeModule {
    /// The embedded module, decoded on first use
    ///
    /// A corrupt embedded module is a build defect; loading it panics.
    pub fn shared() -> Arc<RuntimeModule> {
        SHARED
            .get_or_init(|| match Self::decode(EMBEDDED_LIBRARY) {
                Ok(module) => {
                    tracing::debug!(functions = module.len(), "Loaded runtime support module");
                    Arc::new(module)
                }
                Err(err) => {
                    tracing::error!(error = %err, "Embedded runtime support module is unusable");
                    panic!("embedded runtime support module is unusable: {}", err);
                }
            })
            .clone()
    }

    /// Load a serialized module from disk
    pub fn load(path: &Path) -> Result<Self, RuntimeLoadError> {
        let bytes = std::fs::read(path)
            .map_err(|source| RuntimeLoadError::Io { path: path.to_path_buf(), source })?;
        let module = Self::decode(&bytes)?;
        tracing::info!(path = %path.display(), functions = module.len(), "Loaded runtime support module");
        Ok(module)
    }

    /// Decode and verify a serialized module
    pub fn decode(bytes: &[u8]) -> Result<Self, RuntimeLoadError> {
        let library: RuntimeLibrary = serde_json::from_slice(bytes)?;
        Self::from_library(library)
    }

    pub fn from_library(library: RuntimeLibrary) -> Result<Self, RuntimeLoadError> {
        if library.version != LIBRARY_FORMAT_VERSION {
            return Err(RuntimeLoadError::Version {
                found: library.version,
                expected: LIBRARY_FORMAT_VERSION,
            });
        }

        let mut functions = FxHashMap::default();
        for func in library.functions {
            if let Err(errors) = verify_function(&func) {
                return Err(RuntimeLoadError::Verify { name: func.name, errors });
            }
            let name = func.name.clone();
            if functions.insert(name.clone(), func).is_some() {
                return Err(RuntimeLoadError::Duplicate { name });
            }
        }
        Ok(RuntimeModule { functions })
    }

    pub fn get(&self, name: &str) -> Option<&IrFunction> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalarjit_ir::{IrBuilder, IrType};

    #[test]
    fn test_shared_module_is_decoded_once() {
        let a = RuntimeModule::shared();
        let b = RuntimeModule::shared();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), scalarjit_ir::build_library().functions.len());
        assert!(a.get("add_int32").is_some());
        assert!(a.get("mod_fp64").is_none());
    }

    #[test]
    fn test_names_sorted() {
        let runtime = RuntimeModule::shared();
        let names = runtime.names();
        assert!(names.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(&path, serde_json::to_vec(&scalarjit_ir::build_library()).unwrap()).unwrap();
        let module = RuntimeModule::load(&path).unwrap();
        assert_eq!(module.len(), RuntimeModule::shared().len());
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeModule::load(Path::new("/nonexistent/runtime.json")).unwrap_err();
        assert!(matches!(err, RuntimeLoadError::Io { .. }));
    }

    #[test]
    fn test_rejects_bad_version() {
        let mut library = scalarjit_ir::build_library();
        library.version += 1;
        assert!(matches!(
            RuntimeModule::from_library(library),
            Err(RuntimeLoadError::Version { .. })
        ));
    }

    #[test]
    fn test_rejects_unverifiable_function() {
        let mut library = scalarjit_ir::build_library();
        let mut bad = IrFunction::new("bad", vec![], vec![IrType::I32]);
        let mut b = IrBuilder::new(&mut bad);
        let x = b.fconst(IrType::F64, 1.0);
        b.ret(vec![x]);
        library.functions.push(bad);

        match RuntimeModule::from_library(library) {
            Err(RuntimeLoadError::Verify { name, .. }) => assert_eq!(name, "bad"),
            other => panic!("expected verification failure, got {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut library = scalarjit_ir::build_library();
        let first = library.functions[0].clone();
        library.functions.push(first);
        assert!(matches!(
            RuntimeModule::from_library(library),
            Err(RuntimeLoadError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_malformed_bytes() {
        assert!(matches!(RuntimeModule::decode(b"not json"), Err(RuntimeLoadError::Parse(_))));
    }
}
