//! Module sources: how a named plugin's feature list gets into the
//! process, either as a statically linked set or as a dynamically located
//! shared object with optional integrity verification.

use std::collections::HashMap;
use std::path::Path;

use plugloader_feature::{FeatureBlock, FeatureDescriptor};

/// A live module object: a name, an optional feature block, an optional
/// reload hook, and the load/unload callbacks for each of its provided
/// features. `destroy` is just `Drop` in Rust — there is no explicit
/// method for it.
pub trait Module: Send {
    fn name(&self) -> &str;

    /// `None` means the module does not implement the features interface
    /// at all (accepted but deprecated per `spec.md` §6).
    fn features(&self) -> Option<FeatureBlock>;

    /// Re-read configuration. Default `false` means "not supported",
    /// which `reload_by_name` treats as "did not reload".
    fn reload(&mut self) -> bool {
        false
    }

    /// Activates `provide` under the given registration context. `false`
    /// means this feature failed permanently; no retry is attempted.
    /// Default accepts unconditionally, which is correct for modules with
    /// no activation side effects.
    fn load_feature(&mut self, provide: &FeatureDescriptor, context: &str) -> bool {
        let _ = (provide, context);
        true
    }

    /// Deactivates a previously loaded `provide`. Default is a no-op.
    fn unload_feature(&mut self, provide: &FeatureDescriptor, context: &str) {
        let _ = (provide, context);
    }
}

/// Failure modes for constructing a module, mirroring `spec.md` §7.
#[derive(Debug, thiserror::Error)]
pub enum ConstructError {
    #[error("no constructor symbol and no fallback file")]
    NotFound,
    #[error("failed to construct module '{name}': {reason}")]
    Failed { name: String, reason: String },
}

impl ConstructError {
    fn failed(name: &str, reason: impl Into<String>) -> Self {
        ConstructError::Failed {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// External collaborator that verifies file and symbol hashes before a
/// dynamically-loaded module is trusted.
pub trait IntegrityChecker: Send + Sync {
    fn check_file(&self, name: &str, path: &Path) -> bool;
    fn check_segment(&self, name: &str) -> bool;
}

/// A statically linked module source: wraps a name and a feature block
/// that were already compiled into the host binary.
pub struct StaticModule {
    name: String,
    features: FeatureBlock,
}

impl StaticModule {
    pub fn new(name: impl Into<String>, features: FeatureBlock) -> Self {
        Self {
            name: name.into(),
            features,
        }
    }
}

impl Module for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> Option<FeatureBlock> {
        Some(self.features.clone())
    }
}

/// Builds the constructor symbol name for a plugin: `<name>_plugin_create`
/// with `-` translated to `_`, per `spec.md` §6.
pub fn constructor_symbol_name(name: &str) -> String {
    format!("{}_plugin_create", name.replace('-', "_"))
}

/// Signature every dynamically-loaded plugin must export under
/// [`constructor_symbol_name`]. Returns a thin pointer to a heap-allocated
/// `Box<dyn Module>` (itself a fat pointer) so the symbol's return type has
/// a stable, pointer-sized ABI; the host reclaims it with `Box::from_raw`.
///
/// # Safety
/// The caller must only invoke this on a symbol resolved from a shared
/// object built against the exact same `plugloader-module`/`rustc`
/// version as the host, since the boxed trait object's vtable layout is
/// not ABI-stable across toolchains.
pub type ModuleConstructor = unsafe extern "C" fn() -> *mut Box<dyn Module>;

/// Constructors for modules statically linked into the host binary.
///
/// Plays the role of strongSwan's `RTLD_DEFAULT` symbol lookup, which has
/// no portable equivalent in Rust: callers register their statically
/// linked plugins' constructors here instead of relying on a global
/// symbol table (see `DESIGN.md`).
#[derive(Default)]
pub struct BuiltinConstructors {
    constructors: HashMap<String, ModuleConstructor>,
}

impl BuiltinConstructors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: ModuleConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    fn get(&self, name: &str) -> Option<ModuleConstructor> {
        self.constructors.get(name).copied()
    }
}

/// Owns the `libloading::Library` handle for a dynamically-loaded module,
/// if any. Normally drops (and so unloads) the library; in leak-detection
/// mode it intentionally leaks the handle so symbolic debug info for the
/// plugin's code survives for stack traces.
pub struct LibraryHandle {
    library: Option<libloading::Library>,
    leak: bool,
}

impl LibraryHandle {
    fn owned(library: libloading::Library, leak: bool) -> Self {
        Self {
            library: Some(library),
            leak,
        }
    }

    fn none() -> Self {
        Self {
            library: None,
            leak: false,
        }
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            if self.leak {
                log::debug!("leaking library handle for leak-detection mode");
                std::mem::forget(library);
            }
            // else: `library` drops here, unloading the shared object.
        }
    }
}

/// Try the builtin constructor for `name` first (the `RTLD_DEFAULT`
/// analogue, unchecked by the integrity collaborator); if absent and
/// `file` is given, fall back to `libloading`, checking file integrity
/// before opening and segment integrity before invoking the constructor.
pub fn construct_module(
    builtins: &BuiltinConstructors,
    name: &str,
    file: Option<&Path>,
    integrity: Option<&dyn IntegrityChecker>,
    leak_detective: bool,
) -> Result<(Box<dyn Module>, LibraryHandle), ConstructError> {
    if let Some(constructor) = builtins.get(name) {
        // Safety: the builtin registry is only populated with constructors
        // for modules linked into this binary, so the ABI caveat on
        // `ModuleConstructor` is trivially satisfied.
        let raw = unsafe { constructor() };
        if raw.is_null() {
            return Err(ConstructError::failed(name, "builtin constructor returned null"));
        }
        let module = unsafe { *Box::from_raw(raw) };
        log::debug!("plugin '{name}': loaded successfully (builtin)");
        return Ok((module, LibraryHandle::none()));
    }

    let Some(file) = file else {
        return Err(ConstructError::NotFound);
    };

    if let Some(checker) = integrity {
        if !checker.check_file(name, file) {
            log::warn!("plugin '{name}': failed file integrity test of '{}'", file.display());
            return Err(ConstructError::failed(name, "file integrity check failed"));
        }
    }

    let library = unsafe { libloading::Library::new(file) }
        .map_err(|e| ConstructError::failed(name, format!("failed to open '{}': {e}", file.display())))?;

    if let Some(checker) = integrity {
        if !checker.check_segment(name) {
            log::warn!("plugin '{name}': failed segment integrity test");
            return Err(ConstructError::failed(name, "segment integrity check failed"));
        }
    }

    let symbol_name = constructor_symbol_name(name);
    let constructor: libloading::Symbol<ModuleConstructor> = unsafe { library.get(symbol_name.as_bytes()) }
        .map_err(|_| ConstructError::failed(name, format!("missing constructor symbol '{symbol_name}'")))?;

    // Safety: caller asserts the shared object matches our toolchain ABI
    // (see `ModuleConstructor`'s doc comment).
    let raw = unsafe { constructor() };
    if raw.is_null() {
        return Err(ConstructError::failed(name, format!("'{symbol_name}' returned null")));
    }
    let module = unsafe { *Box::from_raw(raw) };
    log::debug!("plugin '{name}': loaded successfully from '{}'", file.display());
    Ok((module, LibraryHandle::owned(library, leak_detective)))
}
