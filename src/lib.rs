//! Public API of the plugin feature loader: assembles a running system
//! from a configurable, user-ordered plugin list, resolves inter-feature
//! dependencies, and tears everything down in strict reverse order.

use std::path::PathBuf;
use std::sync::Arc;

pub use plugloader_feature::{Discriminator, FeatureBlock, FeatureBlockBuilder, FeatureDescriptor, FeatureKind};
pub use plugloader_module::{BuiltinConstructors, ConstructError, IntegrityChecker, Module, ModuleConstructor, StaticModule};
pub use plugloader_paths::SearchPath;
pub use plugloader_resolver::Stats;

/// Configuration passed to [`Loader::new`]: the leak-detection toggle, an
/// optional integrity collaborator, and the initial search-path list.
#[derive(Default)]
pub struct LoaderConfig {
    pub leak_detective: bool,
    pub integrity: Option<Arc<dyn IntegrityChecker>>,
    pub search_paths: SearchPath,
}

/// Owns the module list, feature registry, and activation stack; drives
/// construction, resolution, and teardown of a plugin list.
pub struct Loader {
    config: LoaderConfig,
    builtins: BuiltinConstructors,
    resolver: plugloader_resolver::Resolver,
    loaded_plugins: String,
}

impl Loader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            builtins: BuiltinConstructors::new(),
            resolver: plugloader_resolver::Resolver::new(),
            loaded_plugins: String::new(),
        }
    }

    /// Appends a directory to the end of the search-path order.
    pub fn add_path(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.config.search_paths.add_directory(dir);
        self
    }

    /// Expands `names` (whitespace-separated, `!`-suffixed for critical)
    /// under `basedir` and appends the results to the search path, per
    /// `SearchPath::add_plugin_dirs`.
    pub fn add_plugin_dirs(&mut self, basedir: &str, names: &str) -> &mut Self {
        self.config.search_paths.add_plugin_dirs(basedir, names);
        self
    }

    /// Registers `constructor` under `name` in the in-process builtin
    /// registry, the substitute for `RTLD_DEFAULT` symbol probing (see
    /// `DESIGN.md`). `load` consults this before falling back to a file on
    /// the search path.
    pub fn register_builtin(&mut self, name: impl Into<String>, constructor: ModuleConstructor) -> &mut Self {
        self.builtins.register(name, constructor);
        self
    }

    /// Wraps `features` in a synthetic static module entry and appends it
    /// to the module list. No load is triggered; call `load` (with `name`
    /// in the list, or an empty list) to resolve it.
    pub fn add_static_features(&mut self, name: impl Into<String>, features: FeatureBlock, critical: bool) {
        let name = name.into();
        let module = Box::new(StaticModule::new(name.clone(), features));
        self.resolver.add_module(name, critical, true, module, None);
    }

    /// Parses `list` (whitespace-separated plugin names, `!`-suffixed for
    /// critical), constructs each not-yet-present module, resolves the
    /// full feature graph, purges modules that contributed nothing, and
    /// rebuilds the loaded-plugins display string.
    ///
    /// Returns `true` iff no critical module failed construction and no
    /// critical module's feature failed during resolution.
    pub fn load(&mut self, list: &str) -> bool {
        let mut critical_construction_failure = false;

        for token in list.split_whitespace() {
            let (name, critical) = match token.strip_suffix('!') {
                Some(stripped) => (stripped, true),
                None => (token, false),
            };

            if self.resolver.contains_module(name) {
                continue;
            }

            let file = self.config.search_paths.resolve(name);
            let integrity = self.config.integrity.as_deref();
            match plugloader_module::construct_module(
                &self.builtins,
                name,
                file.as_deref(),
                integrity,
                self.config.leak_detective,
            ) {
                Ok((module, library)) => {
                    self.resolver.add_module(name, critical, false, module, Some(library));
                }
                Err(err) => {
                    if critical {
                        log::error!("critical plugin '{name}' failed to construct: {err}");
                        critical_construction_failure = true;
                        break;
                    }
                    log::warn!("plugin '{name}' failed to construct: {err}");
                }
            }
        }

        if critical_construction_failure {
            self.rebuild_loaded_plugins();
            return false;
        }

        self.resolver.load_features();

        if self.resolver.stats.critical > 0 {
            self.rebuild_loaded_plugins();
            return false;
        }

        for name in self.resolver.purge() {
            log::info!("purging plugin '{name}': it contributed no loaded feature");
        }

        self.rebuild_loaded_plugins();
        true
    }

    /// Invokes `reload` on every module named in `list` (or every module,
    /// if `list` is `None`). Returns the count that reported success.
    pub fn reload(&mut self, list: Option<&str>) -> usize {
        let names: Option<Vec<String>> = list.map(|l| {
            l.split_whitespace()
                .map(|token| token.trim_end_matches('!').to_string())
                .collect()
        });
        let count = self.resolver.reload(names.as_deref());
        self.rebuild_loaded_plugins();
        count
    }

    /// Tears down every loaded feature in reverse activation order, then
    /// destroys every module entry in reverse insertion order.
    pub fn unload(&mut self) {
        self.resolver.unload();
        self.loaded_plugins.clear();
    }

    /// Loaded features grouped by module, in module-list order.
    pub fn enumerate(&self) -> Vec<(&str, Vec<&FeatureDescriptor>)> {
        self.resolver.enumerate()
    }

    pub fn has_feature(&self, query: &FeatureDescriptor) -> bool {
        self.resolver.has_feature(query)
    }

    /// Cached space-separated loaded-plugin names; empty until `load` (or
    /// `reload`) has run at least once.
    pub fn loaded_plugins(&self) -> &str {
        &self.loaded_plugins
    }

    pub fn stats(&self) -> Stats {
        self.resolver.stats
    }

    /// Emits the loaded-plugin list and failure counters at `level`.
    pub fn status(&self, level: log::Level) {
        let plugins = if self.loaded_plugins.is_empty() {
            "(none)"
        } else {
            self.loaded_plugins.as_str()
        };
        log::log!(level, "loaded plugins: {plugins}");
        log::log!(
            level,
            "stats: depends={} failed={} critical={}",
            self.resolver.stats.depends,
            self.resolver.stats.failed,
            self.resolver.stats.critical
        );
    }

    fn rebuild_loaded_plugins(&mut self) {
        self.loaded_plugins = self.resolver.loaded_plugin_names().join(" ");
    }
}
