//! Drives the load graph: satisfies each provided feature's dependencies
//! before invoking its load callback, detects and breaks cycles lazily as
//! they're discovered, and accumulates failure statistics.

use plugloader_feature::{FeatureBlock, FeatureDescriptor, FeatureKind};
use plugloader_module::{LibraryHandle, Module};
use plugloader_registry::Registry;

/// The three-flag status of a provided feature, collapsed into one enum
/// (the flag table in `spec.md` §3 is mutually exclusive by construction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureState {
    Unexamined,
    Loading,
    Loaded,
    Failed,
}

/// Hard (`DEPENDS`) dependencies block the owning feature if unmet; soft
/// (`SDEPEND`) dependencies never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hardness {
    Hard,
    Soft,
}

/// One `PROVIDE` instance bound to its owning module, with the
/// dependency suffix that followed it in the feature block.
pub struct ProvidedFeature {
    pub descriptor: FeatureDescriptor,
    pub context: String,
    pub dependencies: Vec<(FeatureDescriptor, Hardness)>,
    pub state: FeatureState,
}

/// Splits a feature block into its `PROVIDE` groups, attaching each
/// group's `REGISTER`/`CALLBACK` context and `DEPENDS`/`SDEPEND` suffix,
/// per the grammar in `spec.md` §3.
fn parse_feature_block(block: &FeatureBlock) -> Vec<ProvidedFeature> {
    let mut provided = Vec::new();
    let mut context = String::new();
    let mut i = 0;
    while i < block.len() {
        let descriptor = &block[i];
        match descriptor.kind {
            FeatureKind::Register | FeatureKind::Callback => {
                context = descriptor.capability.clone();
            }
            FeatureKind::Provide => {
                let mut dependencies = Vec::new();
                let mut j = i + 1;
                while j < block.len() && block[j].kind.is_dependency() {
                    let hardness = if block[j].kind == FeatureKind::Depends {
                        Hardness::Hard
                    } else {
                        Hardness::Soft
                    };
                    dependencies.push((block[j].clone(), hardness));
                    j += 1;
                }
                provided.push(ProvidedFeature {
                    descriptor: descriptor.clone(),
                    context: context.clone(),
                    dependencies,
                    state: FeatureState::Unexamined,
                });
                i = j;
                continue;
            }
            FeatureKind::Depends | FeatureKind::Sdepend => {
                // Orphaned dependency descriptor with no preceding PROVIDE;
                // the grammar in spec.md §3 doesn't define this, so it's
                // simply skipped rather than attached to nothing.
            }
        }
        i += 1;
    }
    provided
}

/// A module in the loader's module list, in insertion order.
pub struct ModuleEntry {
    pub name: String,
    pub critical: bool,
    /// Created via `add_static_features` rather than plugin-list
    /// construction; never purged regardless of its providers' state.
    pub synthetic: bool,
    /// Whether `module.features()` returned `Some` at construction time.
    /// A module without the features interface is also never purged
    /// (it is accepted but deprecated, per `spec.md` §6).
    pub has_features_interface: bool,
    pub module: Box<dyn Module>,
    pub library: Option<LibraryHandle>,
    pub provided: Vec<ProvidedFeature>,
}

impl ModuleEntry {
    fn has_loaded_provider(&self) -> bool {
        self.provided.iter().any(|p| p.state == FeatureState::Loaded)
    }
}

/// Failure accounting for one `load_features` pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub depends: usize,
    pub failed: usize,
    pub critical: usize,
}

type ProviderId = (usize, usize);

/// Owns the module list, the feature registry, and the activation stack,
/// and implements the resolution algorithm over them.
#[derive(Default)]
pub struct Resolver {
    modules: Vec<ModuleEntry>,
    registry: Registry,
    /// Chronological activation order (oldest first); the canonical
    /// front-to-back unload order is this list traversed in reverse.
    activation: Vec<ProviderId>,
    pub stats: Stats,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    pub fn module_by_name(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn contains_module(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name == name)
    }

    /// Registers a constructed module, parsing its feature block (if any)
    /// into provided features and indexing each `PROVIDE` in the
    /// registry. Returns the module's index in the module list.
    pub fn add_module(
        &mut self,
        name: impl Into<String>,
        critical: bool,
        synthetic: bool,
        module: Box<dyn Module>,
        library: Option<LibraryHandle>,
    ) -> usize {
        let block = module.features();
        let has_features_interface = block.is_some();
        let provided = block.map(|b| parse_feature_block(&b)).unwrap_or_default();

        let module_idx = self.modules.len();
        for (feature_idx, pf) in provided.iter().enumerate() {
            self.registry.put(pf.descriptor.clone(), (module_idx, feature_idx));
        }

        self.modules.push(ModuleEntry {
            name: name.into(),
            critical,
            synthetic,
            has_features_interface,
            module,
            library,
            provided,
        });
        module_idx
    }

    fn state_of(&self, id: ProviderId) -> FeatureState {
        self.modules[id.0].provided[id.1].state
    }

    fn set_state(&mut self, id: ProviderId, state: FeatureState) {
        self.modules[id.0].provided[id.1].state = state;
    }

    /// Entry point: resolves every module's provided features in module
    /// list order, feature emission order within each module.
    pub fn load_features(&mut self) {
        for module_idx in 0..self.modules.len() {
            for feature_idx in 0..self.modules[module_idx].provided.len() {
                self.load_provided((module_idx, feature_idx), 0);
            }
        }
    }

    fn load_provided(&mut self, id: ProviderId, level: usize) {
        match self.state_of(id) {
            FeatureState::Loaded | FeatureState::Failed => return,
            FeatureState::Loading => {
                log::trace!(
                    "cycle detected at '{}' (level {level}), deferring to already-loading ancestor",
                    self.modules[id.0].provided[id.1].descriptor.describe()
                );
                return;
            }
            FeatureState::Unexamined => {}
        }
        self.set_state(id, FeatureState::Loading);
        self.load_feature(id, level + 1);
    }

    fn record_failure(&mut self, id: ProviderId) {
        self.stats.depends += 1;
        self.stats.failed += 1;
        if self.modules[id.0].critical {
            self.stats.critical += 1;
        }
        self.set_state(id, FeatureState::Failed);
    }

    fn load_feature(&mut self, id: ProviderId, level: usize) {
        let dependencies = self.modules[id.0].provided[id.1].dependencies.clone();

        for (dep, hardness) in &dependencies {
            loop {
                let mut candidates: Vec<ProviderId> = self
                    .registry
                    .get_exact(dep)
                    .map(|providers| {
                        providers
                            .iter()
                            .filter(|(pid, _)| self.state_of(*pid) == FeatureState::Unexamined)
                            .map(|(pid, _)| *pid)
                            .collect()
                    })
                    .unwrap_or_default();

                if candidates.is_empty() {
                    candidates = self
                        .registry
                        .get_match(dep)
                        .filter(|(pid, _)| self.state_of(*pid) == FeatureState::Unexamined)
                        .map(|(pid, _)| *pid)
                        .collect();
                }

                if candidates.is_empty() {
                    break;
                }
                for candidate in candidates {
                    self.load_provided(candidate, level);
                }
            }

            let satisfied = self
                .registry
                .get_match(dep)
                .any(|(pid, _)| self.state_of(*pid) == FeatureState::Loaded);

            if !satisfied {
                if *hardness == Hardness::Soft {
                    log::trace!("soft dependency '{}' unmet, continuing", dep.describe());
                    continue;
                }
                log::warn!(
                    "'{}' has an unmet hard dependency on '{}'",
                    self.modules[id.0].provided[id.1].descriptor.describe(),
                    dep.describe()
                );
                self.record_failure(id);
                return;
            }
        }

        let context = self.modules[id.0].provided[id.1].context.clone();
        let descriptor = self.modules[id.0].provided[id.1].descriptor.clone();
        let accepted = self.modules[id.0].module.load_feature(&descriptor, &context);

        if accepted {
            self.set_state(id, FeatureState::Loaded);
            self.activation.push(id);
            log::trace!("'{}' loaded", descriptor.describe());
        } else {
            let critical = self.modules[id.0].critical;
            if critical {
                log::error!("critical module's feature '{}' failed to load", descriptor.describe());
            } else {
                log::warn!("feature '{}' failed to load", descriptor.describe());
            }
            self.record_failure(id);
        }
    }

    /// Removes module entries with no loaded provider, skipping synthetic
    /// (static-feature) entries and entries without a features interface,
    /// which are always preserved. Returns the purged modules' names.
    pub fn purge(&mut self) -> Vec<String> {
        let mut purged = Vec::new();
        let mut kept = Vec::with_capacity(self.modules.len());
        // Maps an old module index to its new one, or `None` if purged. A
        // purged module has no loaded provider, so it can't appear in the
        // activation stack; remapping is only needed for surviving entries.
        let mut old_to_new = vec![None; self.modules.len()];
        for (old_idx, entry) in self.modules.drain(..).enumerate() {
            let keep = entry.synthetic || !entry.has_features_interface || entry.has_loaded_provider();
            if keep {
                old_to_new[old_idx] = Some(kept.len());
                kept.push(entry);
            } else {
                purged.push(entry.name);
            }
        }
        self.modules = kept;

        self.activation = self
            .activation
            .iter()
            .filter_map(|(module_idx, feature_idx)| {
                old_to_new[*module_idx].map(|new_idx| (new_idx, *feature_idx))
            })
            .collect();

        let mut registry = Registry::new();
        for (module_idx, entry) in self.modules.iter().enumerate() {
            for (feature_idx, pf) in entry.provided.iter().enumerate() {
                registry.put(pf.descriptor.clone(), (module_idx, feature_idx));
            }
        }
        self.registry = registry;

        purged
    }

    /// Walks the activation stack front to back (most-recently-activated
    /// first), invoking each feature's unload callback, then destroys
    /// every module entry in reverse insertion order.
    pub fn unload(&mut self) {
        let order: Vec<ProviderId> = self.activation.iter().rev().copied().collect();
        for id in order {
            let context = self.modules[id.0].provided[id.1].context.clone();
            let descriptor = self.modules[id.0].provided[id.1].descriptor.clone();
            self.modules[id.0].module.unload_feature(&descriptor, &context);
        }
        self.activation.clear();
        self.registry = Registry::new();
        self.stats = Stats::default();

        // Drain then drop in reverse insertion order; `ModuleEntry`'s field
        // order (module before library) makes `Drop` destroy the module
        // object before its backing library handle.
        let reversed: Vec<ModuleEntry> = self.modules.drain(..).rev().collect();
        drop(reversed);
    }

    /// Invokes `reload` on every module whose name is in `names`, or on
    /// all modules if `names` is `None`. Returns the count that reported
    /// success.
    pub fn reload(&mut self, names: Option<&[String]>) -> usize {
        let mut count = 0;
        for entry in &mut self.modules {
            let selected = match names {
                None => true,
                Some(list) => list.iter().any(|n| n == &entry.name),
            };
            if selected && entry.module.reload() {
                count += 1;
            }
        }
        count
    }

    /// Loaded features grouped by module, in module-list order.
    pub fn enumerate(&self) -> Vec<(&str, Vec<&FeatureDescriptor>)> {
        self.modules
            .iter()
            .map(|entry| {
                let loaded = entry
                    .provided
                    .iter()
                    .filter(|p| p.state == FeatureState::Loaded)
                    .map(|p| &p.descriptor)
                    .collect();
                (entry.name.as_str(), loaded)
            })
            .collect()
    }

    pub fn has_feature(&self, query: &FeatureDescriptor) -> bool {
        self.modules
            .iter()
            .flat_map(|entry| entry.provided.iter())
            .any(|p| p.state == FeatureState::Loaded && p.descriptor.matches(query))
    }

    /// Names of modules that remain after purge, in module-list order,
    /// excluding synthetic static-feature modules unless they contributed
    /// a loaded feature (`spec.md` §9's documented display asymmetry).
    pub fn loaded_plugin_names(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|entry| !entry.synthetic || entry.has_loaded_provider())
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// The activation stack, front to back (most-recently-activated
    /// first) — the canonical unload order.
    pub fn activation_order(&self) -> Vec<ProviderId> {
        self.activation.iter().rev().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugloader_feature::{Discriminator, FeatureBlockBuilder};

    struct FixedModule {
        name: String,
        block: FeatureBlock,
    }

    impl Module for FixedModule {
        fn name(&self) -> &str {
            &self.name
        }
        fn features(&self) -> Option<FeatureBlock> {
            Some(self.block.clone())
        }
    }

    fn add(resolver: &mut Resolver, name: &str, block: FeatureBlock, critical: bool) {
        resolver.add_module(
            name,
            critical,
            false,
            Box::new(FixedModule { name: name.to_string(), block }),
            None,
        );
    }

    #[test]
    fn linear_chain_loads_in_dependency_order() {
        let mut r = Resolver::new();
        add(&mut r, "A", FeatureBlockBuilder::new().provide("X", Discriminator::Any).depends("Y", Discriminator::Any).build(), false);
        add(&mut r, "B", FeatureBlockBuilder::new().provide("Y", Discriminator::Any).depends("Z", Discriminator::Any).build(), false);
        add(&mut r, "C", FeatureBlockBuilder::new().provide("Z", Discriminator::Any).build(), false);

        r.load_features();

        assert_eq!(r.stats.failed, 0);
        assert!(r.has_feature(&FeatureDescriptor::provide("X", Discriminator::Any)));
        let order = r.activation_order();
        let names: Vec<&str> = order.iter().map(|id| r.modules()[id.0].provided[id.1].descriptor.capability.as_str()).collect();
        assert_eq!(names, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn reverse_declaration_yields_same_activation_order() {
        let mut r = Resolver::new();
        add(&mut r, "C", FeatureBlockBuilder::new().provide("Z", Discriminator::Any).build(), false);
        add(&mut r, "B", FeatureBlockBuilder::new().provide("Y", Discriminator::Any).depends("Z", Discriminator::Any).build(), false);
        add(&mut r, "A", FeatureBlockBuilder::new().provide("X", Discriminator::Any).depends("Y", Discriminator::Any).build(), false);

        r.load_features();

        let order = r.activation_order();
        let names: Vec<&str> = order.iter().map(|id| r.modules()[id.0].provided[id.1].descriptor.capability.as_str()).collect();
        assert_eq!(names, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn soft_only_cycle_loads_both_sides() {
        let mut r = Resolver::new();
        add(&mut r, "M", FeatureBlockBuilder::new().provide("P", Discriminator::Any).sdepend("Q", Discriminator::Any).build(), false);
        add(&mut r, "N", FeatureBlockBuilder::new().provide("Q", Discriminator::Any).sdepend("P", Discriminator::Any).build(), false);

        r.load_features();

        assert!(r.has_feature(&FeatureDescriptor::provide("P", Discriminator::Any)));
        assert!(r.has_feature(&FeatureDescriptor::provide("Q", Discriminator::Any)));
        assert_eq!(r.stats.failed, 0);
        assert_eq!(r.stats.depends, 0);
    }

    #[test]
    fn hard_cycle_fails_both_sides() {
        let mut r = Resolver::new();
        add(&mut r, "M", FeatureBlockBuilder::new().provide("P", Discriminator::Any).depends("Q", Discriminator::Any).build(), false);
        add(&mut r, "N", FeatureBlockBuilder::new().provide("Q", Discriminator::Any).depends("P", Discriminator::Any).build(), false);

        r.load_features();

        assert!(!r.has_feature(&FeatureDescriptor::provide("P", Discriminator::Any)));
        assert!(!r.has_feature(&FeatureDescriptor::provide("Q", Discriminator::Any)));
        assert_eq!(r.stats.failed, 2);
        assert_eq!(r.stats.depends, 2);
        assert_eq!(r.stats.critical, 0);
    }

    #[test]
    fn critical_module_failure_is_counted() {
        let mut r = Resolver::new();
        add(&mut r, "A", FeatureBlockBuilder::new().provide("a", Discriminator::Any).build(), false);
        add(&mut r, "B", FeatureBlockBuilder::new().provide("b", Discriminator::Any).depends("missing", Discriminator::Any).build(), true);

        r.load_features();

        assert!(r.has_feature(&FeatureDescriptor::provide("a", Discriminator::Any)));
        assert!(r.stats.critical >= 1);
    }

    #[test]
    fn fuzzy_vs_exact_prefers_exact_provider() {
        let mut r = Resolver::new();
        add(&mut r, "G", FeatureBlockBuilder::new().provide("db", Discriminator::Any).build(), false);
        add(&mut r, "S", FeatureBlockBuilder::new().provide("db", Discriminator::Exact("sqlite".into())).build(), false);
        add(
            &mut r,
            "U",
            FeatureBlockBuilder::new()
                .provide("consumer", Discriminator::Any)
                .depends("db", Discriminator::Exact("sqlite".into()))
                .build(),
            false,
        );

        r.load_features();

        assert!(r.has_feature(&FeatureDescriptor::provide("consumer", Discriminator::Any)));
        assert!(r.has_feature(&FeatureDescriptor::provide("db", Discriminator::Any)));
        assert_eq!(r.stats.failed, 0);
    }

    #[test]
    fn purge_removes_modules_with_no_loaded_provider() {
        let mut r = Resolver::new();
        add(&mut r, "dead", FeatureBlockBuilder::new().provide("x", Discriminator::Any).depends("missing", Discriminator::Any).build(), false);
        r.load_features();

        let purged = r.purge();
        assert_eq!(purged, vec!["dead".to_string()]);
        assert!(r.modules().is_empty());
    }

    #[test]
    fn synthetic_modules_survive_purge_unconditionally() {
        let mut r = Resolver::new();
        r.add_module(
            "static",
            false,
            true,
            Box::new(FixedModule {
                name: "static".to_string(),
                block: FeatureBlockBuilder::new().provide("s", Discriminator::Any).depends("missing", Discriminator::Any).build(),
            }),
            None,
        );
        r.load_features();
        let purged = r.purge();
        assert!(purged.is_empty());
        assert_eq!(r.modules().len(), 1);
    }

    #[test]
    fn unload_clears_all_state() {
        let mut r = Resolver::new();
        add(&mut r, "A", FeatureBlockBuilder::new().provide("x", Discriminator::Any).build(), false);
        r.load_features();
        assert!(r.has_feature(&FeatureDescriptor::provide("x", Discriminator::Any)));

        r.unload();

        assert!(r.modules().is_empty());
        assert!(!r.has_feature(&FeatureDescriptor::provide("x", Discriminator::Any)));
        assert_eq!(r.stats.failed, 0);
        assert!(r.activation_order().is_empty());
    }

    #[test]
    fn callback_returning_false_is_accounted_like_unmet_dependency() {
        struct Refusing;
        impl Module for Refusing {
            fn name(&self) -> &str {
                "refusing"
            }
            fn features(&self) -> Option<FeatureBlock> {
                Some(FeatureBlockBuilder::new().provide("x", Discriminator::Any).build())
            }
            fn load_feature(&mut self, _provide: &FeatureDescriptor, _context: &str) -> bool {
                false
            }
        }

        let mut r = Resolver::new();
        r.add_module("refusing", false, false, Box::new(Refusing), None);
        r.load_features();

        assert_eq!(r.stats.failed, 1);
        assert!(!r.has_feature(&FeatureDescriptor::provide("x", Discriminator::Any)));
    }
}
