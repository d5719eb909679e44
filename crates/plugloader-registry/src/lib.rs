//! Maps each declared feature descriptor to the providers that advertise
//! it, so the resolver can look up a dependency's candidates without
//! re-scanning every module's feature block.
//!
//! Providers are referenced by `(module_index, feature_index)` rather than
//! by owning pointer: the registry is a non-owning lookup link over state
//! that lives in the caller's module list.

use plugloader_feature::FeatureDescriptor;

/// A provider's position: the module that declared it and the index of
/// its `PROVIDE` within that module's feature block.
pub type ProviderId = (usize, usize);

struct Entry {
    key: FeatureDescriptor,
    providers: Vec<(ProviderId, FeatureDescriptor)>,
}

/// Registered features, keyed by `equals`. Two `put` calls whose
/// descriptors are `equals` coalesce into one entry with multiple
/// providers, per `spec.md` §4.3/§9.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `descriptor`'s key, reusing an existing
    /// entry if one has an `equals` key.
    pub fn put(&mut self, descriptor: FeatureDescriptor, provider: ProviderId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key.equals(&descriptor)) {
            entry.providers.push((provider, descriptor));
        } else {
            self.entries.push(Entry {
                key: descriptor.clone(),
                providers: vec![(provider, descriptor)],
            });
        }
    }

    /// The providers of the registered feature whose key `equals` `query`,
    /// or `None` if no such feature is registered.
    pub fn get_exact(&self, query: &FeatureDescriptor) -> Option<&[(ProviderId, FeatureDescriptor)]> {
        self.entries
            .iter()
            .find(|e| e.key.equals(query))
            .map(|e| e.providers.as_slice())
    }

    /// All providers across every registered feature whose key `matches`
    /// `query` (wildcard-aware, possibly several distinct registered
    /// features).
    pub fn get_match(&self, query: &FeatureDescriptor) -> impl Iterator<Item = &(ProviderId, FeatureDescriptor)> {
        self.entries
            .iter()
            .filter(move |e| e.key.matches(query))
            .flat_map(|e| e.providers.iter())
    }

    /// Removes `provider` from every registered feature it appears under.
    /// A registered feature whose provider list becomes empty is dropped
    /// entirely (invariant 3); if the removed provider's descriptor was
    /// the entry's key, the key is re-pointed to a remaining provider's
    /// descriptor (necessarily `equals` to the old key already).
    pub fn remove_provider(&mut self, provider: ProviderId) {
        self.entries.retain_mut(|entry| {
            let removed_was_key = entry
                .providers
                .iter()
                .any(|(id, descriptor)| *id == provider && descriptor.equals(&entry.key));
            entry.providers.retain(|(id, _)| *id != provider);
            if entry.providers.is_empty() {
                return false;
            }
            if removed_was_key {
                entry.key = entry.providers[0].1.clone();
            }
            true
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugloader_feature::Discriminator;

    fn provide(capability: &str) -> FeatureDescriptor {
        FeatureDescriptor::provide(capability, Discriminator::Any)
    }

    #[test]
    fn equal_keys_coalesce_into_one_entry() {
        let mut registry = Registry::new();
        registry.put(provide("db"), (0, 0));
        registry.put(provide("db"), (1, 0));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_exact(&provide("db")).unwrap().len(), 2);
    }

    #[test]
    fn distinct_keys_stay_separate() {
        let mut registry = Registry::new();
        registry.put(provide("db"), (0, 0));
        registry.put(provide("cache"), (1, 0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_match_is_wildcard_aware_get_exact_is_not() {
        let mut registry = Registry::new();
        registry.put(
            FeatureDescriptor::provide("db", Discriminator::Exact("sqlite".into())),
            (0, 0),
        );

        let wildcard = FeatureDescriptor::depends("db", Discriminator::Any);
        assert_eq!(registry.get_match(&wildcard).count(), 1);
        assert!(registry.get_exact(&wildcard).is_none());
    }

    #[test]
    fn removing_last_provider_drops_the_entry() {
        let mut registry = Registry::new();
        registry.put(provide("db"), (0, 0));
        registry.remove_provider((0, 0));
        assert!(registry.is_empty());
    }

    #[test]
    fn removing_key_provider_repoints_to_survivor() {
        let mut registry = Registry::new();
        registry.put(provide("db"), (0, 0));
        registry.put(provide("db"), (1, 0));

        registry.remove_provider((0, 0));

        assert_eq!(registry.len(), 1);
        let providers = registry.get_exact(&provide("db")).unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0, (1, 0));
    }
}
