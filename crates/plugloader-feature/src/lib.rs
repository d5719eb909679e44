#![forbid(unsafe_code)]

//! Feature descriptors: the value type modules use to advertise what they
//! provide and what they depend on, plus the `equals`/`matches` predicates
//! the registry and resolver build on.

use std::hash::{Hash, Hasher};

/// Role a descriptor plays within a feature block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Opens a new provided-feature group.
    Provide,
    /// A hard dependency of the preceding `Provide`.
    Depends,
    /// A soft (best-effort) dependency of the preceding `Provide`.
    Sdepend,
    /// Sets the registration context for subsequent `Provide`s.
    Register,
    /// Interchangeable with `Register`.
    Callback,
}

impl FeatureKind {
    /// True for the two kinds that may follow a `Provide` as its dependency suffix.
    pub fn is_dependency(self) -> bool {
        matches!(self, FeatureKind::Depends | FeatureKind::Sdepend)
    }

    /// True for the two kinds that set the active registration context.
    pub fn is_registration(self) -> bool {
        matches!(self, FeatureKind::Register | FeatureKind::Callback)
    }
}

/// The optional discriminating parameter carried alongside a capability
/// identifier (e.g. an algorithm name, or a minimum version requirement).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Discriminator {
    /// Matches (but is not equal to) any other discriminator.
    Any,
    /// Must match another `Exact` with the same string.
    Exact(String),
    /// A concrete version a provider offers.
    Version(semver::Version),
    /// A dependency requirement: satisfied by any `Version` at least this high.
    AtLeast(semver::Version),
}

impl Discriminator {
    /// Fuzzy/wildcard acceptance. Symmetric, not transitive: an `Any` on
    /// either side is accepted, but that doesn't chain through a third value.
    fn fuzzy_matches(&self, other: &Discriminator) -> bool {
        use Discriminator::*;
        match (self, other) {
            (Any, _) | (_, Any) => true,
            (Exact(a), Exact(b)) => a == b,
            (Version(a), Version(b)) => a == b,
            (Version(v), AtLeast(min)) | (AtLeast(min), Version(v)) => v >= min,
            (AtLeast(a), AtLeast(b)) => a == b,
            _ => false,
        }
    }
}

/// A single feature descriptor: one entry of a module's feature block.
///
/// `kind` records the descriptor's role; `capability` and `discriminator`
/// are its payload. Identity (`equals`/`matches`) is defined over the
/// payload alone, since a `Depends` descriptor's payload is routinely
/// compared against a `Provide` descriptor's payload.
#[derive(Debug, Clone)]
pub struct FeatureDescriptor {
    pub kind: FeatureKind,
    pub capability: String,
    pub discriminator: Discriminator,
}

impl FeatureDescriptor {
    pub fn new(kind: FeatureKind, capability: impl Into<String>, discriminator: Discriminator) -> Self {
        Self {
            kind,
            capability: capability.into(),
            discriminator,
        }
    }

    pub fn provide(capability: impl Into<String>, discriminator: Discriminator) -> Self {
        Self::new(FeatureKind::Provide, capability, discriminator)
    }

    pub fn depends(capability: impl Into<String>, discriminator: Discriminator) -> Self {
        Self::new(FeatureKind::Depends, capability, discriminator)
    }

    pub fn sdepend(capability: impl Into<String>, discriminator: Discriminator) -> Self {
        Self::new(FeatureKind::Sdepend, capability, discriminator)
    }

    pub fn register(capability: impl Into<String>) -> Self {
        Self::new(FeatureKind::Register, capability, Discriminator::Any)
    }

    pub fn callback(capability: impl Into<String>) -> Self {
        Self::new(FeatureKind::Callback, capability, Discriminator::Any)
    }

    /// Both payloads are fully specified and identical. Implies `matches`.
    pub fn equals(&self, other: &FeatureDescriptor) -> bool {
        self == other
    }

    /// `self` satisfies `other`, including wildcard acceptance. Reflexive
    /// and symmetric, not transitive.
    pub fn matches(&self, other: &FeatureDescriptor) -> bool {
        self.capability == other.capability && self.discriminator.fuzzy_matches(&other.discriminator)
    }

    /// Human-readable form for diagnostics, e.g. `"cipher(aes)"`.
    pub fn describe(&self) -> String {
        match &self.discriminator {
            Discriminator::Any => self.capability.clone(),
            Discriminator::Exact(s) => format!("{}({s})", self.capability),
            Discriminator::Version(v) => format!("{}(={v})", self.capability),
            Discriminator::AtLeast(v) => format!("{}(>={v})", self.capability),
        }
    }
}

/// Identity is the payload only: `kind` does not participate, since the
/// same payload can appear tagged `Provide` on one side and `Depends` on
/// the other and still needs to compare equal for registry lookups.
impl PartialEq for FeatureDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.capability == other.capability && self.discriminator == other.discriminator
    }
}
impl Eq for FeatureDescriptor {}

impl Hash for FeatureDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.capability.hash(state);
        self.discriminator.hash(state);
    }
}

/// An ordered sequence of descriptors as emitted by one module: zero or
/// more REGISTER/CALLBACK entries, then PROVIDE groups each followed by
/// their DEPENDS/SDEPEND suffix.
pub type FeatureBlock = Vec<FeatureDescriptor>;

/// Fluent builder for a [`FeatureBlock`], mirroring the grammar in
/// `spec.md` §3: `register`/`callback` set the context for subsequent
/// `provide` groups, and `depends`/`sdepend` attach to the most recent
/// `provide`.
#[derive(Debug, Default)]
pub struct FeatureBlockBuilder {
    block: FeatureBlock,
}

impl FeatureBlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, capability: impl Into<String>) -> Self {
        self.block.push(FeatureDescriptor::register(capability));
        self
    }

    pub fn callback(mut self, capability: impl Into<String>) -> Self {
        self.block.push(FeatureDescriptor::callback(capability));
        self
    }

    pub fn provide(mut self, capability: impl Into<String>, discriminator: Discriminator) -> Self {
        self.block.push(FeatureDescriptor::provide(capability, discriminator));
        self
    }

    pub fn depends(mut self, capability: impl Into<String>, discriminator: Discriminator) -> Self {
        self.block.push(FeatureDescriptor::depends(capability, discriminator));
        self
    }

    pub fn sdepend(mut self, capability: impl Into<String>, discriminator: Discriminator) -> Self {
        self.block.push(FeatureDescriptor::sdepend(capability, discriminator));
        self
    }

    pub fn build(self) -> FeatureBlock {
        self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_requires_identical_payload() {
        let a = FeatureDescriptor::provide("cipher", Discriminator::Exact("aes".into()));
        let b = FeatureDescriptor::depends("cipher", Discriminator::Exact("aes".into()));
        assert!(a.equals(&b), "kind must not participate in equals");
        let c = FeatureDescriptor::provide("cipher", Discriminator::Exact("des".into()));
        assert!(!a.equals(&c));
    }

    #[test]
    fn equals_implies_matches() {
        let a = FeatureDescriptor::provide("db", Discriminator::Exact("sqlite".into()));
        let b = FeatureDescriptor::depends("db", Discriminator::Exact("sqlite".into()));
        assert!(a.equals(&b));
        assert!(a.matches(&b));
    }

    #[test]
    fn any_matches_but_does_not_equal() {
        let wildcard = FeatureDescriptor::provide("db", Discriminator::Any);
        let specific = FeatureDescriptor::depends("db", Discriminator::Exact("sqlite".into()));
        assert!(wildcard.matches(&specific));
        assert!(specific.matches(&wildcard));
        assert!(!wildcard.equals(&specific));
    }

    #[test]
    fn matches_is_symmetric_not_transitive() {
        let any = FeatureDescriptor::provide("x", Discriminator::Any);
        let v1 = FeatureDescriptor::provide("x", Discriminator::Version(semver::Version::new(1, 0, 0)));
        let v2 = FeatureDescriptor::provide("x", Discriminator::Version(semver::Version::new(2, 0, 0)));
        assert!(any.matches(&v1));
        assert!(v1.matches(&any));
        assert!(any.matches(&v2));
        // wildcard composes one step only: v1 and v2 don't match each other
        // just because both match `any`.
        assert!(!v1.matches(&v2));
    }

    #[test]
    fn at_least_requirement() {
        let needs = FeatureDescriptor::depends("kv", Discriminator::AtLeast(semver::Version::new(2, 0, 0)));
        let old = FeatureDescriptor::provide("kv", Discriminator::Version(semver::Version::new(1, 5, 0)));
        let new = FeatureDescriptor::provide("kv", Discriminator::Version(semver::Version::new(2, 1, 0)));
        assert!(!needs.matches(&old));
        assert!(needs.matches(&new));
    }

    #[test]
    fn different_capability_never_matches() {
        let a = FeatureDescriptor::provide("cipher", Discriminator::Any);
        let b = FeatureDescriptor::provide("hasher", Discriminator::Any);
        assert!(!a.matches(&b));
    }

    #[test]
    fn block_builder_grammar() {
        let block = FeatureBlockBuilder::new()
            .register("plugin_ctx")
            .provide("cipher", Discriminator::Exact("aes".into()))
            .depends("rng", Discriminator::Any)
            .provide("hasher", Discriminator::Exact("sha256".into()))
            .sdepend("logger", Discriminator::Any)
            .build();

        assert_eq!(block.len(), 5);
        assert_eq!(block[0].kind, FeatureKind::Register);
        assert_eq!(block[1].kind, FeatureKind::Provide);
        assert_eq!(block[2].kind, FeatureKind::Depends);
        assert_eq!(block[3].kind, FeatureKind::Provide);
        assert_eq!(block[4].kind, FeatureKind::Sdepend);
    }
}
