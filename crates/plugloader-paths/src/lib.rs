//! Resolves a plugin name to a candidate shared-object path across a
//! configured list of search directories.

use std::path::PathBuf;

/// An ordered list of directories to search for plugin shared objects,
/// first match wins.
#[derive(Debug, Default, Clone)]
pub struct SearchPath {
    directories: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single directory to the end of the search order.
    pub fn add_directory(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.directories.push(dir.into());
        self
    }

    /// For each whitespace-separated name in `names`, appends
    /// `<basedir>/<name-with-dashes-to-underscores>/.libs` to the search
    /// order, mirroring `plugin_loader_add_plugindirs(basedir, plugins)`. A
    /// trailing `!` (the critical-plugin marker) is stripped before the
    /// directory is built.
    pub fn add_plugin_dirs(&mut self, basedir: &str, names: &str) -> &mut Self {
        for token in names.split_whitespace() {
            let name = token.trim_end_matches('!').replace('-', "_");
            self.directories.push(PathBuf::from(format!("{basedir}/{name}/.libs")));
        }
        self
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// The file name a plugin named `name` must have, e.g.
    /// `libstrongswan-gmp.so`, `libstrongswan-gmp.dylib`, or
    /// `strongswan-gmp.dll`, following the host platform's own dynamic
    /// library naming convention for the prefix/extension while keeping the
    /// `strongswan-` infix the original's `"%s/libstrongswan-%s.so"`
    /// candidate format requires.
    pub fn file_name(name: &str) -> String {
        format!(
            "{}strongswan-{name}.{}",
            std::env::consts::DLL_PREFIX,
            std::env::consts::DLL_EXTENSION
        )
    }

    /// Searches each directory in order for `name`'s shared object,
    /// returning the first path that exists on disk.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let file_name = Self::file_name(name);
        for dir in &self.directories {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                log::trace!("resolved plugin '{name}' to '{}'", candidate.display());
                return Some(candidate);
            }
        }
        log::trace!(
            "plugin '{name}' not found in {} search director{}",
            self.directories.len(),
            if self.directories.len() == 1 { "y" } else { "ies" }
        );
        None
    }
}
