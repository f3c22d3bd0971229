//! Export table: top-level directories of the local cluster mapped to source
//! locator prefixes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use sgtfs_meta::VirtualPath;

use crate::error::RecipeError;
use crate::source::ResourceLocator;

/// One configured export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Top-level directory name under the cluster-root
    pub name: String,
    /// Source locator prefix, e.g. `file:///srv/data`
    pub locator: String,
}

/// The exports of one cluster.
#[derive(Debug, Clone)]
pub struct ExportTable {
    cluster: String,
    exports: BTreeMap<String, ResourceLocator>,
}

impl ExportTable {
    /// Empty table for `cluster`.
    pub fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            exports: BTreeMap::new(),
        }
    }

    /// Builds a table from configuration entries.
    pub fn from_configs(cluster: &str, configs: &[ExportConfig]) -> Result<Self, RecipeError> {
        let mut table = Self::new(cluster);
        for c in configs {
            table.add(&c.name, ResourceLocator::parse(&c.locator)?)?;
        }
        Ok(table)
    }

    /// Registers an export. Names are single path segments and unique.
    pub fn add(&mut self, name: &str, locator: ResourceLocator) -> Result<(), RecipeError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(RecipeError::InvalidArgument(format!("invalid export name {name:?}")));
        }
        if self.exports.contains_key(name) {
            return Err(RecipeError::InvalidArgument(format!("export {name:?} defined twice")));
        }
        self.exports.insert(name.to_string(), locator);
        Ok(())
    }

    /// Owning cluster.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Iterates `(name, locator)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceLocator)> {
        self.exports.iter().map(|(n, l)| (n.as_str(), l))
    }

    /// Number of exports.
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// True when nothing is exported.
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Virtual path of an export's top-level directory.
    pub fn export_root(&self, name: &str) -> Result<VirtualPath, RecipeError> {
        Ok(VirtualPath::new(&self.cluster, &format!("/{name}"))?)
    }

    /// Maps a local virtual path to the raw resource behind it.
    pub fn resolve(&self, path: &VirtualPath) -> Result<ResourceLocator, RecipeError> {
        if path.cluster() != self.cluster {
            return Err(RecipeError::InvalidArgument(format!(
                "{path} is not in local cluster {}",
                self.cluster
            )));
        }
        let mut segments = path.segments();
        let name = segments
            .next()
            .ok_or_else(|| RecipeError::NotFound(path.to_string()))?;
        let base = self
            .exports
            .get(name)
            .ok_or_else(|| RecipeError::NotFound(path.to_string()))?;
        Ok(base.join(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ExportTable {
        ExportTable::from_configs(
            "east",
            &[
                ExportConfig { name: "data".into(), locator: "file:///srv/data".into() },
                ExportConfig { name: "scratch".into(), locator: "mem:///".into() },
            ],
        )
        .unwrap()
    }

    #[test]
    fn resolves_into_export() {
        let t = table();
        let p = VirtualPath::parse("sgt://east/data/a/b.bin").unwrap();
        assert_eq!(t.resolve(&p).unwrap().to_string(), "file:///srv/data/a/b.bin");
        let p = VirtualPath::parse("sgt://east/scratch/x").unwrap();
        assert_eq!(t.resolve(&p).unwrap().to_string(), "mem:///x");
        let root = VirtualPath::parse("/east/data").unwrap();
        assert_eq!(t.resolve(&root).unwrap().path(), "/srv/data");
    }

    #[test]
    fn unknown_export_is_not_found() {
        let t = table();
        let other = VirtualPath::parse("/east/other/x").unwrap();
        assert!(t.resolve(&other).unwrap_err().is_not_found());
        assert!(t.resolve(&VirtualPath::cluster_root("east").unwrap()).unwrap_err().is_not_found());
        assert!(matches!(
            t.resolve(&VirtualPath::parse("/west/data/x").unwrap()),
            Err(RecipeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rejects_bad_names() {
        let mut t = table();
        let loc = ResourceLocator::parse("file:///tmp").unwrap();
        assert!(t.add("a/b", loc.clone()).is_err());
        assert!(t.add("data", loc.clone()).is_err());
        assert!(t.add("", loc).is_err());
        assert_eq!(t.len(), 2);
        assert_eq!(t.export_root("data").unwrap().to_string(), "sgt://east/data");
    }
}
