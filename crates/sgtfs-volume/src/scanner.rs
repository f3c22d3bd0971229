//! Startup scan registering every exported file in the namespace tree.

use std::sync::Arc;
use tracing::{info, warn};

use sgtfs_meta::{NamespaceTree, VirtualPath};
use sgtfs_recipe::{RecipeEngine, ResourceLocator};

/// Counts from one export scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files registered
    pub files: u64,
    /// Directories walked
    pub directories: u64,
    /// Entries that could not be listed or registered
    pub errors: u64,
}

/// Walks every export depth-first through its source backend and adds each
/// file to `namespace`. Unreadable subtrees are logged and skipped.
pub fn scan_exports(engine: &RecipeEngine, namespace: &Arc<NamespaceTree>) -> ScanReport {
    let mut report = ScanReport::default();
    for (name, locator) in engine.exports().iter() {
        let root = match engine.exports().export_root(name) {
            Ok(root) => root,
            Err(e) => {
                warn!(export = name, error = %e, "bad export name");
                report.errors += 1;
                continue;
            }
        };
        let backend = match engine.sources().backend(locator) {
            Ok(b) => b,
            Err(e) => {
                warn!(export = name, error = %e, "no backend for export");
                report.errors += 1;
                continue;
            }
        };

        let mut stack: Vec<(VirtualPath, ResourceLocator)> = vec![(root, locator.clone())];
        while let Some((dir, resource)) = stack.pop() {
            report.directories += 1;
            let entries = match backend.list(&resource) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %dir, error = %e, "cannot list export directory");
                    report.errors += 1;
                    continue;
                }
            };
            for entry in entries {
                let child = match dir.join(&entry.name) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(path = %dir, name = %entry.name, error = %e, "skipping entry");
                        report.errors += 1;
                        continue;
                    }
                };
                let child_resource = resource.join([entry.name.as_str()]);
                if entry.is_dir {
                    stack.push((child, child_resource));
                } else if let Err(e) = namespace.add_entry(&child) {
                    warn!(path = %child, error = %e, "cannot register file");
                    report.errors += 1;
                } else {
                    report.files += 1;
                }
            }
        }
        info!(export = name, files = report.files, "export scanned");
    }
    report
}
