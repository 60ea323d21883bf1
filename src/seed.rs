//! Loading manifests into the stores and dumping them back out.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use registrar_core::Kind;
use registrar_reconciler::kinds::{Guestbook, Student};
use registrar_store::{InMemoryStore, Manifest, parse_manifests};
use tracing::{info, warn};

/// One store per managed kind.
pub struct Stores {
    pub students: Arc<InMemoryStore<Student>>,
    pub guestbooks: Arc<InMemoryStore<Guestbook>>,
}

impl Stores {
    /// Empty stores.
    pub fn new() -> Self {
        Self {
            students: InMemoryStore::new_arc(),
            guestbooks: InMemoryStore::new_arc(),
        }
    }

    /// Apply every manifest in `path`. Documents of unknown kinds are skipped.
    ///
    /// Returns the number of objects applied.
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifests from {}", path.display()))?;
        let manifests = parse_manifests(&content)
            .with_context(|| format!("Failed to parse manifests in {}", path.display()))?;

        let mut applied: usize = 0;
        for manifest in manifests {
            if self.apply(manifest).await? {
                applied = applied.saturating_add(1);
            }
        }

        info!(path = %path.display(), applied, "Manifests loaded");
        Ok(applied)
    }

    async fn apply(&self, manifest: Manifest) -> Result<bool> {
        let name = manifest.metadata.key();
        if manifest.is_kind::<Student>() {
            let resource = manifest.into_resource::<Student>()?;
            self.students
                .apply(resource)
                .await
                .with_context(|| format!("Failed to apply {} '{name}'", Student::KIND))?;
        } else if manifest.is_kind::<Guestbook>() {
            let resource = manifest.into_resource::<Guestbook>()?;
            self.guestbooks
                .apply(resource)
                .await
                .with_context(|| format!("Failed to apply {} '{name}'", Guestbook::KIND))?;
        } else {
            warn!(kind = %manifest.kind, key = %name, "Skipping manifest of unmanaged kind");
            return Ok(false);
        }
        Ok(true)
    }

    /// Every stored object as a manifest, students first.
    pub async fn dump(&self) -> Result<Vec<Manifest>> {
        let mut manifests = Vec::new();
        for resource in self.students.list().await {
            manifests.push(Manifest::from_resource(&resource)?);
        }
        for resource in self.guestbooks.list().await {
            manifests.push(Manifest::from_resource(&resource)?);
        }
        Ok(manifests)
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFESTS: &str = r"
apiVersion: school.io.gawor.com/v1
kind: Student
metadata:
  namespace: school
  name: alice
spec:
  name: Alice
  grades: [4, 5, 3]
---
kind: Guestbook
metadata:
  name: lobby
spec:
  foo: bar
---
kind: Widget
metadata:
  name: stray
spec: {}
";

    #[tokio::test]
    async fn test_load_applies_known_kinds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFESTS.as_bytes()).unwrap();
        let stores = Stores::new();

        let applied = stores.load(file.path()).await.unwrap();

        assert_eq!(applied, 2);
        assert_eq!(stores.students.len().await, 1);
        assert_eq!(stores.guestbooks.len().await, 1);

        let dumped = stores.dump().await.unwrap();
        let kinds: Vec<_> = dumped.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, ["Student", "Guestbook"]);
    }

    #[tokio::test]
    async fn test_load_reports_missing_file() {
        let stores = Stores::new();
        let err = stores
            .load(Path::new("/nonexistent/registrar.yaml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read manifests"));
    }
}
