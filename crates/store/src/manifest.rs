//! Kind-tagged object documents used to seed and dump a store.
//!
//! A manifest is the `apiVersion` / `kind` / `metadata` / `spec` / `status`
//! envelope. Files may hold several YAML documents, a JSON/YAML list, or a
//! single object.

use registrar_core::{Kind, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A kind-erased object document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl Manifest {
    /// Whether this document describes kind `K`.
    pub fn is_kind<K: Kind>(&self) -> bool {
        self.kind == K::KIND
    }

    /// Decode into a typed resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidObject`] if the kind does not match or the
    /// spec/status does not fit the kind's schema.
    pub fn into_resource<K: Kind>(self) -> Result<Resource<K>> {
        if !self.is_kind::<K>() {
            return Err(StoreError::invalid_object(format!(
                "expected kind '{}', found '{}'",
                K::KIND,
                self.kind
            )));
        }
        if self.metadata.name.is_empty() {
            return Err(StoreError::invalid_object("metadata.name is empty"));
        }

        let key = self.metadata.key();
        let spec: K::Spec = serde_json::from_value(self.spec)
            .map_err(|e| StoreError::invalid_object(format!("{key}: bad spec: {e}")))?;
        let status: K::Status = match self.status {
            Some(status) => serde_json::from_value(status)
                .map_err(|e| StoreError::invalid_object(format!("{key}: bad status: {e}")))?,
            None => K::Status::default(),
        };

        Ok(Resource {
            metadata: self.metadata,
            spec,
            status,
        })
    }

    /// Encode a typed resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidObject`] if spec or status fail to
    /// serialize.
    pub fn from_resource<K: Kind>(resource: &Resource<K>) -> Result<Self> {
        let spec = serde_json::to_value(&resource.spec)
            .map_err(|e| StoreError::invalid_object(e.to_string()))?;
        let status = serde_json::to_value(&resource.status)
            .map_err(|e| StoreError::invalid_object(e.to_string()))?;

        Ok(Self {
            api_version: Some(K::API_VERSION.to_string()),
            kind: K::KIND.to_string(),
            metadata: resource.metadata.clone(),
            spec,
            status: Some(status),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Many(Vec<Manifest>),
    One(Box<Manifest>),
}

/// Parse every manifest in a (possibly multi-document) YAML or JSON string.
///
/// Empty documents are skipped.
///
/// # Errors
///
/// Returns [`StoreError::InvalidObject`] naming the failing document.
pub fn parse_manifests(content: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let parsed = Option::<Document>::deserialize(document).map_err(|e| {
            StoreError::invalid_object(format!("document {}: {e}", index.saturating_add(1)))
        })?;
        match parsed {
            Some(Document::Many(many)) => manifests.extend(many),
            Some(Document::One(one)) => manifests.push(*one),
            None => {}
        }
    }

    Ok(manifests)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use registrar_core::ObjectKey;

    struct Lamp;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct LampSpec {
        watts: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct LampStatus {
        on: bool,
    }

    impl Kind for Lamp {
        const KIND: &'static str = "Lamp";
        const API_VERSION: &'static str = "test.registrar.dev/v1";
        type Spec = LampSpec;
        type Status = LampStatus;
    }

    const MULTI_DOC: &str = r"
---
apiVersion: test.registrar.dev/v1
kind: Lamp
metadata:
  namespace: home
  name: desk
spec:
  watts: 40
---
kind: Lamp
metadata:
  name: floor
spec:
  watts: 60
status:
  on: true
---
";

    #[test]
    fn test_parse_multi_document_yaml() {
        let manifests = parse_manifests(MULTI_DOC).unwrap();
        assert_eq!(manifests.len(), 2);

        let desk: Resource<Lamp> = manifests[0].clone().into_resource().unwrap();
        assert_eq!(desk.key(), ObjectKey::new("home", "desk"));
        assert_eq!(desk.spec.watts, 40);
        assert!(!desk.status.on);

        let floor: Resource<Lamp> = manifests[1].clone().into_resource().unwrap();
        assert_eq!(floor.key(), ObjectKey::in_default("floor"));
        assert!(floor.status.on);
    }

    #[test]
    fn test_parse_json_list() {
        let json = r#"[{"kind":"Lamp","metadata":{"name":"a"},"spec":{"watts":1}}]"#;
        let manifests = parse_manifests(json).unwrap();
        assert_eq!(manifests.len(), 1);
        assert!(manifests[0].is_kind::<Lamp>());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let manifest = Manifest {
            api_version: None,
            kind: "Bulb".into(),
            metadata: ObjectMeta::new(&ObjectKey::in_default("a")),
            spec: serde_json::json!({"watts": 1}),
            status: None,
        };
        assert!(manifest.into_resource::<Lamp>().is_err());
    }

    #[test]
    fn test_bad_spec_rejected() {
        let yaml = "kind: Lamp\nmetadata:\n  name: a\nspec:\n  watts: bright\n";
        let manifests = parse_manifests(yaml).unwrap();
        let err = manifests[0].clone().into_resource::<Lamp>().unwrap_err();
        assert!(err.to_string().contains("bad spec"));
    }

    #[test]
    fn test_from_resource_includes_kind_and_status() {
        let resource = Resource::<Lamp>::new(&ObjectKey::in_default("a"), LampSpec { watts: 9 });
        let manifest = Manifest::from_resource(&resource).unwrap();

        assert_eq!(manifest.kind, "Lamp");
        assert_eq!(manifest.api_version.as_deref(), Some(Lamp::API_VERSION));
        assert_eq!(manifest.status, Some(serde_json::json!({"on": false})));
    }
}
