//! Schema resolution from custom resource definitions.

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, JSONSchemaProps,
};
use kube_client::api::ListParams;

use super::{ResolveError, SchemaKey, SchemaResolver};
use crate::client::ResourceClient;

/// Resolves schemas by listing definitions through a [`ResourceClient`].
///
/// Matching is by spec, not by object name: the definition whose group and
/// kind match the key is searched for a served version of the requested
/// name, and that version's structural schema is the answer.
pub struct CrdResolver<C> {
    client: C,
}

impl<C> CrdResolver<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> SchemaResolver for CrdResolver<C>
where
    C: ResourceClient<CustomResourceDefinition>,
{
    async fn resolve(&self, key: &SchemaKey) -> Result<JSONSchemaProps, ResolveError> {
        let definitions = self
            .client
            .list(&ListParams::default())
            .await
            .map_err(|err| ResolveError::List(err.to_string()))?;

        let definition = definitions
            .items
            .into_iter()
            .find(|definition| {
                definition.spec.group == key.group && definition.spec.names.kind == key.kind
            })
            .ok_or_else(|| ResolveError::UnknownKind {
                group: key.group.clone(),
                kind: key.kind.clone(),
            })?;

        let version = definition
            .spec
            .versions
            .into_iter()
            .find(|version| version.name == key.version && version.served)
            .ok_or_else(|| ResolveError::UnknownVersion {
                group: key.group.clone(),
                kind: key.kind.clone(),
                version: key.version.clone(),
            })?;

        version
            .schema
            .and_then(|validation| validation.open_api_v3_schema)
            .ok_or_else(|| ResolveError::MissingSchema {
                group: key.group.clone(),
                kind: key.kind.clone(),
                version: key.version.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
        CustomResourceDefinitionVersion, CustomResourceValidation,
    };
    use kube_client::api::{DeleteParams, Patch, PatchParams, PostParams, WatchParams};
    use kube_core::ErrorResponse;
    use serde_json::Value;

    use super::*;
    use crate::client::{ResourceList, WatchStream};

    struct FakeDefinitions {
        items: Vec<CustomResourceDefinition>,
        fail: bool,
    }

    #[async_trait]
    impl ResourceClient<CustomResourceDefinition> for FakeDefinitions {
        async fn create(
            &self,
            _pp: &PostParams,
            _object: &CustomResourceDefinition,
        ) -> kube_client::Result<CustomResourceDefinition> {
            unreachable!()
        }

        async fn update(
            &self,
            _pp: &PostParams,
            _object: &CustomResourceDefinition,
        ) -> kube_client::Result<CustomResourceDefinition> {
            unreachable!()
        }

        async fn get(&self, _name: &str) -> kube_client::Result<CustomResourceDefinition> {
            unreachable!()
        }

        async fn list(
            &self,
            _lp: &ListParams,
        ) -> kube_client::Result<ResourceList<CustomResourceDefinition>> {
            if self.fail {
                return Err(kube_client::Error::Api(ErrorResponse {
                    status: "Failure".to_owned(),
                    message: "definitions unavailable".to_owned(),
                    reason: "InternalError".to_owned(),
                    code: 500,
                }));
            }
            Ok(ResourceList {
                metadata: <_>::default(),
                items: self.items.clone(),
            })
        }

        async fn delete(&self, _name: &str, _dp: &DeleteParams) -> kube_client::Result<()> {
            unreachable!()
        }

        async fn delete_collection(
            &self,
            _dp: &DeleteParams,
            _lp: &ListParams,
        ) -> kube_client::Result<()> {
            unreachable!()
        }

        async fn watch(
            &self,
            _wp: &WatchParams,
            _version: &str,
        ) -> kube_client::Result<WatchStream<CustomResourceDefinition>> {
            unreachable!()
        }

        async fn patch(
            &self,
            _name: &str,
            _pp: &PatchParams,
            _patch: &Patch<Value>,
        ) -> kube_client::Result<CustomResourceDefinition> {
            unreachable!()
        }
    }

    fn version(name: &str, served: bool, with_schema: bool) -> CustomResourceDefinitionVersion {
        CustomResourceDefinitionVersion {
            name: name.to_owned(),
            served,
            storage: false,
            schema: with_schema.then(|| CustomResourceValidation {
                open_api_v3_schema: Some(JSONSchemaProps {
                    type_: Some("object".to_owned()),
                    ..<_>::default()
                }),
            }),
            ..<_>::default()
        }
    }

    fn definition(
        group: &str,
        kind: &str,
        versions: Vec<CustomResourceDefinitionVersion>,
    ) -> CustomResourceDefinition {
        CustomResourceDefinition {
            spec: CustomResourceDefinitionSpec {
                group: group.to_owned(),
                names: CustomResourceDefinitionNames {
                    kind: kind.to_owned(),
                    plural: format!("{}s", kind.to_lowercase()),
                    ..<_>::default()
                },
                scope: "Namespaced".to_owned(),
                versions,
                ..<_>::default()
            },
            ..<_>::default()
        }
    }

    #[tokio::test]
    async fn resolves_the_served_version_schema() {
        let resolver = CrdResolver::new(FakeDefinitions {
            items: vec![definition(
                "example.dev",
                "Doc",
                vec![version("v1", true, true), version("v2", true, true)],
            )],
            fail: false,
        });

        let schema = resolver
            .resolve(&SchemaKey::new("example.dev", "v1", "Doc"))
            .await
            .unwrap();
        assert_eq!(schema.type_.as_deref(), Some("object"));
    }

    #[tokio::test]
    async fn the_group_participates_in_matching() {
        let resolver = CrdResolver::new(FakeDefinitions {
            items: vec![definition(
                "other.dev",
                "Doc",
                vec![version("v1", true, true)],
            )],
            fail: false,
        });

        let err = resolver
            .resolve(&SchemaKey::new("example.dev", "v1", "Doc"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownKind {
                group: "example.dev".to_owned(),
                kind: "Doc".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn an_unserved_version_is_not_offered() {
        let resolver = CrdResolver::new(FakeDefinitions {
            items: vec![definition(
                "example.dev",
                "Doc",
                vec![version("v1", false, true)],
            )],
            fail: false,
        });

        let err = resolver
            .resolve(&SchemaKey::new("example.dev", "v1", "Doc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownVersion { version, .. } if version == "v1"));
    }

    #[tokio::test]
    async fn a_version_without_a_schema_is_refused() {
        let resolver = CrdResolver::new(FakeDefinitions {
            items: vec![definition(
                "example.dev",
                "Doc",
                vec![version("v1", true, false)],
            )],
            fail: false,
        });

        let err = resolver
            .resolve(&SchemaKey::new("example.dev", "v1", "Doc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingSchema { .. }));
    }

    #[tokio::test]
    async fn list_failures_surface_as_resolve_errors() {
        let resolver = CrdResolver::new(FakeDefinitions {
            items: Vec::new(),
            fail: true,
        });

        let err = resolver
            .resolve(&SchemaKey::new("example.dev", "v1", "Doc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::List(message) if message.contains("definitions unavailable")));
    }
}
