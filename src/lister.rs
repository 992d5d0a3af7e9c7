//! Read-only views over the mirrored object store.

use std::{collections::BTreeMap, hash::Hash, sync::Arc};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube_core::Resource;
use kube_runtime::reflector;

/// Read access to every mirrored object of the type `K`.
///
/// Backed by the same store the controller keeps current from watch events;
/// no call here performs remote reads.
#[derive(Clone)]
pub struct Lister<K: Resource>
where
    K: Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    store: reflector::Store<K>,
    dyntype: K::DynamicType,
}

impl<K: Resource> Lister<K>
where
    K: Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    pub fn new(store: reflector::Store<K>) -> Self
    where
        K::DynamicType: Default,
    {
        Self::with(store, <_>::default())
    }

    pub fn with(store: reflector::Store<K>, dyntype: K::DynamicType) -> Self {
        Self { store, dyntype }
    }

    /// Looks up a cluster-scoped object by name.
    pub fn get(&self, name: &str) -> Option<Arc<K>> {
        self.store
            .get(&reflector::ObjectRef::new_with(name, self.dyntype.clone()))
    }

    /// All mirrored objects matching `selector`, in no particular order.
    pub fn list(&self, selector: &LabelSelector) -> Vec<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .filter(|object| selector_matches(selector, object.meta().labels.as_ref()))
            .collect()
    }

    /// A view of the same store restricted to one namespace.
    pub fn namespaced(&self, namespace: impl Into<String>) -> NamespacedLister<K> {
        NamespacedLister {
            lister: self.clone(),
            namespace: namespace.into(),
        }
    }
}

/// A [`Lister`] restricted to a single namespace.
#[derive(Clone)]
pub struct NamespacedLister<K: Resource>
where
    K: Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    lister: Lister<K>,
    namespace: String,
}

impl<K: Resource> NamespacedLister<K>
where
    K: Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    /// Looks up an object by name within this namespace.
    pub fn get(&self, name: &str) -> Option<Arc<K>> {
        let key = reflector::ObjectRef::new_with(name, self.lister.dyntype.clone())
            .within(&self.namespace);
        self.lister.store.get(&key)
    }

    /// All mirrored objects in this namespace matching `selector`.
    pub fn list(&self, selector: &LabelSelector) -> Vec<Arc<K>> {
        self.lister
            .store
            .state()
            .into_iter()
            .filter(|object| object.meta().namespace.as_deref() == Some(self.namespace.as_str()))
            .filter(|object| selector_matches(selector, object.meta().labels.as_ref()))
            .collect()
    }
}

/// Evaluates a label selector the way the apiserver does: every term must
/// hold, so an empty selector matches everything. A requirement with an
/// unrecognized operator matches nothing.
fn selector_matches(selector: &LabelSelector, labels: Option<&BTreeMap<String, String>>) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for requirement in expressions {
            let value = labels.get(&requirement.key);
            let listed = |value: &String| {
                requirement
                    .values
                    .as_ref()
                    .is_some_and(|values| values.contains(value))
            };
            let holds = match requirement.operator.as_str() {
                "In" => value.is_some_and(listed),
                "NotIn" => !value.is_some_and(listed),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !holds {
                return false;
            }
        }
    }

    true
}
