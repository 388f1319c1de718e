//! Pod-template workloads that can receive model ids through their environment

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{EnvVar, ObjectReference, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

use crate::{
    ENV_MODEL_INSTANCE_ID, ENV_MODEL_STORE_ID, MODEL_ANNOTATION_PREFIX, MODEL_REF_KEY,
    MODEL_UPDATED_ANNOTATION,
};

/// Workload kinds watched by the injector
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkloadKind {
    /// `apps/v1 Deployment`
    Deployment,
    /// `apps/v1 StatefulSet`
    StatefulSet,
    /// `apps/v1 DaemonSet`
    DaemonSet,
}

impl WorkloadKind {
    /// Kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }
}

/// One of the supported workload objects
#[derive(Clone, Debug, PartialEq)]
pub enum Workload {
    /// A Deployment
    Deployment(Deployment),
    /// A StatefulSet
    StatefulSet(StatefulSet),
    /// A DaemonSet
    DaemonSet(DaemonSet),
}

impl Workload {
    /// Kind of the wrapped object
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Deployment(_) => WorkloadKind::Deployment,
            Workload::StatefulSet(_) => WorkloadKind::StatefulSet,
            Workload::DaemonSet(_) => WorkloadKind::DaemonSet,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Workload::Deployment(d) => &d.metadata,
            Workload::StatefulSet(s) => &s.metadata,
            Workload::DaemonSet(d) => &d.metadata,
        }
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Workload::Deployment(d) => &mut d.metadata,
            Workload::StatefulSet(s) => &mut s.metadata,
            Workload::DaemonSet(d) => &mut d.metadata,
        }
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        match self {
            Workload::Deployment(d) => d.spec.as_mut().map(|s| &mut s.template),
            Workload::StatefulSet(s) => s.spec.as_mut().map(|s| &mut s.template),
            Workload::DaemonSet(d) => d.spec.as_mut().map(|s| &mut s.template),
        }
    }

    /// Object name
    pub fn name(&self) -> String {
        self.metadata().name.clone().unwrap_or_default()
    }

    /// Object namespace
    pub fn namespace(&self) -> String {
        self.metadata().namespace.clone().unwrap_or_default()
    }

    /// Reference used when attaching events
    pub fn object_ref(&self) -> ObjectReference {
        match self {
            Workload::Deployment(d) => d.object_ref(&()),
            Workload::StatefulSet(s) => s.object_ref(&()),
            Workload::DaemonSet(d) => d.object_ref(&()),
        }
    }

    /// Whether the injection marker is already set
    pub fn is_injected(&self) -> bool {
        self.metadata()
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(MODEL_UPDATED_ANNOTATION))
    }

    /// Merge `env` into every container and set the injection marker
    ///
    /// Returns false without touching the object when the marker is already
    /// present.
    pub fn inject(&mut self, env: &[EnvVar], now: DateTime<Utc>) -> bool {
        if self.is_injected() {
            return false;
        }
        if let Some(pod) = self.pod_template_mut().and_then(|t| t.spec.as_mut()) {
            for container in &mut pod.containers {
                let existing = container.env.take().unwrap_or_default();
                container.env = Some(merge_env(&existing, env));
            }
        }
        self.metadata_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(
                MODEL_UPDATED_ANNOTATION.to_string(),
                now.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        true
    }
}

/// Annotations under the model prefix, keyed by the suffix after it
pub fn model_annotations(annotations: &BTreeMap<String, String>) -> BTreeMap<&str, &str> {
    annotations
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(MODEL_ANNOTATION_PREFIX)
                .map(|suffix| (suffix, v.as_str()))
        })
        .collect()
}

/// Name of the Model a workload asks for, if any
pub fn model_reference(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| model_annotations(a).get(MODEL_REF_KEY).copied())
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// The environment entries exposing a published model
pub fn injected_env(instance_id: &str, store_id: &str) -> Vec<EnvVar> {
    vec![
        EnvVar {
            name: ENV_MODEL_INSTANCE_ID.to_string(),
            value: Some(instance_id.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: ENV_MODEL_STORE_ID.to_string(),
            value: Some(store_id.to_string()),
            ..Default::default()
        },
    ]
}

/// Merge injected entries into a container's env
///
/// Entries the container declares win over injected ones with the same
/// name. Container entries keep their order, injected entries follow, and
/// each name appears once.
pub fn merge_env(existing: &[EnvVar], injected: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged: Vec<EnvVar> = Vec::with_capacity(existing.len() + injected.len());
    for var in existing.iter().chain(injected) {
        if !merged.iter().any(|m| m.name == var.name) {
            merged.push(var.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    fn deployment(annotations: &[(&str, &str)], containers: Vec<Container>) -> Workload {
        Workload::Deployment(Deployment {
            metadata: ObjectMeta {
                name: Some("web".into()),
                namespace: Some("apps".into()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn container(name: &str, env: Vec<EnvVar>) -> Container {
        Container {
            name: name.to_string(),
            env: if env.is_empty() { None } else { Some(env) },
            ..Default::default()
        }
    }

    fn containers_env(workload: &Workload) -> Vec<Vec<EnvVar>> {
        match workload {
            Workload::Deployment(d) => d
                .spec
                .as_ref()
                .unwrap()
                .template
                .spec
                .as_ref()
                .unwrap()
                .containers
                .iter()
                .map(|c| c.env.clone().unwrap_or_default())
                .collect(),
            _ => unreachable!(),
        }
    }

    /// Story: a container that pins OPENFGA_MODEL_STORE_ID itself keeps its
    /// value; only the missing variable is added, after the container's own.
    #[test]
    fn story_explicit_container_entries_win() {
        let merged = merge_env(
            &[env("LOG", "debug"), env(ENV_MODEL_STORE_ID, "pinned")],
            &injected_env("v1", "abc"),
        );
        assert_eq!(
            merged,
            vec![
                env("LOG", "debug"),
                env(ENV_MODEL_STORE_ID, "pinned"),
                env(ENV_MODEL_INSTANCE_ID, "v1"),
            ]
        );
    }

    #[test]
    fn merge_is_deterministic_and_idempotent() {
        let injected = injected_env("v1", "abc");
        let once = merge_env(&[env("A", "1")], &injected);
        let twice = merge_env(&once, &injected);
        assert_eq!(once, twice);
        assert_eq!(merge_env(&[env("A", "1")], &injected), once);
    }

    #[test]
    fn duplicate_names_collapse_to_first() {
        let merged = merge_env(&[env("A", "1"), env("A", "2")], &[]);
        assert_eq!(merged, vec![env("A", "1")]);
    }

    #[test]
    fn model_reference_reads_prefixed_annotation() {
        let workload = deployment(
            &[
                ("openfga.zeiss.com/model.ref", "m1"),
                ("openfga.zeiss.com/model.other", "x"),
                ("unrelated", "y"),
            ],
            vec![],
        );
        assert_eq!(model_reference(workload.metadata()), Some("m1"));

        let annotations = workload.metadata().annotations.clone().unwrap();
        let scoped = model_annotations(&annotations);
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped["other"], "x");
    }

    #[test]
    fn missing_or_blank_reference_is_none() {
        assert_eq!(model_reference(deployment(&[], vec![]).metadata()), None);
        assert_eq!(
            model_reference(deployment(&[("openfga.zeiss.com/model.ref", " ")], vec![]).metadata()),
            None
        );
        assert_eq!(model_reference(&ObjectMeta::default()), None);
    }

    /// Story: injection touches every container and stamps the marker, and a
    /// second pass over the stamped object changes nothing.
    #[test]
    fn story_inject_sets_env_and_marker_once() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut workload = deployment(
            &[("openfga.zeiss.com/model.ref", "m1")],
            vec![
                container("app", vec![env("A", "1")]),
                container("sidecar", vec![]),
            ],
        );

        assert!(workload.inject(&injected_env("v1", "abc"), now));
        assert!(workload.is_injected());
        assert_eq!(
            workload.metadata().annotations.as_ref().unwrap()[MODEL_UPDATED_ANNOTATION],
            "2024-05-01T12:00:00Z"
        );
        let envs = containers_env(&workload);
        assert_eq!(envs[0].len(), 3);
        assert_eq!(envs[1], injected_env("v1", "abc"));

        let snapshot = workload.clone();
        assert!(!workload.inject(&injected_env("v2", "abc"), now));
        assert_eq!(workload, snapshot);
    }

    #[test]
    fn object_ref_names_the_workload() {
        let workload = deployment(&[], vec![]);
        let reference = workload.object_ref();
        assert_eq!(reference.kind.as_deref(), Some("Deployment"));
        assert_eq!(reference.name.as_deref(), Some("web"));
        assert_eq!(reference.namespace.as_deref(), Some("apps"));
        assert_eq!(workload.kind(), WorkloadKind::Deployment);
    }
}
