//! Builds the objects an attack should own.
use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{
            Affinity, ConfigMap, ConfigMapVolumeSource, Container, PodAffinityTerm,
            PodAntiAffinity, PodSpec, PodTemplateSpec, Volume, VolumeMount,
            WeightedPodAffinityTerm,
        },
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::{api::ObjectMeta, Resource, ResourceExt};

use crate::{
    attack::spec::{Attack, OutputFormat, VegetaOption},
    labels::{managed_labels, pod_labels, selector_labels},
};

/// Suffix of the job name.
pub const JOB_SUFFIX: &str = "job";
/// Suffix of the config map holding the targets.
pub const SCENARIO_SUFFIX: &str = "scenario";
/// Suffix of the config map holding nsswitch.conf.
pub const NSSWITCH_SUFFIX: &str = "nsswitch";

const SCENARIO_KEY: &str = "scenario";
const SCENARIO_MOUNT_PATH: &str = "/var/lib/vegeta";
const NSSWITCH_KEY: &str = "nsswitch.conf";
const NSSWITCH_DATA: &str = "hosts: files dns";

/// Values used whenever an attack leaves a field unset.
#[derive(Clone, Debug, PartialEq)]
pub struct AttackDefaults {
    /// Image running vegeta.
    pub image: String,
    /// Pull policy for image.
    pub image_pull_policy: String,
    /// Pods run in parallel when the attack asks for none.
    pub parallelism: i32,
    /// Report format when the attack sets none.
    pub output: OutputFormat,
    /// Value of `-duration`.
    pub duration: String,
    /// Mount an nsswitch.conf that resolves hosts from files before dns.
    pub nsswitch: bool,
}

impl Default for AttackDefaults {
    fn default() -> Self {
        Self {
            image: "peterevans/vegeta:6.7".to_owned(),
            image_pull_policy: "IfNotPresent".to_owned(),
            parallelism: 1,
            output: OutputFormat::Text,
            duration: "10s".to_owned(),
            nsswitch: true,
        }
    }
}

/// Kinds of objects owned by an attack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    /// A batch/v1 Job.
    Job,
    /// A v1 ConfigMap.
    ConfigMap,
}

impl ChildKind {
    /// Every kind, in collection order.
    pub const ALL: [ChildKind; 2] = [ChildKind::Job, ChildKind::ConfigMap];

    /// Name used in logs and event notes.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::Job => "job",
            ChildKind::ConfigMap => "config map",
        }
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A manifest for an object owned by an attack.
#[derive(Clone, Debug, PartialEq)]
pub enum Child {
    /// Job running the attack.
    Job(Job),
    /// Config map mounted by the job.
    ConfigMap(ConfigMap),
}

impl Child {
    /// Kind of the child.
    pub fn kind(&self) -> ChildKind {
        match self {
            Child::Job(_) => ChildKind::Job,
            Child::ConfigMap(_) => ChildKind::ConfigMap,
        }
    }

    /// Name of the child.
    pub fn name(&self) -> String {
        match self {
            Child::Job(job) => job.name_any(),
            Child::ConfigMap(config_map) => config_map.name_any(),
        }
    }

    /// Metadata of the child.
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Child::Job(job) => job.meta(),
            Child::ConfigMap(config_map) => config_map.meta(),
        }
    }
}

/// Name of a child object, derived from the owning attack.
pub fn child_name(attack: &str, suffix: &str) -> String {
    format!("{attack}-{suffix}")
}

/// The set of objects that should exist for an attack.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    /// Job running the attack.
    pub job: Job,
    /// Config maps mounted by the job.
    pub config_maps: Vec<ConfigMap>,
}

impl DesiredState {
    /// Compute the desired children of an attack.
    ///
    /// The attack is not modified, defaults only apply to the produced manifests.
    pub fn build(attack: &Attack, defaults: &AttackDefaults) -> Self {
        let name = attack.name_any();
        let mut config_maps = vec![config_map(
            attack,
            &child_name(&name, SCENARIO_SUFFIX),
            BTreeMap::from_iter([(SCENARIO_KEY.to_owned(), attack.spec.scenario.clone())]),
        )];
        if defaults.nsswitch {
            config_maps.push(config_map(
                attack,
                &child_name(&name, NSSWITCH_SUFFIX),
                BTreeMap::from_iter([(NSSWITCH_KEY.to_owned(), NSSWITCH_DATA.to_owned())]),
            ));
        }
        Self {
            job: Job {
                metadata: child_metadata(attack, &child_name(&name, JOB_SUFFIX)),
                spec: Some(job_spec(attack, defaults)),
                ..Default::default()
            },
            config_maps,
        }
    }

    /// Names of the desired children of the given kind.
    pub fn names(&self, kind: ChildKind) -> Vec<String> {
        match kind {
            ChildKind::Job => vec![self.job.name_any()],
            ChildKind::ConfigMap => self.config_maps.iter().map(|cm| cm.name_any()).collect(),
        }
    }

    /// All children in creation order, config maps first so the job can mount them.
    pub fn children(&self) -> Vec<Child> {
        self.config_maps
            .iter()
            .cloned()
            .map(Child::ConfigMap)
            .chain(std::iter::once(Child::Job(self.job.clone())))
            .collect()
    }
}

fn child_metadata(attack: &Attack, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_owned()),
        namespace: attack.namespace(),
        owner_references: attack.controller_owner_ref(&()).map(|oref| vec![oref]),
        labels: managed_labels(),
        ..Default::default()
    }
}

fn config_map(attack: &Attack, name: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: child_metadata(attack, name),
        data: Some(data),
        ..Default::default()
    }
}

/// Render the flags of `vegeta attack`, in a fixed order.
///
/// Zero values are treated like unset values and produce no flag.
pub fn vegeta_options(option: Option<&VegetaOption>, defaults: &AttackDefaults) -> Vec<String> {
    let default_option = VegetaOption::default();
    let option = option.unwrap_or(&default_option);
    let non_empty = |value: &Option<String>| value.as_deref().filter(|v| !v.is_empty()).map(str::to_owned);
    let non_zero = |value: Option<u32>| value.filter(|v| *v != 0);

    let mut flags = vec![format!(
        "-duration {}",
        non_empty(&option.duration).unwrap_or_else(|| defaults.duration.clone())
    )];
    if let Some(rate) = non_zero(option.rate) {
        flags.push(format!("-rate {rate}"));
    }
    if let Some(connections) = non_zero(option.connections) {
        flags.push(format!("-connections {connections}"));
    }
    if let Some(timeout) = non_empty(&option.timeout) {
        flags.push(format!("-timeout {timeout}"));
    }
    if let Some(workers) = non_zero(option.workers) {
        flags.push(format!("-workers {workers}"));
    }
    if let Some(format) = option.format {
        flags.push(format!("-format {}", format.as_str()));
    }
    if let Some(keepalive) = option.keepalive {
        flags.push(format!("-keepalive={keepalive}"));
    }
    flags
}

/// Shell pipeline run by the attack container.
pub fn attack_command(attack: &Attack, defaults: &AttackDefaults) -> String {
    let flags = vegeta_options(attack.spec.option.as_ref(), defaults).join(" ");
    let output = attack.spec.output.unwrap_or(defaults.output);
    format!(
        "vegeta attack {flags} -targets {SCENARIO_MOUNT_PATH}/{SCENARIO_KEY} | vegeta report -type {}",
        output.as_str()
    )
}

fn job_spec(attack: &Attack, defaults: &AttackDefaults) -> JobSpec {
    let name = attack.name_any();
    let spec = &attack.spec;
    let app = child_name(&name, JOB_SUFFIX);
    let metadata = spec.template.as_ref().and_then(|t| t.metadata.as_ref());
    let parallelism = if spec.parallelism > 0 {
        spec.parallelism
    } else {
        defaults.parallelism
    };

    let mut volume_mounts = vec![VolumeMount {
        name: SCENARIO_SUFFIX.to_owned(),
        mount_path: SCENARIO_MOUNT_PATH.to_owned(),
        read_only: Some(true),
        ..Default::default()
    }];
    let mut volumes = vec![Volume {
        name: SCENARIO_SUFFIX.to_owned(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(child_name(&name, SCENARIO_SUFFIX)),
            ..Default::default()
        }),
        ..Default::default()
    }];
    if defaults.nsswitch {
        volume_mounts.push(VolumeMount {
            name: NSSWITCH_SUFFIX.to_owned(),
            mount_path: format!("/etc/{NSSWITCH_KEY}"),
            sub_path: Some(NSSWITCH_KEY.to_owned()),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(Volume {
            name: NSSWITCH_SUFFIX.to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(child_name(&name, NSSWITCH_SUFFIX)),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    JobSpec {
        parallelism: Some(parallelism),
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(pod_labels(&app, metadata.and_then(|m| m.labels.as_ref()))),
                annotations: metadata.and_then(|m| m.annotations.clone()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                affinity: Some(Affinity {
                    pod_anti_affinity: Some(PodAntiAffinity {
                        preferred_during_scheduling_ignored_during_execution: Some(vec![
                            WeightedPodAffinityTerm {
                                weight: 100,
                                pod_affinity_term: PodAffinityTerm {
                                    label_selector: Some(LabelSelector {
                                        match_labels: Some(selector_labels(&app)),
                                        ..Default::default()
                                    }),
                                    topology_key: "kubernetes.io/hostname".to_owned(),
                                    ..Default::default()
                                },
                            },
                        ]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                host_aliases: spec
                    .template
                    .as_ref()
                    .and_then(|t| t.spec.as_ref())
                    .and_then(|s| s.host_aliases.clone()),
                containers: vec![Container {
                    name: "vegeta".to_owned(),
                    image: Some(spec.image.clone().unwrap_or_else(|| defaults.image.clone())),
                    image_pull_policy: Some(
                        spec.image_pull_policy
                            .clone()
                            .unwrap_or_else(|| defaults.image_pull_policy.clone()),
                    ),
                    command: Some(vec!["sh".to_owned()]),
                    args: Some(vec!["-c".to_owned(), attack_command(attack, defaults)]),
                    resources: spec
                        .attack_container_spec
                        .as_ref()
                        .and_then(|c| c.resources.clone()),
                    volume_mounts: Some(volume_mounts),
                    ..Default::default()
                }],
                volumes: Some(volumes),
                restart_policy: Some("Never".to_owned()),
                ..Default::default()
            }),
        },
        ..Default::default()
    }
}
