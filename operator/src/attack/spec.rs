use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{HostAlias, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Primary CRD describing a single vegeta load test.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "vegeta.io",
    version = "v1",
    kind = "Attack",
    plural = "attacks",
    shortname = "attack",
    status = "AttackStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AttackSpec {
    /// Number of pods running the attack in parallel.
    #[serde(default = "default_parallelism")]
    #[schemars(range(min = 1))]
    pub parallelism: i32,
    /// Targets in vegeta http or json format.
    /// More info: https://github.com/tsenart/vegeta#http-format
    pub scenario: String,
    /// Format of the report printed once the attack finishes.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub output: Option<OutputFormat>,
    /// Flags passed to `vegeta attack`.
    pub option: Option<VegetaOption>,
    /// Fragment of the pod template used by the job.
    pub template: Option<AttackTemplate>,
    /// Additional spec for the attack container.
    pub attack_container_spec: Option<AttackContainerSpec>,
    /// Image for the attack container, overrides the operator default.
    pub image: Option<String>,
    /// Pull policy for the image, overrides the operator default.
    pub image_pull_policy: Option<String>,
}

fn default_parallelism() -> i32 {
    1
}

/// Status of an attack.
///
/// The operator does not track the job once it has been created.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
pub struct AttackStatus {}

/// Report formats understood by `vegeta report -type`.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human readable summary.
    #[default]
    Text,
    /// Summary as a JSON document.
    Json,
}

impl OutputFormat {
    /// Value passed to `vegeta report -type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        }
    }
}

/// Target formats understood by `vegeta attack -format`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// Plain text targets.
    Http,
    /// JSON lines targets.
    Json,
}

impl TargetFormat {
    /// Value passed to `vegeta attack -format`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetFormat::Http => "http",
            TargetFormat::Json => "json",
        }
    }
}

/// Options of `vegeta attack`.
/// More info: https://github.com/tsenart/vegeta#usage-manual
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VegetaOption {
    /// Duration of the test, e.g. `30s`.
    #[schemars(regex(pattern = r"^\d+s$"))]
    pub duration: Option<String>,
    /// Max open idle connections per target host.
    #[schemars(range(min = 1))]
    pub connections: Option<u32>,
    /// Number of requests per second.
    #[schemars(range(min = 1))]
    pub rate: Option<u32>,
    /// Requests timeout, e.g. `30s`.
    #[schemars(regex(pattern = r"^\d+s$"))]
    pub timeout: Option<String>,
    /// Initial number of workers.
    #[schemars(range(min = 1))]
    pub workers: Option<u32>,
    /// Targets format.
    pub format: Option<TargetFormat>,
    /// Use persistent connections. Left to vegeta when unset.
    pub keepalive: Option<bool>,
}

/// Pod template fragment applied to the job pods.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttackTemplate {
    /// Metadata merged into the pod metadata.
    pub metadata: Option<TemplateMetadata>,
    /// Fields merged into the pod spec.
    pub spec: Option<TemplateSpec>,
}

/// Labels and annotations added to the job pods.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    /// Extra pod labels, the job selector label takes precedence.
    pub labels: Option<BTreeMap<String, String>>,
    /// Extra pod annotations.
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Pod spec fields an attack may customize.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    /// Entries injected into the pods hosts file.
    pub host_aliases: Option<Vec<HostAlias>>,
}

/// Additional spec for the attack container.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttackContainerSpec {
    /// Compute resources required by the container.
    pub resources: Option<ResourceRequirements>,
}

// Older manifests use an empty string to mean "use the default".
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<OutputFormat>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(None),
        Some("text") => Ok(Some(OutputFormat::Text)),
        Some("json") => Ok(Some(OutputFormat::Json)),
        Some(other) => Err(serde::de::Error::unknown_variant(other, &["text", "json"])),
    }
}
