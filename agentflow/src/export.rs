//! Deployment manifest export: a JSON document following a Kubernetes `Deployment` shape.
//! Not part of the control-plane contract — included because it is a stable external artefact
//! a caller can hand to a deploy pipeline without AgentFlow depending on any Kubernetes crate.
//!
//! One pure function building a `serde_json::Value` via the `json!` macro, tested with
//! field-path assertions rather than full-document snapshots.

use serde_json::{json, Value};

/// Inputs for a generated `Deployment` manifest. Mirrors the handful of fields a deployment needs:
/// image, container port, replica count, and resource requests/limits.
#[derive(Clone, Debug)]
pub struct DeploymentSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: u32,
    pub container_port: u16,
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub labels: Vec<(String, String)>,
}

impl DeploymentSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            image: image.into(),
            replicas: 1,
            container_port: 8080,
            cpu_request: "100m".to_string(),
            memory_request: "128Mi".to_string(),
            cpu_limit: "500m".to_string(),
            memory_limit: "512Mi".to_string(),
            labels: Vec::new(),
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.container_port = port;
        self
    }

    pub fn with_resources(mut self, cpu_request: impl Into<String>, memory_request: impl Into<String>, cpu_limit: impl Into<String>, memory_limit: impl Into<String>) -> Self {
        self.cpu_request = cpu_request.into();
        self.memory_request = memory_request.into();
        self.cpu_limit = cpu_limit.into();
        self.memory_limit = memory_limit.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

/// Renders a `DeploymentSpec` into a Kubernetes `apps/v1` `Deployment` JSON document.
pub fn to_deployment_manifest(spec: &DeploymentSpec) -> Value {
    let mut match_labels = json!({ "app": spec.name });
    if let Value::Object(ref mut map) = match_labels {
        for (key, value) in &spec.labels {
            map.insert(key.clone(), json!(value));
        }
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": match_labels,
        },
        "spec": {
            "replicas": spec.replicas,
            "selector": {
                "matchLabels": match_labels,
            },
            "template": {
                "metadata": {
                    "labels": match_labels,
                },
                "spec": {
                    "containers": [
                        {
                            "name": spec.name,
                            "image": spec.image,
                            "ports": [
                                { "containerPort": spec.container_port },
                            ],
                            "resources": {
                                "requests": {
                                    "cpu": spec.cpu_request,
                                    "memory": spec.memory_request,
                                },
                                "limits": {
                                    "cpu": spec.cpu_limit,
                                    "memory": spec.memory_limit,
                                },
                            },
                        },
                    ],
                },
            },
        },
    })
}
