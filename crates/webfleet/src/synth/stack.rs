//! Stack assembly

use super::StackBuilder;
use super::compute::build_compute;
use super::network::build_network;
use super::pipeline::build_pipeline;
use super::security::build_security;
use crate::error::SynthError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};
use webfleet_common::{Layer, StackConfig};
use webfleet_template::intrinsic::{get_att, reference};
use webfleet_template::{Output, Resource, Template, TemplateError};

/// A synthesized template plus the layer each resource belongs to
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    pub stack_name: String,
    pub template: Template,
    layers: BTreeMap<String, Layer>,
}

impl SynthesizedStack {
    pub fn layer_of(&self, logical_id: &str) -> Option<Layer> {
        self.layers.get(logical_id).copied()
    }

    /// Resources of one layer, in declaration order
    pub fn resources_in(&self, layer: Layer) -> Vec<(&str, &Resource)> {
        self.template
            .resources()
            .filter(|(id, _)| self.layer_of(id) == Some(layer))
            .collect()
    }

    /// One layer's resources as a JSON object, for comparing stacks
    pub fn layer_section(&self, layer: Layer) -> Result<Value, TemplateError> {
        let mut section = Map::new();
        for (id, resource) in self.resources_in(layer) {
            section.insert(id.to_string(), serde_json::to_value(resource)?);
        }
        Ok(Value::Object(section))
    }
}

fn default_description(config: &StackConfig) -> String {
    format!(
        "{}: web application fleet with build and deploy pipeline",
        config.stack_name
    )
}

/// Build the complete stack: network, security, compute, then pipeline
pub fn synthesize(config: &StackConfig) -> Result<SynthesizedStack, SynthError> {
    config.check()?;

    let description = config
        .description
        .clone()
        .unwrap_or_else(|| default_description(config));
    let mut builder = StackBuilder::new(description);

    builder.enter(Layer::Network);
    let network = build_network(&mut builder, &config.network)?;
    debug!(
        tiers = network.tiers.len(),
        nat_gateways = network.nat_gateway_ids.len(),
        "Network layer built"
    );

    builder.enter(Layer::Security);
    let security = build_security(&mut builder, &config.security, &network)?;

    builder.enter(Layer::Compute);
    let compute = build_compute(&mut builder, config, &network, &security)?;

    builder.enter(Layer::Pipeline);
    let pipeline = build_pipeline(&mut builder, &config.pipeline, &compute)?;

    let outputs = [
        ("VpcId", reference(&network.vpc_id), "VPC the fleet runs in"),
        (
            "SecurityGroupId",
            get_att(&security.group_id, "GroupId"),
            "Security group guarding the instances",
        ),
        (
            "AutoScalingGroupName",
            reference(&compute.group_id),
            "Auto-scaling group deployments target",
        ),
        (
            "PipelineName",
            reference(&pipeline.pipeline_id),
            "Build and deploy pipeline",
        ),
        (
            "ArtifactBucketName",
            reference(&pipeline.bucket_id),
            "Pipeline artifact store (retained on delete)",
        ),
    ];
    for (id, value, description) in outputs {
        builder
            .template_mut()
            .add_output(id, Output::new(value).with_description(description))?;
    }

    builder.template().validate()?;
    builder.check_layering()?;

    let (template, layers) = builder.finish();
    for layer in Layer::ALL {
        let count = layers.values().filter(|l| **l == layer).count();
        debug!(%layer, resources = count, "Layer synthesized");
    }
    info!(
        stack = %config.stack_name,
        resources = template.resources().count(),
        "Synthesized stack"
    );
    Ok(SynthesizedStack {
        stack_name: config.stack_name.clone(),
        template,
        layers,
    })
}
