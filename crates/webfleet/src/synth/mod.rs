//! Template synthesis
//!
//! A stack is synthesized layer by layer: network, security, compute and
//! pipeline. Each layer module adds its resources through a [`StackBuilder`],
//! which records which layer owns each logical ID so the final template can
//! be checked for backward-only references.

pub mod bootstrap;
pub mod buildspec;
pub mod compute;
pub mod identity;
pub mod network;
pub mod pipeline;
pub mod security;
pub mod stack;

pub use stack::{SynthesizedStack, synthesize};

use crate::error::SynthError;
use std::collections::BTreeMap;
use webfleet_common::{Layer, ResourceKind};
use webfleet_template::{Parameter, Resource, Template};

/// Start a resource of the given kind
pub fn resource(kind: ResourceKind) -> Resource {
    Resource::new(kind.cfn_type())
}

/// Accumulates resources into a template, tagging each with its layer
#[derive(Debug)]
pub struct StackBuilder {
    template: Template,
    layers: BTreeMap<String, Layer>,
    current: Layer,
}

impl StackBuilder {
    pub fn new(description: impl Into<String>) -> Self {
        let mut template = Template::new();
        template.set_description(description);
        Self {
            template,
            layers: BTreeMap::new(),
            current: Layer::Network,
        }
    }

    /// Switch to the next layer. Layers are entered in order.
    pub fn enter(&mut self, layer: Layer) {
        debug_assert!(layer >= self.current, "layers are entered in order");
        self.current = layer;
    }

    /// Add a resource to the current layer and return its logical ID
    pub fn add(&mut self, logical_id: &str, resource: Resource) -> Result<String, SynthError> {
        self.template.add_resource(logical_id, resource)?;
        self.layers.insert(logical_id.to_string(), self.current);
        Ok(logical_id.to_string())
    }

    /// Add a template parameter. Parameters belong to no layer.
    pub fn add_parameter(
        &mut self,
        logical_id: &str,
        parameter: Parameter,
    ) -> Result<String, SynthError> {
        self.template.add_parameter(logical_id, parameter)?;
        Ok(logical_id.to_string())
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn template_mut(&mut self) -> &mut Template {
        &mut self.template
    }

    /// Check that no resource refers to a resource of a later layer
    pub fn check_layering(&self) -> Result<(), SynthError> {
        for (id, _) in self.template.resources() {
            let Some(&from_layer) = self.layers.get(id) else {
                continue;
            };
            for target in self.template.references_of(id) {
                if let Some(&target_layer) = self.layers.get(&target) {
                    if target_layer > from_layer {
                        return Err(SynthError::LayerViolation {
                            from: id.to_string(),
                            from_layer,
                            target,
                            target_layer,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Finish building, returning the template and the layer index
    pub fn finish(self) -> (Template, BTreeMap<String, Layer>) {
        (self.template, self.layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webfleet_template::intrinsic::reference;

    #[test]
    fn test_add_records_layer() {
        let mut builder = StackBuilder::new("test");
        builder.add("Vpc", resource(ResourceKind::Vpc)).unwrap();
        builder.enter(Layer::Security);
        builder
            .add(
                "Sg",
                resource(ResourceKind::SecurityGroup).property("VpcId", reference("Vpc")),
            )
            .unwrap();

        let (template, layers) = builder.finish();
        assert_eq!(layers["Vpc"], Layer::Network);
        assert_eq!(layers["Sg"], Layer::Security);
        assert_eq!(template.resources().count(), 2);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut builder = StackBuilder::new("test");
        builder.add("Vpc", resource(ResourceKind::Vpc)).unwrap();
        let err = builder.add("Vpc", resource(ResourceKind::Vpc)).unwrap_err();
        assert!(matches!(err, SynthError::Template(_)));
    }

    #[test]
    fn test_backward_reference_allowed() {
        let mut builder = StackBuilder::new("test");
        builder.add("Vpc", resource(ResourceKind::Vpc)).unwrap();
        builder.enter(Layer::Compute);
        builder
            .add(
                "Pool",
                resource(ResourceKind::AutoScalingGroup).property("VpcId", reference("Vpc")),
            )
            .unwrap();
        builder.check_layering().unwrap();
    }

    #[test]
    fn test_forward_reference_rejected() {
        let mut builder = StackBuilder::new("test");
        builder
            .add("Vpc", resource(ResourceKind::Vpc).depends_on("Pool"))
            .unwrap();
        builder.enter(Layer::Compute);
        builder
            .add("Pool", resource(ResourceKind::AutoScalingGroup))
            .unwrap();

        let err = builder.check_layering().unwrap_err();
        assert!(matches!(
            err,
            SynthError::LayerViolation {
                from_layer: Layer::Network,
                target_layer: Layer::Compute,
                ..
            }
        ));
    }
}
