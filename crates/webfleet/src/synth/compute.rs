//! Compute layer: instance identity, launch template and auto-scaling group
//!
//! The group is created with a creation policy: CloudFormation waits until
//! `min_capacity` instances have run the bootstrap recipe and signalled, and
//! fails the stack if fewer than `min_success_percent` of them succeed within
//! the signal timeout.

use super::bootstrap::{render_recipe, render_user_data};
use super::identity::{IdentityHandle, build_identity};
use super::network::{NetworkHandle, SubnetTier};
use super::security::SecurityHandle;
use super::{StackBuilder, resource};
use crate::error::SynthError;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use webfleet_common::{ComputeConfig, MachineImage, ResourceKind, StackConfig};
use webfleet_template::intrinsic::{get_att, reference, sub};
use webfleet_template::{Parameter, iso8601_duration};

/// Logical ID of the auto-scaling group; the recipe signals against it
pub const POOL_ID: &str = "WebPool";

/// Parameter type that resolves an SSM path to an AMI ID at deploy time
pub const IMAGE_PARAMETER_TYPE: &str = "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>";

/// Processes suspended while a rolling update replaces instances
const SUSPENDED_DURING_UPDATE: &[&str] = &[
    "HealthCheck",
    "ReplaceUnhealthy",
    "AZRebalance",
    "AlarmNotification",
    "ScheduledActions",
];

#[derive(Debug, Clone)]
pub struct ComputeHandle {
    pub identity: IdentityHandle,
    pub launch_template_id: String,
    pub group_id: String,
    pub image_parameter_id: Option<String>,
    pub recipe_fingerprint: String,
}

fn check_capacity(config: &ComputeConfig) -> Result<(), SynthError> {
    let (min, max) = (config.min_capacity, config.max_capacity);
    let desired_ok = config
        .desired_capacity
        .is_none_or(|d| (min..=max).contains(&d));
    if min == 0 || min > max || !desired_ok {
        return Err(SynthError::Capacity {
            min,
            max,
            desired: config.desired_capacity,
        });
    }
    if let Some(rolling) = &config.rolling_update {
        if rolling.min_instances_in_service >= max {
            return Err(SynthError::RollingUpdate {
                min_in_service: rolling.min_instances_in_service,
                max,
            });
        }
    }
    Ok(())
}

fn select_tier<'a>(
    network: &'a NetworkHandle,
    requested: Option<&str>,
) -> Result<&'a SubnetTier, SynthError> {
    match requested {
        Some(name) => network
            .tier(name)
            .ok_or_else(|| SynthError::UnknownSubnetTier(name.to_string())),
        None => network
            .first_public()
            .or_else(|| network.tiers.first())
            .ok_or_else(|| SynthError::UnknownSubnetTier("public".to_string())),
    }
}

fn creation_policy(config: &ComputeConfig) -> Value {
    json!({
        "ResourceSignal": {
            "Count": config.min_capacity,
            "Timeout": iso8601_duration(Duration::from_secs(config.signal_timeout_secs)),
        },
        "AutoScalingCreationPolicy": {
            "MinSuccessfulInstancesPercent": config.min_success_percent,
        },
    })
}

fn update_policy(config: &ComputeConfig) -> Value {
    let mut policy = json!({
        "AutoScalingScheduledAction": {
            "IgnoreUnmodifiedGroupSizeProperties": true,
        },
    });
    if let Some(rolling) = &config.rolling_update {
        policy["AutoScalingRollingUpdate"] = json!({
            "MaxBatchSize": rolling.max_batch_size,
            "MinInstancesInService": rolling.min_instances_in_service,
            "MinSuccessfulInstancesPercent": config.min_success_percent,
            "PauseTime": iso8601_duration(Duration::from_secs(config.signal_timeout_secs)),
            "WaitOnResourceSignals": true,
            "SuspendProcesses": SUSPENDED_DURING_UPDATE,
        });
    }
    policy
}

/// Add the compute layer
pub fn build_compute(
    builder: &mut StackBuilder,
    stack: &StackConfig,
    network: &NetworkHandle,
    security: &SecurityHandle,
) -> Result<ComputeHandle, SynthError> {
    let config = &stack.compute;
    check_capacity(config)?;
    let tier = select_tier(network, config.subnet_tier.as_deref())?;

    let identity = build_identity(builder, &config.managed_policies)?;

    let (image_id, image_parameter_id) = match &config.image {
        MachineImage::SsmParameter { parameter } => {
            let id = builder.add_parameter(
                "WebPoolImageId",
                Parameter::new(IMAGE_PARAMETER_TYPE)
                    .with_default(parameter.as_str())
                    .with_description("SSM parameter holding the instance image ID"),
            )?;
            (reference(&id), Some(id))
        }
        MachineImage::Ami { id } => {
            if id.trim().is_empty() {
                return Err(SynthError::EmptyRecipeValue("image id"));
            }
            (Value::String(id.clone()), None)
        }
    };

    let recipe = render_recipe(&config.bootstrap.steps, stack)?;
    let user_data = render_user_data(POOL_ID, &recipe.fingerprint)?;
    debug!(
        fingerprint = %recipe.fingerprint,
        configs = recipe.config_names.len(),
        "Rendered bootstrap recipe"
    );

    let launch_template_id = builder.add(
        "WebLaunchTemplate",
        resource(ResourceKind::LaunchTemplate)
            .property(
                "LaunchTemplateData",
                json!({
                    "ImageId": image_id,
                    "InstanceType": config.instance_type,
                    "IamInstanceProfile": { "Arn": get_att(&identity.profile_id, "Arn") },
                    "SecurityGroupIds": [get_att(&security.group_id, "GroupId")],
                    "UserData": user_data,
                    "TagSpecifications": [{
                        "ResourceType": "instance",
                        "Tags": [{ "Key": "Name", "Value": sub("${AWS::StackName}/WebPool") }],
                    }],
                }),
            )
            .depends_on(identity.role_id.as_str()),
    )?;

    let mut group = resource(ResourceKind::AutoScalingGroup)
        .property("MinSize", config.min_capacity.to_string())
        .property("MaxSize", config.max_capacity.to_string())
        .property(
            "LaunchTemplate",
            json!({
                "LaunchTemplateId": reference(&launch_template_id),
                "Version": get_att(&launch_template_id, "LatestVersionNumber"),
            }),
        )
        .property(
            "VPCZoneIdentifier",
            Value::Array(tier.subnet_ids().map(reference).collect()),
        )
        .property(
            "Tags",
            json!([{
                "Key": "Name",
                "Value": sub("${AWS::StackName}/WebPool"),
                "PropagateAtLaunch": true,
            }]),
        )
        .metadata(recipe.metadata)
        .creation_policy(creation_policy(config))
        .update_policy(update_policy(config));
    if let Some(desired) = config.desired_capacity {
        group = group.property("DesiredCapacity", desired.to_string());
    }
    // Instances must reach the internet to fetch packages before signalling
    for route in tier.subnets.iter().filter_map(|s| s.default_route_id.as_deref()) {
        group = group.depends_on(route);
    }
    let group_id = builder.add(POOL_ID, group)?;

    Ok(ComputeHandle {
        identity,
        launch_template_id,
        group_id,
        image_parameter_id,
        recipe_fingerprint: recipe.fingerprint,
    })
}
