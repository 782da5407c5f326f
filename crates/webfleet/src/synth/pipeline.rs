//! Pipeline layer: artifact store, build project, deployment group and the
//! three-stage pipeline that ties them to the source repository
//!
//! Source output feeds the build; build output is what CodeDeploy rolls onto
//! the compute pool.

use super::buildspec::render_buildspec;
use super::compute::ComputeHandle;
use super::{StackBuilder, resource};
use crate::error::SynthError;
use serde_json::{Value, json};
use webfleet_common::{PipelineConfig, ResourceKind, SourceTrigger};
use webfleet_template::intrinsic::{get_att, managed_policy_arn, reference, secrets_manager, sub};
use webfleet_template::{PolicyDocument, Resource, Statement};

/// Name of the source action; the webhook targets it
pub const SOURCE_ACTION: &str = "GitHub_Source";
pub const BUILD_ACTION: &str = "CodeBuild";
pub const DEPLOY_ACTION: &str = "CodeDeploy";

/// Artifact produced by the source stage
pub const SOURCE_ARTIFACT: &str = "SourceOutput";
/// Artifact produced by the build stage and deployed
pub const BUILD_ARTIFACT: &str = "BuildOutput";

/// Stage names in execution order
pub const STAGES: [&str; 3] = ["Source", "Build", "Deploy"];

const BUCKET_ID: &str = "ArtifactsBucket";

#[derive(Debug, Clone)]
pub struct PipelineHandle {
    pub bucket_id: String,
    pub project_id: String,
    pub application_id: String,
    pub deployment_group_id: String,
    pub pipeline_id: String,
    pub webhook_id: Option<String>,
}

fn bucket_arn() -> Value {
    get_att(BUCKET_ID, "Arn")
}

fn bucket_objects() -> Value {
    sub(&format!("${{{BUCKET_ID}.Arn}}/*"))
}

fn inline_policy(name: &str, document: PolicyDocument) -> Value {
    json!({ "PolicyName": name, "PolicyDocument": document.to_value() })
}

fn artifact_bucket() -> Resource {
    resource(ResourceKind::S3Bucket)
        .property(
            "BucketEncryption",
            json!({
                "ServerSideEncryptionConfiguration": [{
                    "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                }]
            }),
        )
        .property(
            "PublicAccessBlockConfiguration",
            json!({
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true,
            }),
        )
        .retain()
}

fn stages(
    config: &PipelineConfig,
    project_id: &str,
    application_id: &str,
    deployment_group_id: &str,
) -> Value {
    let source = &config.source;
    let token = secrets_manager(&source.token_secret, None);
    json!([
        {
            "Name": STAGES[0],
            "Actions": [{
                "Name": SOURCE_ACTION,
                "ActionTypeId": {
                    "Category": "Source",
                    "Owner": "ThirdParty",
                    "Provider": "GitHub",
                    "Version": "1",
                },
                "Configuration": {
                    "Owner": source.owner,
                    "Repo": source.repo,
                    "Branch": source.branch,
                    "OAuthToken": token,
                    "PollForSourceChanges": source.trigger == SourceTrigger::Poll,
                },
                "OutputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                "RunOrder": 1,
            }],
        },
        {
            "Name": STAGES[1],
            "Actions": [{
                "Name": BUILD_ACTION,
                "ActionTypeId": {
                    "Category": "Build",
                    "Owner": "AWS",
                    "Provider": "CodeBuild",
                    "Version": "1",
                },
                "Configuration": { "ProjectName": reference(project_id) },
                "InputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                "OutputArtifacts": [{ "Name": BUILD_ARTIFACT }],
                "RunOrder": 1,
            }],
        },
        {
            "Name": STAGES[2],
            "Actions": [{
                "Name": DEPLOY_ACTION,
                "ActionTypeId": {
                    "Category": "Deploy",
                    "Owner": "AWS",
                    "Provider": "CodeDeploy",
                    "Version": "1",
                },
                "Configuration": {
                    "ApplicationName": reference(application_id),
                    "DeploymentGroupName": reference(deployment_group_id),
                },
                "InputArtifacts": [{ "Name": BUILD_ARTIFACT }],
                "RunOrder": 1,
            }],
        },
    ])
}

/// Add the pipeline layer
pub fn build_pipeline(
    builder: &mut StackBuilder,
    config: &PipelineConfig,
    compute: &ComputeHandle,
) -> Result<PipelineHandle, SynthError> {
    let bucket_id = builder.add(BUCKET_ID, artifact_bucket())?;

    // Instances pull revisions from the artifact store during deployments
    builder.add(
        "InstanceArtifactReadPolicy",
        resource(ResourceKind::IamPolicy)
            .property("PolicyName", "artifact-read")
            .property("Roles", json!([reference(&compute.identity.role_id)]))
            .property(
                "PolicyDocument",
                PolicyDocument::new(vec![
                    Statement::allow(["s3:GetObject*", "s3:GetBucket*", "s3:List*"])
                        .on_all(vec![bucket_arn(), bucket_objects()]),
                ])
                .to_value(),
            ),
    )?;

    // -- Build --------------------------------------------------------------
    let build_role_id = builder.add(
        "BuildProjectRole",
        resource(ResourceKind::IamRole)
            .property(
                "AssumeRolePolicyDocument",
                PolicyDocument::assume_role("codebuild.amazonaws.com").to_value(),
            )
            .property(
                "Policies",
                json!([inline_policy(
                    "build",
                    PolicyDocument::new(vec![
                        Statement::allow([
                            "logs:CreateLogGroup",
                            "logs:CreateLogStream",
                            "logs:PutLogEvents",
                        ])
                        .on(sub(
                            "arn:${AWS::Partition}:logs:${AWS::Region}:${AWS::AccountId}:log-group:/aws/codebuild/*"
                        )),
                        Statement::allow([
                            "s3:GetObject*",
                            "s3:GetBucket*",
                            "s3:List*",
                            "s3:PutObject",
                        ])
                        .on_all(vec![bucket_arn(), bucket_objects()]),
                    ]),
                )]),
            ),
    )?;

    let buildspec = render_buildspec(&config.build)?;
    let project_id = builder.add(
        "BuildProject",
        resource(ResourceKind::CodeBuildProject)
            .property("Artifacts", json!({ "Type": "CODEPIPELINE" }))
            .property(
                "Environment",
                json!({
                    "ComputeType": config.build.compute_type,
                    "Image": config.build.image,
                    "ImagePullCredentialsType": "CODEBUILD",
                    "PrivilegedMode": false,
                    "Type": "LINUX_CONTAINER",
                }),
            )
            .property("ServiceRole", get_att(&build_role_id, "Arn"))
            .property(
                "Source",
                json!({ "Type": "CODEPIPELINE", "BuildSpec": buildspec }),
            ),
    )?;

    // -- Deploy -------------------------------------------------------------
    let application_id = builder.add(
        "DeployApplication",
        resource(ResourceKind::CodeDeployApplication).property("ComputePlatform", "Server"),
    )?;

    let deploy_role_id = builder.add(
        "DeploymentGroupRole",
        resource(ResourceKind::IamRole)
            .property(
                "AssumeRolePolicyDocument",
                PolicyDocument::assume_role("codedeploy.amazonaws.com").to_value(),
            )
            .property(
                "ManagedPolicyArns",
                json!([managed_policy_arn("service-role/AWSCodeDeployRole")]),
            ),
    )?;

    let rollback = if config.deploy.auto_rollback {
        json!({ "Enabled": true, "Events": ["DEPLOYMENT_FAILURE"] })
    } else {
        json!({ "Enabled": false })
    };
    let deployment_group_id = builder.add(
        "DeploymentGroup",
        resource(ResourceKind::CodeDeployDeploymentGroup)
            .property("ApplicationName", reference(&application_id))
            .property("ServiceRoleArn", get_att(&deploy_role_id, "Arn"))
            .property("AutoScalingGroups", json!([reference(&compute.group_id)]))
            .property("DeploymentConfigName", config.deploy.deployment_config.as_str())
            .property("AutoRollbackConfiguration", rollback),
    )?;

    // -- Pipeline -----------------------------------------------------------
    let pipeline_role_id = builder.add(
        "PipelineRole",
        resource(ResourceKind::IamRole).property(
            "AssumeRolePolicyDocument",
            PolicyDocument::assume_role("codepipeline.amazonaws.com").to_value(),
        ),
    )?;

    let deployment_config = &config.deploy.deployment_config;
    let pipeline_policy_id = builder.add(
        "PipelineRolePolicy",
        resource(ResourceKind::IamPolicy)
            .property("PolicyName", "pipeline")
            .property("Roles", json!([reference(&pipeline_role_id)]))
            .property(
                "PolicyDocument",
                PolicyDocument::new(vec![
                    Statement::allow([
                        "s3:GetObject*",
                        "s3:GetBucket*",
                        "s3:List*",
                        "s3:PutObject",
                        "s3:DeleteObject*",
                    ])
                    .on_all(vec![bucket_arn(), bucket_objects()]),
                    Statement::allow([
                        "codebuild:BatchGetBuilds",
                        "codebuild:StartBuild",
                        "codebuild:StopBuild",
                    ])
                    .on(get_att(&project_id, "Arn")),
                    Statement::allow([
                        "codedeploy:CreateDeployment",
                        "codedeploy:GetApplication",
                        "codedeploy:GetApplicationRevision",
                        "codedeploy:GetDeployment",
                        "codedeploy:GetDeploymentConfig",
                        "codedeploy:RegisterApplicationRevision",
                    ])
                    .on_all(vec![
                        sub(&format!(
                            "arn:${{AWS::Partition}}:codedeploy:${{AWS::Region}}:${{AWS::AccountId}}:application:${{{application_id}}}"
                        )),
                        sub(&format!(
                            "arn:${{AWS::Partition}}:codedeploy:${{AWS::Region}}:${{AWS::AccountId}}:deploymentgroup:${{{application_id}}}/${{{deployment_group_id}}}"
                        )),
                        sub(&format!(
                            "arn:${{AWS::Partition}}:codedeploy:${{AWS::Region}}:${{AWS::AccountId}}:deploymentconfig:{deployment_config}"
                        )),
                    ]),
                ])
                .to_value(),
            ),
    )?;

    let pipeline_id = builder.add(
        "Pipeline",
        resource(ResourceKind::Pipeline)
            .property("RoleArn", get_att(&pipeline_role_id, "Arn"))
            .property(
                "ArtifactStore",
                json!({ "Type": "S3", "Location": reference(&bucket_id) }),
            )
            .property(
                "Stages",
                stages(config, &project_id, &application_id, &deployment_group_id),
            )
            .property("RestartExecutionOnUpdate", false)
            .depends_on(pipeline_policy_id.as_str())
            .depends_on(pipeline_role_id.as_str()),
    )?;

    let webhook_id = match config.source.trigger {
        SourceTrigger::Webhook => Some(builder.add(
            "PipelineWebhook",
            resource(ResourceKind::PipelineWebhook)
                .property("Authentication", "GITHUB_HMAC")
                .property(
                    "AuthenticationConfiguration",
                    json!({ "SecretToken": secrets_manager(&config.source.token_secret, None) }),
                )
                .property(
                    "Filters",
                    json!([{
                        "JsonPath": "$.ref",
                        "MatchEquals": "refs/heads/{Branch}",
                    }]),
                )
                .property("TargetAction", SOURCE_ACTION)
                .property("TargetPipeline", reference(&pipeline_id))
                .property("TargetPipelineVersion", 1)
                .property("RegisterWithThirdParty", true),
        )?),
        SourceTrigger::Poll | SourceTrigger::Manual => None,
    };

    Ok(PipelineHandle {
        bucket_id,
        project_id,
        application_id,
        deployment_group_id,
        pipeline_id,
        webhook_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::identity::IdentityHandle;
    use webfleet_common::Layer;
    use webfleet_template::DeletionPolicy;

    /// Pipeline built on top of stand-in compute resources
    fn build(config: &PipelineConfig) -> (StackBuilder, PipelineHandle) {
        let mut builder = StackBuilder::new("test");
        builder.enter(Layer::Compute);
        builder
            .add("InstanceRole", resource(ResourceKind::IamRole))
            .unwrap();
        builder
            .add("WebPool", resource(ResourceKind::AutoScalingGroup))
            .unwrap();
        let compute = ComputeHandle {
            identity: IdentityHandle {
                role_id: "InstanceRole".to_string(),
                profile_id: "InstanceProfile".to_string(),
            },
            launch_template_id: "WebLaunchTemplate".to_string(),
            group_id: "WebPool".to_string(),
            image_parameter_id: None,
            recipe_fingerprint: String::new(),
        };
        builder.enter(Layer::Pipeline);
        let handle = build_pipeline(&mut builder, config, &compute).unwrap();
        (builder, handle)
    }

    #[test]
    fn test_three_stages_in_order() {
        let (builder, handle) = build(&PipelineConfig::default());
        let pipeline = builder.template().resource(&handle.pipeline_id).unwrap();
        let stages = pipeline.get("Stages").unwrap().as_array().unwrap();
        let names: Vec<&str> = stages.iter().map(|s| s["Name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Source", "Build", "Deploy"]);

        assert_eq!(
            stages[0]["Actions"][0]["OutputArtifacts"],
            json!([{ "Name": "SourceOutput" }])
        );
        assert_eq!(
            stages[1]["Actions"][0]["InputArtifacts"],
            json!([{ "Name": "SourceOutput" }])
        );
        assert_eq!(
            stages[2]["Actions"][0]["InputArtifacts"],
            json!([{ "Name": "BuildOutput" }])
        );
    }

    #[test]
    fn test_source_token_is_dynamic_reference() {
        let (builder, handle) = build(&PipelineConfig::default());
        let pipeline = builder.template().resource(&handle.pipeline_id).unwrap();
        let source = &pipeline.get("Stages").unwrap()[0]["Actions"][0]["Configuration"];
        assert_eq!(
            source["OAuthToken"],
            "{{resolve:secretsmanager:github-token:SecretString:::}}"
        );
        assert_eq!(source["Branch"], "main");
        assert_eq!(source["PollForSourceChanges"], false);
    }

    #[test]
    fn test_deployment_group_targets_pool() {
        let (builder, handle) = build(&PipelineConfig::default());
        let group = builder
            .template()
            .resource(&handle.deployment_group_id)
            .unwrap();
        assert_eq!(
            group.get("AutoScalingGroups"),
            Some(&json!([{ "Ref": "WebPool" }]))
        );
        assert_eq!(
            group.get("DeploymentConfigName"),
            Some(&json!("CodeDeployDefault.OneAtATime"))
        );
        assert_eq!(
            group.get("AutoRollbackConfiguration"),
            Some(&json!({ "Enabled": true, "Events": ["DEPLOYMENT_FAILURE"] }))
        );
    }

    #[test]
    fn test_artifact_bucket_retained_and_private() {
        let (builder, handle) = build(&PipelineConfig::default());
        let bucket = builder.template().resource(&handle.bucket_id).unwrap();
        assert_eq!(bucket.deletion_policy, Some(DeletionPolicy::Retain));
        assert_eq!(
            bucket.get("PublicAccessBlockConfiguration").unwrap()["BlockPublicAcls"],
            true
        );
    }

    #[test]
    fn test_buildspec_embedded() {
        let (builder, handle) = build(&PipelineConfig::default());
        let project = builder.template().resource(&handle.project_id).unwrap();
        let text = project.get("Source").unwrap()["BuildSpec"].as_str().unwrap();
        let spec: Value = serde_json::from_str(text).unwrap();
        assert_eq!(spec["phases"]["build"]["commands"], json!(["npm run build"]));
    }

    #[test]
    fn test_webhook_follows_trigger() {
        let (builder, handle) = build(&PipelineConfig::default());
        let webhook_id = handle.webhook_id.unwrap();
        let webhook = builder.template().resource(&webhook_id).unwrap();
        assert_eq!(webhook.get("TargetAction"), Some(&json!(SOURCE_ACTION)));
        assert_eq!(webhook.get("TargetPipeline"), Some(&json!({ "Ref": "Pipeline" })));

        let mut config = PipelineConfig::default();
        config.source.trigger = SourceTrigger::Poll;
        let (builder, handle) = build(&config);
        assert!(handle.webhook_id.is_none());
        let pipeline = builder.template().resource(&handle.pipeline_id).unwrap();
        assert_eq!(
            pipeline.get("Stages").unwrap()[0]["Actions"][0]["Configuration"]
                ["PollForSourceChanges"],
            true
        );
    }

    #[test]
    fn test_references_resolve_and_stay_backward() {
        let (builder, _) = build(&PipelineConfig::default());
        builder.template().validate().unwrap();
        builder.check_layering().unwrap();
    }
}
