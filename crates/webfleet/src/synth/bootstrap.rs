//! First-boot recipe rendering
//!
//! The recipe is carried as `AWS::CloudFormation::Init` metadata on the
//! auto-scaling group and applied on each instance by `cfn-init`, after which
//! `cfn-signal` reports the exit status back to the stack.
//!
//! Within a single config, cfn-init runs packages, then files, then commands,
//! then services, regardless of how the keys are written. Packages install by
//! manager: rpm, then yum and apt, then rubygems, then python. Consecutive
//! steps are grouped so that no group holds a step cfn-init would apply
//! before an earlier one, and no group names the same file, package or
//! service twice. Otherwise a new config is started. Configs run in order via
//! the `default` config set.

use crate::error::SynthError;
use serde::Serialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use webfleet_common::{BootstrapStep, FileSource, PackageManager, StackConfig};
use webfleet_template::TemplateError;
use webfleet_template::intrinsic::{base64, sub};

/// Metadata key cfn-init reads
pub const INIT_METADATA_KEY: &str = "AWS::CloudFormation::Init";

/// Config set the user data asks cfn-init to run
pub const CONFIG_SET: &str = "default";

/// Hex characters of the metadata digest embedded in user data
const FINGERPRINT_LEN: usize = 16;

/// Order in which cfn-init applies the sections of one config
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Packages,
    Files,
    Commands,
    Services,
}

fn phase(step: &BootstrapStep) -> Phase {
    match step {
        BootstrapStep::Package { .. } => Phase::Packages,
        BootstrapStep::File { .. } => Phase::Files,
        BootstrapStep::Command { .. } => Phase::Commands,
        BootstrapStep::Service { .. } => Phase::Services,
    }
}

/// Position among the package managers of one config
fn install_rank(manager: PackageManager) -> u8 {
    match manager {
        PackageManager::Rpm => 0,
        PackageManager::Yum | PackageManager::Apt => 1,
        PackageManager::Rubygems => 2,
        PackageManager::Python => 3,
    }
}

/// When cfn-init applies a step relative to others in the same config
fn apply_order(step: &BootstrapStep) -> (Phase, u8) {
    match step {
        BootstrapStep::Package { manager, .. } => (Phase::Packages, install_rank(*manager)),
        other => (phase(other), 0),
    }
}

/// Map entry a step renders to; commands get a unique key each
fn entry_key(step: &BootstrapStep) -> Option<(&'static str, &str)> {
    match step {
        BootstrapStep::Package { manager, name, .. } => Some((manager.as_str(), name)),
        BootstrapStep::File { path, .. } => Some(("files", path)),
        BootstrapStep::Service { name, .. } => Some(("sysvinit", name)),
        BootstrapStep::Command { .. } => None,
    }
}

/// Rendered recipe: init metadata and its digest
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub metadata: Value,
    pub fingerprint: String,
    pub config_names: Vec<String>,
}

/// Validate that a value is safe for shell interpolation.
///
/// Rejects characters that could break double-quoted bash strings
/// or enable injection (`"`, `\`, `` ` ``, `$`, newlines).
pub fn validate_shell_input(value: &str, field_name: &str) -> Result<(), SynthError> {
    const FORBIDDEN: &[char] = &['"', '\\', '`', '$', '\n', '\r'];
    if let Some(bad) = value.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(SynthError::UnsafeShellValue {
            field: field_name.to_string(),
            ch: bad,
        });
    }
    if value.is_empty() {
        return Err(SynthError::EmptyRecipeValue("shell value"));
    }
    Ok(())
}

/// Package, service and path names: shell-safe and without whitespace
fn validate_name(value: &str, field_name: &str) -> Result<(), SynthError> {
    validate_shell_input(value, field_name)?;
    if let Some(bad) = value.chars().find(|c| c.is_whitespace()) {
        return Err(SynthError::UnsafeShellValue {
            field: field_name.to_string(),
            ch: bad,
        });
    }
    Ok(())
}

/// Split steps into runs that cfn-init will apply in declared order
pub fn group_steps(steps: &[BootstrapStep]) -> Vec<Vec<(usize, &BootstrapStep)>> {
    let mut groups: Vec<Vec<(usize, &BootstrapStep)>> = Vec::new();
    let mut entries: BTreeSet<(&str, &str)> = BTreeSet::new();
    let mut last = (Phase::Packages, 0);
    for (index, step) in steps.iter().enumerate() {
        let order = apply_order(step);
        let key = entry_key(step);
        let fits = order >= last && key.is_none_or(|k| !entries.contains(&k));
        match groups.last_mut() {
            Some(group) if fits => group.push((index, step)),
            _ => {
                entries.clear();
                groups.push(vec![(index, step)]);
            }
        }
        entries.extend(key);
        last = order;
    }
    groups
}

fn check_steps(steps: &[BootstrapStep]) -> Result<(), SynthError> {
    let services: BTreeSet<&str> = steps
        .iter()
        .filter_map(|s| match s {
            BootstrapStep::Service { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();

    for step in steps {
        match step {
            BootstrapStep::Package { name, versions, .. } => {
                validate_name(name, "package name")?;
                for version in versions {
                    validate_name(version, "package version")?;
                }
            }
            BootstrapStep::Command { command, .. } => {
                if command.trim().is_empty() {
                    return Err(SynthError::EmptyRecipeValue("command"));
                }
            }
            BootstrapStep::File {
                path,
                owner,
                group,
                restarts,
                ..
            } => {
                validate_name(path, "file path")?;
                if !path.starts_with('/') {
                    return Err(SynthError::RelativeFilePath(path.clone()));
                }
                validate_name(owner, "file owner")?;
                validate_name(group, "file group")?;
                for service in restarts {
                    if !services.contains(service.as_str()) {
                        return Err(SynthError::UnknownRestartService {
                            file: path.clone(),
                            service: service.clone(),
                        });
                    }
                }
            }
            BootstrapStep::Service { name, .. } => validate_name(name, "service name")?,
        }
    }
    Ok(())
}

fn file_content(source: &FileSource, config: &StackConfig) -> Result<String, SynthError> {
    match source {
        FileSource::Inline(text) => Ok(text.clone()),
        FileSource::Local(path) => {
            let resolved = config.resolve_local(path);
            fs::read_to_string(&resolved).map_err(|source| SynthError::Asset {
                path: resolved,
                source,
            })
        }
    }
}

/// One cfn-init config
#[derive(Debug, Default, Serialize)]
struct InitConfig {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    packages: BTreeMap<&'static str, BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    files: BTreeMap<String, InitFile>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    commands: BTreeMap<String, InitCommand>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    services: BTreeMap<&'static str, BTreeMap<String, InitService>>,
}

#[derive(Debug, Serialize)]
struct InitFile {
    content: String,
    mode: String,
    owner: String,
    group: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitCommand {
    command: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    ignore_errors: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitService {
    enabled: bool,
    ensure_running: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files: Vec<String>,
}

/// Files whose change restarts `service`
fn watched_files(all_steps: &[BootstrapStep], service: &str) -> Vec<String> {
    all_steps
        .iter()
        .filter_map(|s| match s {
            BootstrapStep::File { path, restarts, .. } if restarts.iter().any(|r| r == service) => {
                Some(path.clone())
            }
            _ => None,
        })
        .collect()
}

fn render_group(
    group: &[(usize, &BootstrapStep)],
    all_steps: &[BootstrapStep],
    config: &StackConfig,
) -> Result<InitConfig, SynthError> {
    let mut rendered = InitConfig::default();
    let width = all_steps.len().to_string().len().max(3);
    for &(index, step) in group {
        match step {
            BootstrapStep::Package {
                manager,
                name,
                versions,
            } => {
                rendered
                    .packages
                    .entry(manager.as_str())
                    .or_default()
                    .insert(name.clone(), versions.clone());
            }
            BootstrapStep::File {
                path,
                source,
                mode,
                owner,
                group,
                ..
            } => {
                rendered.files.insert(
                    path.clone(),
                    InitFile {
                        content: file_content(source, config)?,
                        mode: mode.clone(),
                        owner: owner.clone(),
                        group: group.clone(),
                    },
                );
            }
            BootstrapStep::Command {
                command,
                substitute,
                cwd,
                env,
                ignore_errors,
            } => {
                let command = if *substitute {
                    sub(command)
                } else {
                    Value::String(command.clone())
                };
                // cfn-init runs commands sorted by key
                rendered.commands.insert(
                    format!("{index:0width$}"),
                    InitCommand {
                        command,
                        cwd: cwd.clone(),
                        env: env.clone(),
                        ignore_errors: *ignore_errors,
                    },
                );
            }
            BootstrapStep::Service {
                name,
                enabled,
                ensure_running,
            } => {
                rendered.services.entry("sysvinit").or_default().insert(
                    name.clone(),
                    InitService {
                        enabled: *enabled,
                        ensure_running: *ensure_running,
                        files: watched_files(all_steps, name),
                    },
                );
            }
        }
    }
    Ok(rendered)
}

/// Render the recipe into cfn-init metadata
pub fn render_recipe(steps: &[BootstrapStep], config: &StackConfig) -> Result<Recipe, SynthError> {
    check_steps(steps)?;

    let groups = group_steps(steps);
    let config_names: Vec<String> = match groups.len() {
        0 | 1 => vec!["config".to_string()],
        n => (1..=n).map(|i| format!("config{i}")).collect(),
    };

    let mut init = Map::new();
    init.insert(
        "configSets".to_string(),
        json!({ CONFIG_SET: config_names }),
    );
    if groups.is_empty() {
        init.insert("config".to_string(), json!({}));
    }
    for (name, group) in config_names.iter().zip(&groups) {
        let rendered = render_group(group, steps, config)?;
        init.insert(
            name.clone(),
            serde_json::to_value(rendered).map_err(TemplateError::from)?,
        );
    }

    let metadata = json!({ INIT_METADATA_KEY: Value::Object(init) });
    let fingerprint = fingerprint(&metadata)?;
    Ok(Recipe {
        metadata,
        fingerprint,
        config_names,
    })
}

/// Short SHA-256 digest of the metadata
fn fingerprint(metadata: &Value) -> Result<String, SynthError> {
    let bytes = serde_json::to_vec(metadata).map_err(TemplateError::from)?;
    let digest = hex::encode(Sha256::digest(&bytes));
    Ok(digest[..FINGERPRINT_LEN].to_string())
}

/// User data that applies the recipe and signals the result.
///
/// The fingerprint changes whenever the recipe does, which changes the launch
/// template and so replaces instances on the next update.
pub fn render_user_data(resource_id: &str, fingerprint: &str) -> Result<Value, SynthError> {
    validate_name(resource_id, "resource id")?;
    validate_name(fingerprint, "fingerprint")?;
    let script = format!(
        r#"#!/bin/bash
# recipe {fingerprint}
/opt/aws/bin/cfn-init -v --region ${{AWS::Region}} --stack ${{AWS::StackName}} --resource {resource_id} --configsets {CONFIG_SET}
/opt/aws/bin/cfn-signal -e $? --region ${{AWS::Region}} --stack ${{AWS::StackName}} --resource {resource_id}
"#
    );
    Ok(base64(sub(&script)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use webfleet_common::PackageManager;

    fn package(name: &str) -> BootstrapStep {
        BootstrapStep::Package {
            manager: PackageManager::Yum,
            name: name.to_string(),
            versions: Vec::new(),
        }
    }

    fn command(text: &str) -> BootstrapStep {
        BootstrapStep::Command {
            command: text.to_string(),
            substitute: false,
            cwd: None,
            env: BTreeMap::new(),
            ignore_errors: false,
        }
    }

    fn inline_file(path: &str, content: &str, restarts: &[&str]) -> BootstrapStep {
        BootstrapStep::File {
            path: path.to_string(),
            source: FileSource::Inline(content.to_string()),
            mode: "000644".to_string(),
            owner: "root".to_string(),
            group: "root".to_string(),
            restarts: restarts.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn service(name: &str) -> BootstrapStep {
        BootstrapStep::Service {
            name: name.to_string(),
            enabled: true,
            ensure_running: true,
        }
    }

    fn indices(groups: &[Vec<(usize, &BootstrapStep)>]) -> Vec<Vec<usize>> {
        groups
            .iter()
            .map(|g| g.iter().map(|(i, _)| *i).collect())
            .collect()
    }

    #[test]
    fn test_grouping_preserves_order() {
        // package, command, command, file, service: the file must not jump
        // ahead of the commands
        let steps = vec![
            package("nginx"),
            command("mkdir -p /var/www"),
            command("echo ok"),
            inline_file("/etc/app.conf", "x", &[]),
            service("nginx"),
        ];
        assert_eq!(
            indices(&group_steps(&steps)),
            vec![vec![0, 1, 2], vec![3, 4]]
        );
    }

    #[test]
    fn test_grouping_in_natural_order_is_one_config() {
        let steps = vec![
            package("nginx"),
            inline_file("/etc/app.conf", "x", &[]),
            command("echo ok"),
            service("nginx"),
        ];
        assert_eq!(indices(&group_steps(&steps)), vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_grouping_restarts_after_each_regression() {
        let steps = vec![
            service("a"),
            command("one"),
            package("p"),
            package("q"),
        ];
        assert_eq!(
            indices(&group_steps(&steps)),
            vec![vec![0], vec![1], vec![2, 3]]
        );
    }

    #[test]
    fn test_grouping_follows_manager_install_order() {
        let pip = |name: &str| BootstrapStep::Package {
            manager: PackageManager::Python,
            name: name.to_string(),
            versions: Vec::new(),
        };
        let rpm = BootstrapStep::Package {
            manager: PackageManager::Rpm,
            name: "epel".to_string(),
            versions: Vec::new(),
        };
        // yum after python would install first if they shared a config
        let steps = vec![rpm, package("python3-pip"), pip("flask"), package("nginx")];
        assert_eq!(
            indices(&group_steps(&steps)),
            vec![vec![0, 1, 2], vec![3]]
        );
    }

    #[test]
    fn test_repeated_entries_split_configs() {
        let steps = vec![
            package("nginx"),
            package("nginx"),
            inline_file("/etc/app.conf", "first", &[]),
            inline_file("/etc/app.conf", "second", &[]),
        ];
        assert_eq!(
            indices(&group_steps(&steps)),
            vec![vec![0], vec![1, 2], vec![3]]
        );

        let recipe = render_recipe(&steps, &StackConfig::default()).unwrap();
        let init = &recipe.metadata[INIT_METADATA_KEY];
        assert_eq!(init["config2"]["files"]["/etc/app.conf"]["content"], "first");
        assert_eq!(init["config3"]["files"]["/etc/app.conf"]["content"], "second");
    }

    #[test]
    fn test_command_keys_sort_in_step_order() {
        let steps: Vec<BootstrapStep> = (0..1200).map(|i| command(&format!("echo {i}"))).collect();
        let recipe = render_recipe(&steps, &StackConfig::default()).unwrap();
        let commands = recipe.metadata[INIT_METADATA_KEY]["config"]["commands"]
            .as_object()
            .unwrap();
        let order: Vec<&str> = commands
            .values()
            .map(|c| c["command"].as_str().unwrap())
            .collect();
        let mut keys: Vec<&String> = commands.keys().collect();
        keys.sort();
        assert_eq!(keys[0], "0000");
        assert_eq!(keys[1199], "1199");
        assert_eq!(order[999], "echo 999");
        assert_eq!(order[1000], "echo 1000");
    }

    #[test]
    fn test_render_single_config() {
        let steps = vec![package("httpd"), service("httpd")];
        let recipe = render_recipe(&steps, &StackConfig::default()).unwrap();
        let init = &recipe.metadata[INIT_METADATA_KEY];

        assert_eq!(recipe.config_names, vec!["config"]);
        assert_eq!(init["configSets"]["default"], json!(["config"]));
        assert_eq!(init["config"]["packages"]["yum"]["httpd"], json!([]));
        assert_eq!(
            init["config"]["services"]["sysvinit"]["httpd"],
            json!({ "enabled": true, "ensureRunning": true })
        );
    }

    #[test]
    fn test_render_split_configs() {
        let steps = vec![
            package("nginx"),
            command("mkdir -p /var/www/app"),
            inline_file("/etc/nginx/conf.d/app.conf", "server {}", &["nginx"]),
            service("nginx"),
        ];
        let recipe = render_recipe(&steps, &StackConfig::default()).unwrap();
        let init = &recipe.metadata[INIT_METADATA_KEY];

        assert_eq!(init["configSets"]["default"], json!(["config1", "config2"]));
        assert_eq!(
            init["config1"]["commands"]["001"]["command"],
            "mkdir -p /var/www/app"
        );
        assert_eq!(
            init["config2"]["files"]["/etc/nginx/conf.d/app.conf"]["content"],
            "server {}"
        );
        assert_eq!(
            init["config2"]["services"]["sysvinit"]["nginx"]["files"],
            json!(["/etc/nginx/conf.d/app.conf"])
        );
    }

    #[test]
    fn test_substituted_command() {
        let steps = vec![BootstrapStep::Command {
            command: "echo ${AWS::Region}".to_string(),
            substitute: true,
            cwd: Some("/tmp".to_string()),
            env: BTreeMap::from([("MODE".to_string(), "prod".to_string())]),
            ignore_errors: true,
        }];
        let recipe = render_recipe(&steps, &StackConfig::default()).unwrap();
        let cmd = &recipe.metadata[INIT_METADATA_KEY]["config"]["commands"]["000"];
        assert_eq!(cmd["command"], json!({ "Fn::Sub": "echo ${AWS::Region}" }));
        assert_eq!(cmd["cwd"], "/tmp");
        assert_eq!(cmd["env"]["MODE"], "prod");
        assert_eq!(cmd["ignoreErrors"], true);
    }

    #[test]
    fn test_local_file_read_from_base_dir() {
        let dir = TempDir::new().unwrap();
        let mut file = fs::File::create(dir.path().join("vhost.conf")).unwrap();
        writeln!(file, "server {{ listen 80; }}").unwrap();

        let config = StackConfig {
            base_dir: dir.path().to_path_buf(),
            ..StackConfig::default()
        };
        let steps = vec![BootstrapStep::File {
            path: "/etc/nginx/conf.d/app.conf".to_string(),
            source: FileSource::Local(PathBuf::from("vhost.conf")),
            mode: "000644".to_string(),
            owner: "root".to_string(),
            group: "root".to_string(),
            restarts: Vec::new(),
        }];
        let recipe = render_recipe(&steps, &config).unwrap();
        assert_eq!(
            recipe.metadata[INIT_METADATA_KEY]["config"]["files"]["/etc/nginx/conf.d/app.conf"]
                ["content"],
            "server { listen 80; }\n"
        );
    }

    #[test]
    fn test_missing_local_file() {
        let dir = TempDir::new().unwrap();
        let config = StackConfig {
            base_dir: dir.path().to_path_buf(),
            ..StackConfig::default()
        };
        let steps = vec![BootstrapStep::File {
            path: "/etc/missing.conf".to_string(),
            source: FileSource::Local(PathBuf::from("missing.conf")),
            mode: "000644".to_string(),
            owner: "root".to_string(),
            group: "root".to_string(),
            restarts: Vec::new(),
        }];
        let err = render_recipe(&steps, &config).unwrap_err();
        assert!(matches!(err, SynthError::Asset { .. }));
    }

    #[test]
    fn test_rejects_unsafe_names() {
        let config = StackConfig::default();
        for step in [
            package("nginx; rm -rf /"),
            package("$(curl evil)"),
            service("ng\"inx"),
            inline_file("relative/path", "x", &[]),
        ] {
            assert!(
                render_recipe(&[step.clone()], &config).is_err(),
                "step {step:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_unknown_restart_service() {
        let steps = vec![inline_file("/etc/app.conf", "x", &["httpd"])];
        let err = render_recipe(&steps, &StackConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SynthError::UnknownRestartService { service, .. } if service == "httpd"
        ));
    }

    #[test]
    fn test_fingerprint_tracks_recipe() {
        let config = StackConfig::default();
        let a = render_recipe(&[package("nginx")], &config).unwrap();
        let b = render_recipe(&[package("nginx")], &config).unwrap();
        let c = render_recipe(&[package("httpd")], &config).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.len(), 16);
    }

    #[test]
    fn test_empty_recipe() {
        let recipe = render_recipe(&[], &StackConfig::default()).unwrap();
        let init = &recipe.metadata[INIT_METADATA_KEY];
        assert_eq!(init["configSets"]["default"], json!(["config"]));
        assert_eq!(init["config"], json!({}));
    }

    #[test]
    fn test_user_data_runs_init_then_signal() {
        let user_data = render_user_data("WebPool", "0123456789abcdef").unwrap();
        let script = user_data["Fn::Base64"]["Fn::Sub"].as_str().unwrap();
        let init = script.find("cfn-init").unwrap();
        let signal = script.find("cfn-signal -e $?").unwrap();
        assert!(init < signal);
        assert!(script.contains("--resource WebPool"));
        assert!(script.contains("--stack ${AWS::StackName}"));
        assert!(script.contains("# recipe 0123456789abcdef"));
    }

    #[test]
    fn test_validate_shell_input() {
        assert!(validate_shell_input("nginx", "name").is_ok());
        assert!(matches!(
            validate_shell_input("a`b`", "name"),
            Err(SynthError::UnsafeShellValue { ch: '`', .. })
        ));
        assert!(validate_shell_input("", "name").is_err());
    }
}
