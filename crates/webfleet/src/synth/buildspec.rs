//! CodeBuild buildspec rendering
//!
//! The buildspec is embedded in the project's `Source.BuildSpec` as text.
//! CodeBuild accepts JSON there as well as YAML.

use serde::Serialize;
use std::collections::BTreeMap;
use webfleet_common::BuildConfig;
use webfleet_template::TemplateError;

const BUILDSPEC_VERSION: &str = "0.2";

#[derive(Debug, Serialize)]
struct BuildSpec<'a> {
    version: &'static str,
    phases: Phases<'a>,
    artifacts: Artifacts<'a>,
}

#[derive(Debug, Serialize)]
struct Phases<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    install: Option<Phase<'a>>,
    build: Phase<'a>,
}

#[derive(Debug, Serialize)]
struct Phase<'a> {
    #[serde(
        rename = "runtime-versions",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    runtime_versions: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    commands: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct Artifacts<'a> {
    files: Vec<&'a str>,
    #[serde(rename = "base-directory", skip_serializing_if = "Option::is_none")]
    base_directory: Option<&'a str>,
}

fn as_strs(items: &[String]) -> Vec<&str> {
    items.iter().map(String::as_str).collect()
}

/// Render the buildspec as pretty JSON text
pub fn render_buildspec(config: &BuildConfig) -> Result<String, TemplateError> {
    let runtime_versions: BTreeMap<&str, &str> = config
        .runtime_versions
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let install = if runtime_versions.is_empty() && config.install_commands.is_empty() {
        None
    } else {
        Some(Phase {
            runtime_versions,
            commands: as_strs(&config.install_commands),
        })
    };

    let spec = BuildSpec {
        version: BUILDSPEC_VERSION,
        phases: Phases {
            install,
            build: Phase {
                runtime_versions: BTreeMap::new(),
                commands: as_strs(&config.build_commands),
            },
        },
        artifacts: Artifacts {
            files: as_strs(&config.artifact_files),
            base_directory: config.base_directory.as_deref(),
        },
    };
    Ok(serde_json::to_string_pretty(&spec)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_default_buildspec() {
        let spec = parse(&render_buildspec(&BuildConfig::default()).unwrap());
        assert_eq!(
            spec,
            json!({
                "version": "0.2",
                "phases": {
                    "install": {
                        "runtime-versions": { "nodejs": "18" },
                        "commands": ["npm install"]
                    },
                    "build": { "commands": ["npm run build"] }
                },
                "artifacts": { "files": ["**/*"] }
            })
        );
    }

    #[test]
    fn test_install_phase_omitted_when_empty() {
        let config = BuildConfig {
            runtime_versions: BTreeMap::new(),
            install_commands: Vec::new(),
            base_directory: Some("dist".to_string()),
            ..BuildConfig::default()
        };
        let spec = parse(&render_buildspec(&config).unwrap());
        assert!(spec["phases"].get("install").is_none());
        assert_eq!(spec["artifacts"]["base-directory"], "dist");
    }
}
