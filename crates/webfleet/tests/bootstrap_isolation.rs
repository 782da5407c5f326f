//! Changing the first-boot recipe touches only the compute layer

use webfleet::synth::synthesize;
use webfleet_common::{BootstrapStep, FileSource, Layer, PackageManager, StackConfig};

fn inline_config() -> StackConfig {
    let mut config = StackConfig::default();
    for step in &mut config.compute.bootstrap.steps {
        if let BootstrapStep::File { source, .. } = step {
            *source = FileSource::Inline("server { listen 80; }".to_string());
        }
    }
    config
}

#[test]
fn test_package_change_only_affects_compute() {
    let before = inline_config();
    let mut after = inline_config();
    after.compute.bootstrap.steps.insert(
        0,
        BootstrapStep::Package {
            manager: PackageManager::Yum,
            name: "htop".to_string(),
            versions: Vec::new(),
        },
    );

    let before = synthesize(&before).unwrap();
    let after = synthesize(&after).unwrap();

    for layer in [Layer::Network, Layer::Security, Layer::Pipeline] {
        assert_eq!(
            before.layer_section(layer).unwrap(),
            after.layer_section(layer).unwrap(),
            "{layer:?} changed"
        );
    }
    assert_ne!(
        before.layer_section(Layer::Compute).unwrap(),
        after.layer_section(Layer::Compute).unwrap()
    );
}

#[test]
fn test_identical_config_is_deterministic() {
    let first = synthesize(&inline_config()).unwrap();
    let second = synthesize(&inline_config()).unwrap();
    assert_eq!(
        first.template.to_json_pretty().unwrap(),
        second.template.to_json_pretty().unwrap()
    );
}
