//! # CRD Generator
//!
//! Prints the `AssistantConfig` CustomResourceDefinition YAML.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/assistantconfig.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use assistant_operator::crd::AssistantConfig;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = AssistantConfig::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
