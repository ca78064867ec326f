//! Prints the Configuration CRD manifest.
//!
//! Usage: `cargo run -p crds --bin crdgen | kubectl apply -f -`

use crds::Configuration;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Configuration::crd())?);
    Ok(())
}
