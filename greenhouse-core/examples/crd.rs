//! A script used to generate the CRDs used by this project.
//!
//! Any time a CRD spec changes, this script can be run to ensure that the CRDs are up-to-date and
//! ready to be synced with the cluster.

use anyhow::{Context, Result};
use greenhouse_core::crd::Cluster;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let canon = std::fs::canonicalize("..").context("error getting canonical path of current dir")?;
    let crds_path = canon.join("charts").join("crds");
    std::fs::create_dir_all(&crds_path).with_context(|| format!("error creating CRD dir {:?}", &crds_path))?;

    let cluster = Cluster::crd();
    let cluster_yaml = serde_yaml::to_string(&cluster).context("error serializing Cluster CRD to yaml")?;
    std::fs::write(crds_path.join("cluster.yaml"), &cluster_yaml).with_context(|| format!("error writing Cluster CRD to {:?}", &crds_path))?;
    println!("Cluster CRD written to {:?}", &crds_path);

    Ok(())
}
