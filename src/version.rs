use semver::{BuildMetadata, Version};
use tracing::warn;

/// The version reported to subscribers.
///
/// This is the package version. If `CONTROLLER_BRIDGE_REVISION` was set at build time
/// (e.g. to a short git hash) it is appended as build metadata: `0.1.0+gabc1234`.
pub fn server_version() -> String {
    with_revision(env!("CARGO_PKG_VERSION"), option_env!("CONTROLLER_BRIDGE_REVISION"))
}

fn with_revision(base: &str, revision: Option<&str>) -> String {
    let mut version = match Version::parse(base) {
        Ok(version) => version,
        Err(e) => {
            warn!(%base, ?e, "Package version is not semver, using 0.0.0");
            Version::new(0, 0, 0)
        }
    };

    let revision = revision.map(str::trim).filter(|revision| !revision.is_empty());

    if let Some(revision) = revision {
        match BuildMetadata::new(&format!("g{revision}")) {
            Ok(build) => version.build = build,
            Err(e) => warn!(%revision, ?e, "Revision is not valid build metadata, leaving it out"),
        }
    }

    version.to_string()
}
