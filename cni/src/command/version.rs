use async_trait::async_trait;
use serde::Serialize;

use crate::args::CmdArgs;

use super::CniCommand;

pub const CURRENT_VERSION: &str = "1.0.0";

pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Versions that predate the `interfaces`/`ips` result layout.
pub fn is_legacy(cni_version: &str) -> bool {
    matches!(cni_version, "0.1.0" | "0.2.0")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    cni_version: &'static str,
    supported_versions: &'static [&'static str],
}

pub struct VersionCommand;

#[async_trait(?Send)]
impl CniCommand for VersionCommand {
    async fn run(&self, _args: &CmdArgs, _stdin: &[u8]) -> anyhow::Result<()> {
        println!("{}", Self::info()?);
        Ok(())
    }
}

impl VersionCommand {
    fn info() -> anyhow::Result<String> {
        Ok(serde_json::to_string(&VersionInfo {
            cni_version: CURRENT_VERSION,
            supported_versions: SUPPORTED_VERSIONS,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let info: serde_json::Value = serde_json::from_str(&VersionCommand::info().unwrap()).unwrap();

        assert_eq!(info["cniVersion"], "1.0.0");
        assert_eq!(info["supportedVersions"].as_array().unwrap().len(), 6);
        assert!(is_legacy("0.1.0"));
        assert!(!is_legacy("0.3.0"));
    }
}
