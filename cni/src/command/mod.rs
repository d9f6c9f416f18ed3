use async_trait::async_trait;
use ptproute_config::NetConf;
use ptproute_trace::{setup_tracing_to_file, setup_tracing_to_stderr, WorkerGuard};

use crate::{
    args::{CmdArgs, ADD, DEL, VERSION},
    error::{best_effort, PluginError},
};

use self::{add::AddCommand, delete::DeleteCommand, version::VersionCommand};

pub mod add;
pub mod delete;
pub mod version;

const LOG_FILE_PREFIX: &str = "ptproute.log";

#[async_trait(?Send)]
pub trait CniCommand {
    async fn run(&self, args: &CmdArgs, stdin: &[u8]) -> anyhow::Result<()>;
}

pub fn cni_command_from(command: &str) -> Result<Box<dyn CniCommand>, PluginError> {
    match command {
        ADD => Ok(Box::new(AddCommand)),
        DEL => Ok(Box::new(DeleteCommand)),
        VERSION => Ok(Box::new(VersionCommand)),
        _ => Err(PluginError::InvalidEnvironment(format!(
            "unknown CNI_COMMAND: {command}"
        ))),
    }
}

/// Parses the network configuration and starts logging at its level.
///
/// The returned guard flushes the log file when dropped.
pub(crate) fn load_conf(stdin: &[u8]) -> Result<(NetConf, Option<WorkerGuard>), PluginError> {
    let conf = NetConf::parse(stdin)?;

    let guard = match &conf.log_dir {
        Some(dir) => best_effort(
            "file logging setup",
            setup_tracing_to_file(dir, LOG_FILE_PREFIX, conf.log_level),
        ),
        None => {
            best_effort("stderr logging setup", setup_tracing_to_stderr(conf.log_level));
            None
        }
    };

    Ok((conf, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command() {
        let err = cni_command_from("CHECK").err().unwrap();
        assert_eq!(err.code(), 4);

        assert!(cni_command_from(ADD).is_ok());
        assert!(cni_command_from(VERSION).is_ok());
    }

    #[test]
    fn test_load_conf_rejects_bad_json() {
        let err = load_conf(b"{not json").unwrap_err();
        assert_eq!(err.code(), 6);

        let err = load_conf(br#"{"name":"ptp","routeTableStart":254}"#).unwrap_err();
        assert_eq!(err.code(), 7);
    }
}
