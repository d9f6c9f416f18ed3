use std::env;

use crate::error::PluginError;

pub const ADD: &str = "ADD";
pub const DEL: &str = "DEL";
pub const VERSION: &str = "VERSION";

/// Invocation arguments passed through `CNI_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct CmdArgs {
    pub command: String,
    pub container_id: String,
    pub netns: String,
    pub if_name: String,
    pub args: String,
    pub path: String,
}

impl CmdArgs {
    pub fn from_env() -> Result<Self, PluginError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, PluginError> {
        let get = |key: &str| var(key).unwrap_or_default();

        let args = Self {
            command: get("CNI_COMMAND"),
            container_id: get("CNI_CONTAINERID"),
            netns: get("CNI_NETNS"),
            if_name: get("CNI_IFNAME"),
            args: get("CNI_ARGS"),
            path: get("CNI_PATH"),
        };

        args.validate()?;
        Ok(args)
    }

    fn validate(&self) -> Result<(), PluginError> {
        let required = match self.command.as_str() {
            ADD => vec![
                ("CNI_CONTAINERID", self.container_id.as_str()),
                ("CNI_NETNS", self.netns.as_str()),
                ("CNI_IFNAME", self.if_name.as_str()),
            ],
            DEL => vec![
                ("CNI_CONTAINERID", self.container_id.as_str()),
                ("CNI_IFNAME", self.if_name.as_str()),
            ],
            "" => return Err(PluginError::InvalidEnvironment("CNI_COMMAND is not set".into())),
            _ => vec![],
        };

        match required.iter().find(|(_, value)| value.is_empty()) {
            Some((key, _)) => Err(PluginError::InvalidEnvironment(format!(
                "required env variable {key} is missing"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_add_requires_netns() {
        let err = CmdArgs::from_vars(vars(&[
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "abc"),
            ("CNI_IFNAME", "eth0"),
        ]))
        .unwrap_err();

        assert!(matches!(err, PluginError::InvalidEnvironment(ref m) if m.contains("CNI_NETNS")));
        assert_eq!(err.code(), 4);
    }

    #[test]
    fn test_del_without_netns() {
        let args = CmdArgs::from_vars(vars(&[
            ("CNI_COMMAND", "DEL"),
            ("CNI_CONTAINERID", "abc"),
            ("CNI_IFNAME", "eth0"),
        ]))
        .unwrap();

        assert_eq!(args.netns, "");
        assert_eq!(args.if_name, "eth0");
    }

    #[test]
    fn test_version_needs_nothing() {
        let args = CmdArgs::from_vars(vars(&[("CNI_COMMAND", "VERSION")])).unwrap();
        assert_eq!(args.command, VERSION);

        assert!(CmdArgs::from_vars(vars(&[])).is_err());
    }
}
