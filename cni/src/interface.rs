use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

impl Interface {
    pub fn new(name: &str, mac: String, sandbox: &str) -> Self {
        Self {
            name: name.to_owned(),
            mac,
            sandbox: sandbox.to_owned(),
        }
    }
}
