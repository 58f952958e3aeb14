//! Worker configuration: outbound connections and local port forwards

use serde::{Deserialize, Serialize};

use crate::auth::App;

/// An outbound control connection kept alive by the remote worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Address of the control node, e.g. `ctrl.example.com:6543`
    pub address: String,

    /// Credentials to authenticate with
    pub app: App,
}

/// A local TCP listener whose connections are forwarded to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Session to send the command through. Defaults to `app`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,

    /// Agent that dials `remote_address`
    pub app: String,

    /// Local TCP address to listen on
    pub local_address: String,

    /// Address dialed by the agent
    pub remote_address: String,
}

impl ForwardConfig {
    /// Identity of the session the forward command is issued on
    pub fn via(&self) -> &str {
        self.via.as_deref().unwrap_or(&self.app)
    }
}
