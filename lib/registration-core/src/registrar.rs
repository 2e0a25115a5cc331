//! Access to the agent holding the extension registrations

use crate::Result;
use async_trait::async_trait;
use registration_api::ExtensionDescriptor;
use std::fmt;

/// Operations offered by the agent's extensions API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistrarOperation {
    List,
    Register,
    Deregister,
}

impl RegistrarOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrarOperation::List => "list",
            RegistrarOperation::Register => "register",
            RegistrarOperation::Deregister => "deregister",
        }
    }
}

impl fmt::Display for RegistrarOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote side of reconciliation
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Current registrations, fetched fresh on every call
    async fn list(&self) -> Result<Vec<ExtensionDescriptor>>;

    /// Register one extension
    async fn register(&self, descriptor: &ExtensionDescriptor) -> Result<()>;

    /// Remove the registration matching `descriptor`
    async fn deregister(&self, descriptor: &ExtensionDescriptor) -> Result<()>;
}
