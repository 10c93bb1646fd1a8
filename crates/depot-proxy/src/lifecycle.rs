use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};

/// Lifecycle state of a proxy facet.
///
/// ```text
/// New --start--> Started <--stop/start--> Stopped
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    New,
    Started,
    Stopped,
}

impl Lifecycle {
    /// Fail with [`ProxyError::InvalidState`] unless the state is one of `allowed`.
    pub fn require(self, operation: &'static str, allowed: &[Lifecycle]) -> ProxyResult<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(ProxyError::InvalidState {
                operation,
                state: self,
            })
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Started => "started",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
