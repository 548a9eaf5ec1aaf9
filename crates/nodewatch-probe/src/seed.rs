//! Seed node probe: an external reachability script decides.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use nodewatch_core::NodeDescriptor;

use crate::Probe;
use crate::error::{ProbeError, ProbeResult};

/// Runs `<script> <address>:<port>`; exit status 0 means reachable.
pub struct SeedProbe {
    script: PathBuf,
}

impl SeedProbe {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl Probe for SeedProbe {
    async fn probe(&self, node: &NodeDescriptor, timeout: Duration) -> ProbeResult<()> {
        let mut child = Command::new(&self.script)
            .arg(node.target())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                script: self.script.clone(),
                source,
            })?;

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map_err(|source| ProbeError::Spawn {
                script: self.script.clone(),
                source,
            })?,
            Err(_) => {
                // Dropping the child kills it.
                debug!(address = %node.address, "seed script timed out");
                return Err(ProbeError::Timeout);
            }
        };

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ProbeError::ExitStatus(code)),
            None => Err(ProbeError::Signal),
        }
    }

    fn name(&self) -> &'static str {
        "seed"
    }
}
