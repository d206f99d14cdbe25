//! Administrative link control

use crate::error::PortalError;
use async_trait::async_trait;
use tokio::process::Command;

#[async_trait]
pub trait LinkController: Send + Sync {
    async fn set_down(&self, interface: &str) -> Result<(), PortalError>;
    async fn set_up(&self, interface: &str) -> Result<(), PortalError>;
}

/// Drives iproute2's `ip link set`; needs CAP_NET_ADMIN
pub struct IpLink;

impl IpLink {
    async fn set(&self, interface: &str, action: &'static str) -> Result<(), PortalError> {
        let output = Command::new("ip")
            .args(["link", "set", "dev", interface, action])
            .output()
            .await
            .map_err(|e| PortalError::LinkControl {
                interface: interface.to_string(),
                action,
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PortalError::LinkControl {
                interface: interface.to_string(),
                action,
                reason: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LinkController for IpLink {
    async fn set_down(&self, interface: &str) -> Result<(), PortalError> {
        self.set(interface, "down").await
    }

    async fn set_up(&self, interface: &str) -> Result<(), PortalError> {
        self.set(interface, "up").await
    }
}
