/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */
//! The locally-refreshed view of one attached network interface.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::provider::CloudError;
use crate::session::CloudSession;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata service returned HTTP {status}")]
    Http { status: u16 },

    #[error("metadata transport error: {0}")]
    Transport(String),

    #[error("unparseable metadata: {0}")]
    Parse(String),
}

/// The on-host instance metadata service, reduced to what interface refresh
/// needs. The service reflects cloud-side mutations with a short delay, which
/// is exactly why callers poll it for convergence.
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    /// Private IPv4 addresses of the interface with this MAC, primary first.
    async fn local_ipv4_addresses(&self, mac: &str) -> Result<Vec<Ipv4Addr>, MetadataError>;

    async fn ipv6_addresses(&self, mac: &str) -> Result<Vec<Ipv6Addr>, MetadataError>;
}

/// A snapshot-holding view of one interface.
///
/// `ipv4_addresses` keeps the primary at position 0; the scan order of the
/// allocator depends on it.
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    fn interface_id(&self) -> &str;

    fn mac_address(&self) -> &str;

    fn ipv4_addresses(&self) -> Vec<Ipv4Addr>;

    fn ipv6_addresses(&self) -> Vec<Ipv6Addr>;

    /// Stable path prefix for this interface inside the lock registry.
    fn lock_path(&self) -> PathBuf;

    /// Re-read the address lists from the local metadata source.
    async fn refresh(&self) -> Result<(), MetadataError>;

    /// Ask the provider to release these secondary IPv4 addresses.
    async fn free_ipv4_addresses(
        &self,
        session: &CloudSession,
        ips: &[Ipv4Addr],
    ) -> Result<(), CloudError>;
}

#[derive(Default)]
struct Snapshot {
    ipv4: Vec<Ipv4Addr>,
    ipv6: Vec<Ipv6Addr>,
}

/// Production [`NetworkInterface`] backed by the instance metadata service.
/// Starts empty; callers refresh before first use.
pub struct MetadataNetworkInterface {
    interface_id: String,
    mac_address: String,
    metadata: Arc<dyn InstanceMetadata>,
    snapshot: RwLock<Snapshot>,
}

impl MetadataNetworkInterface {
    pub fn new(
        interface_id: impl Into<String>,
        mac_address: impl Into<String>,
        metadata: Arc<dyn InstanceMetadata>,
    ) -> Self {
        Self {
            interface_id: interface_id.into(),
            mac_address: mac_address.into(),
            metadata,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }
}

#[async_trait]
impl NetworkInterface for MetadataNetworkInterface {
    fn interface_id(&self) -> &str {
        &self.interface_id
    }

    fn mac_address(&self) -> &str {
        &self.mac_address
    }

    fn ipv4_addresses(&self) -> Vec<Ipv4Addr> {
        self.snapshot.read().unwrap().ipv4.clone()
    }

    fn ipv6_addresses(&self) -> Vec<Ipv6Addr> {
        self.snapshot.read().unwrap().ipv6.clone()
    }

    fn lock_path(&self) -> PathBuf {
        PathBuf::from("interfaces").join(&self.interface_id)
    }

    async fn refresh(&self) -> Result<(), MetadataError> {
        let ipv4 = self.metadata.local_ipv4_addresses(&self.mac_address).await?;
        let ipv6 = self.metadata.ipv6_addresses(&self.mac_address).await?;
        let mut snapshot = self.snapshot.write().unwrap();
        snapshot.ipv4 = ipv4;
        snapshot.ipv6 = ipv6;
        Ok(())
    }

    async fn free_ipv4_addresses(
        &self,
        session: &CloudSession,
        ips: &[Ipv4Addr],
    ) -> Result<(), CloudError> {
        session
            .unassign_private_ipv4_addresses(&self.interface_id, ips)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMetadata {
        ipv4: Vec<Ipv4Addr>,
        ipv6: Vec<Ipv6Addr>,
    }

    #[async_trait]
    impl InstanceMetadata for FixedMetadata {
        async fn local_ipv4_addresses(&self, _mac: &str) -> Result<Vec<Ipv4Addr>, MetadataError> {
            Ok(self.ipv4.clone())
        }

        async fn ipv6_addresses(&self, _mac: &str) -> Result<Vec<Ipv6Addr>, MetadataError> {
            Ok(self.ipv6.clone())
        }
    }

    #[tokio::test]
    async fn refresh_replaces_the_snapshot_primary_first() {
        let metadata = Arc::new(FixedMetadata {
            ipv4: vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
            ipv6: vec!["fd00::1".parse().unwrap()],
        });
        let interface = MetadataNetworkInterface::new("eni-1", "0a:00:00:00:00:01", metadata);

        assert!(interface.ipv4_addresses().is_empty());
        interface.refresh().await.unwrap();
        assert_eq!(
            interface.ipv4_addresses(),
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
        assert_eq!(interface.ipv6_addresses().len(), 1);
    }

    #[test]
    fn lock_path_is_stable_per_interface() {
        let metadata = Arc::new(FixedMetadata {
            ipv4: vec![],
            ipv6: vec![],
        });
        let interface = MetadataNetworkInterface::new("eni-1", "0a:00:00:00:00:01", metadata);
        assert_eq!(interface.lock_path(), PathBuf::from("interfaces/eni-1"));
    }
}
