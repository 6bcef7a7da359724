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
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the agent will try to reach the VPC control endpoint.
/// Deployment tooling should set this in all environments.
const DEFAULT_VPC_ENDPOINT: &str = "http://vpc-control.internal:7700";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_LOCK_ROOT: &str = "/run/ipamd";
const DEFAULT_METRICS_ADDRESS: &str = "0.0.0.0:8888";

/// Describes the format of the configuration file used by the ipamd agent.
///
/// This is what we READ from /etc/ipamd/config.toml. In prod most of the
/// fields will default. We only implement Serialize for unit tests.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub vpc: VpcConfig,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AgentConfig {
    /// Loads the agent configuration file in toml format from the given path
    pub fn load_from(path: &Path) -> Result<Self, io::Error> {
        let data = std::fs::read_to_string(path)?;

        toml::from_str(&data).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid AgentConfig toml data: {e}"),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VpcConfig {
    #[serde(default = "default_vpc_endpoint")]
    pub endpoint: String,

    /// Account to allocate from. Empty means the caller's own account.
    #[serde(default)]
    pub account_id: String,

    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for VpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_vpc_endpoint(),
            account_id: String::new(),
            region: default_region(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MachineConfig {
    /// Used to discover the instance type when `instance-type` is not set.
    #[serde(default)]
    pub instance_id: String,

    #[serde(default)]
    pub instance_type: String,

    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InterfaceConfig {
    pub interface_id: String,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolConfig {
    #[serde(default = "default_lock_root")]
    pub lock_root: String,

    /// How many addresses one expansion asks for before cap clamping.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long an allocation waits for expanded addresses to show up.
    #[serde(default = "default_refresh_timeout_seconds")]
    pub refresh_timeout_seconds: u64,

    /// Poll cadence while waiting for freed addresses to leave the view.
    #[serde(default = "default_ip_refresh_sleep_interval_seconds")]
    pub ip_refresh_sleep_interval_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lock_root: default_lock_root(),
            batch_size: default_batch_size(),
            refresh_timeout_seconds: default_refresh_timeout_seconds(),
            ip_refresh_sleep_interval_seconds: default_ip_refresh_sleep_interval_seconds(),
        }
    }
}

impl PoolConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_seconds)
    }

    pub fn ip_refresh_sleep_interval(&self) -> Duration {
        Duration::from_secs(self.ip_refresh_sleep_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GcConfig {
    #[serde(default = "default_gc_interval_seconds")]
    pub interval_seconds: u64,

    /// Minimum idle time before an unused lease may be reclaimed.
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_gc_interval_seconds(),
            grace_period_seconds: default_grace_period_seconds(),
        }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryConfig {
    #[serde(default = "default_metrics_address")]
    pub metrics_address: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_address: default_metrics_address(),
        }
    }
}

fn default_vpc_endpoint() -> String {
    DEFAULT_VPC_ENDPOINT.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_lock_root() -> String {
    DEFAULT_LOCK_ROOT.to_string()
}

fn default_batch_size() -> usize {
    4
}

fn default_refresh_timeout_seconds() -> u64 {
    120
}

fn default_ip_refresh_sleep_interval_seconds() -> u64 {
    5
}

fn default_gc_interval_seconds() -> u64 {
    300
}

fn default_grace_period_seconds() -> u64 {
    600
}

fn default_metrics_address() -> String {
    DEFAULT_METRICS_ADDRESS.to_string()
}
