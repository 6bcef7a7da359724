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
//! The seam between this host and the VPC provider's control plane.
//!
//! Everything the pool manager and session cache need from the provider is
//! behind [`CloudApi`], so production can speak to the real control plane
//! while tests substitute an in-memory implementation.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arn::{Arn, ArnParseError};

/// Errors surfaced verbatim from the provider. `Clone` because one failed
/// batched RPC has to be reported to every waiter that was coalesced into it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    /// The control plane rejected the request.
    #[error("cloud API error {code}: {message}")]
    Api { code: String, message: String },

    /// The request never produced a usable response.
    #[error("cloud transport error: {0}")]
    Transport(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("malformed ARN: {0}")]
    MalformedArn(String),
}

impl From<ArnParseError> for CloudError {
    fn from(err: ArnParseError) -> Self {
        CloudError::MalformedArn(err.0)
    }
}

/// Record a failed provider RPC into the active tracing span.
pub(crate) fn record_cloud_failure(operation: &'static str, err: &CloudError) {
    tracing::warn!(operation, error = %err, "cloud RPC failed");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub interface_id: String,
    pub mac_address: String,
    pub subnet_id: String,
    /// Primary address first; secondaries follow in provider order.
    pub ipv4_addresses: Vec<Ipv4Addr>,
    pub ipv6_addresses: Vec<Ipv6Addr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub instance_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetDescription {
    pub subnet_id: String,
    pub vpc_id: String,
    pub cidr_block: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    /// Kept as a string; parsed only where role construction needs it.
    pub arn: String,
}

/// Provider control-plane surface consumed by this crate and the pool
/// manager. Describe calls take id slices because the session layer batches
/// them; implementations may return fewer descriptions than ids requested
/// (unknown ids are simply absent).
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Ask the provider to add `count` secondary private IPv4 addresses to
    /// the interface. The new addresses appear asynchronously in the
    /// instance metadata; callers poll for convergence.
    async fn assign_private_ipv4_addresses(
        &self,
        interface_id: &str,
        count: usize,
    ) -> Result<(), CloudError>;

    /// Release a set of secondary private IPv4 addresses back to the
    /// provider.
    async fn unassign_private_ipv4_addresses(
        &self,
        interface_id: &str,
        ips: &[Ipv4Addr],
    ) -> Result<(), CloudError>;

    async fn describe_network_interfaces(
        &self,
        interface_ids: &[String],
    ) -> Result<Vec<InterfaceDescription>, CloudError>;

    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceDescription>, CloudError>;

    async fn describe_subnet(&self, subnet_id: &str) -> Result<SubnetDescription, CloudError>;

    async fn get_caller_identity(&self) -> Result<CallerIdentity, CloudError>;

    /// Obtain a handle whose requests run under the given role's short-lived
    /// credentials.
    async fn assume_role(
        &self,
        role_arn: &Arn,
        region: &str,
    ) -> Result<Arc<dyn CloudApi>, CloudError>;
}
