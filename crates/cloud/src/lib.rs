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
//! Cloud-side plumbing for the IP pool manager: the provider API seam, the
//! multi-account session cache, hedged and batched describe RPCs, and the
//! locally-refreshed view of a network interface.

pub mod arn;
pub mod batch;
pub mod hedge;
pub mod http;
pub mod imds;
pub mod interface;
pub mod provider;
pub mod session;

pub use arn::Arn;
pub use hedge::hedge;
pub use http::HttpVpcClient;
pub use imds::ImdsClient;
pub use interface::{InstanceMetadata, MetadataError, MetadataNetworkInterface, NetworkInterface};
pub use provider::{
    CallerIdentity, CloudApi, CloudError, InstanceDescription, InterfaceDescription,
    SubnetDescription,
};
pub use session::{CacheStrategy, CloudSession, SessionKey, SessionManager};
