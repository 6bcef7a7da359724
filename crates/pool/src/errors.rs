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
use ipamd_cloud::{CloudError, MetadataError};
use thiserror::Error;

/// Errors surfaced by the pool manager. Lock contention on individual lease
/// files is never one of them; it just means "that address is taken".
#[derive(Debug, Error)]
pub enum PoolError {
    /// The interface already carries as many IPv4 addresses as the instance
    /// type permits. Callers should move on to another interface.
    #[error("maximum number of IP addresses allocated")]
    MaxAddressesAllocated,

    /// Every address is currently leased, and expansion (if attempted)
    /// produced nothing leasable. Transient.
    #[error("no free IP address found")]
    NoFreeAddress,

    /// The provider accepted a mutation but the local interface view did not
    /// converge within the allotted time. Retry later.
    #[error("IP refresh failed")]
    RefreshFailed,

    /// Could not obtain the interface's configuration lock within the
    /// one-minute window.
    #[error("timed out waiting for the interface configuration lock")]
    ConfigLockTimeout,

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
