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
//! Hardware-dependent interface limits by instance type.

/// Applied when the instance type is unknown; small enough to be safe on
/// every current shape.
pub const DEFAULT_MAX_IPV4_ADDRESSES: usize = 6;

/// Maximum number of IPv4 addresses (primary included) one interface of this
/// instance type can carry.
pub fn max_ipv4_addresses(instance_type: &str) -> usize {
    match instance_type {
        "t3.nano" | "t3.micro" => 2,
        "t3.small" => 4,
        "t3.medium" => 6,
        "t3.large" => 12,
        "t3.xlarge" | "t3.2xlarge" => 15,
        "m5.large" | "c5.large" | "r5.large" => 10,
        "m5.xlarge" | "m5.2xlarge" | "c5.xlarge" | "c5.2xlarge" | "r5.xlarge" | "r5.2xlarge" => 15,
        "m5.4xlarge" | "m5.8xlarge" | "m5.12xlarge" | "c5.4xlarge" | "c5.9xlarge" | "c5.12xlarge"
        | "r5.4xlarge" | "r5.8xlarge" | "r5.12xlarge" => 30,
        "m5.16xlarge" | "m5.24xlarge" | "c5.18xlarge" | "c5.24xlarge" | "r5.16xlarge"
        | "r5.24xlarge" => 50,
        _ => DEFAULT_MAX_IPV4_ADDRESSES,
    }
}
