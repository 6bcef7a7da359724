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
use std::time::Duration;

fn main() -> eyre::Result<()> {
    ipamd_host_support::init_logging()?;

    // We need a multi-threaded runtime since background tasks (describer
    // workers, cache samplers, the metrics server) keep running while the
    // foreground performs GC
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(ipamd_agent::start(ipamd_agent::Options::load()))?;
    rt.shutdown_timeout(Duration::from_secs(2));
    Ok(())
}
