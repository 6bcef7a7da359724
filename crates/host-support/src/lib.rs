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
//! Shared process-setup helpers for the ipamd binaries and their tests.

use std::sync::Once;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static LOG_SETUP: Once = Once::new();

/// Install the process-wide tracing subscriber. Safe to call more than once;
/// only the first call has any effect, which lets every integration test
/// call it without coordination.
pub fn init_logging() -> eyre::Result<()> {
    LOG_SETUP.call_once(|| {
        subscriber()
            .try_init()
            .expect("tracing_subscriber setup failed");
    });
    Ok(())
}

// A logging subscriber for use on the current thread.
// Usually you want `init_logging()` instead.
//
// Usage: `let guard = subscriber().set_default()`
// Subscriber is unregistered when guard is dropped.
pub fn subscriber() -> impl SubscriberInitExt {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
        .add_directive("tower=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("h2=warn".parse().unwrap());
    let stdout_formatter = tracing_subscriber::fmt::layer().compact();
    tracing_subscriber::registry().with(stdout_formatter.with_filter(env_filter))
}
