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
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser)]
#[clap(name = "ipamd")]
pub struct Options {
    /// The path to the agent configuration file.
    /// This file will hold data in the `AgentConfig` format.
    #[clap(long)]
    pub config_path: Option<PathBuf>,

    #[clap(subcommand)]
    pub cmd: Option<AgentCommand>,
}

#[derive(Parser, Debug)]
pub enum AgentCommand {
    #[clap(about = "Run is the normal command. Runs the GC loop forever.")]
    Run(RunOptions),

    #[clap(about = "Perform one garbage-collection pass and exit.")]
    Gc(GcOptions),

    #[clap(about = "Lease one address, print it, and hold the lease until TERM.")]
    Allocate(AllocateOptions),
}

#[derive(Parser, Debug, Default)]
pub struct RunOptions {
    #[clap(long, value_parser = humantime::parse_duration,
           help = "Override the GC interval from the config file, e.g. 5m")]
    pub gc_interval: Option<Duration>,

    #[clap(long, value_parser = humantime::parse_duration,
           help = "Override the GC grace period from the config file, e.g. 10m")]
    pub grace_period: Option<Duration>,
}

#[derive(Parser, Debug, Default)]
pub struct GcOptions {
    #[clap(long, value_parser = humantime::parse_duration,
           help = "Override the GC grace period from the config file, e.g. 10m")]
    pub grace_period: Option<Duration>,
}

#[derive(Parser, Debug, Default)]
pub struct AllocateOptions {
    #[clap(long, help = "Interface to allocate from; defaults to the first configured interface")]
    pub interface_id: Option<String>,

    #[clap(long, help = "Lease an IPv6 address instead of an IPv4 one")]
    pub ipv6: bool,

    #[clap(long, help = "Override the expansion batch size from the config file")]
    pub batch_size: Option<usize>,

    #[clap(long, value_parser = humantime::parse_duration,
           help = "Override the expansion refresh timeout, e.g. 30s")]
    pub refresh_timeout: Option<Duration>,
}

impl Options {
    pub fn load() -> Self {
        Self::parse()
    }
}
