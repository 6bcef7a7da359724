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
//! The ipamd host agent: wires the pool managers for this host's interfaces
//! and runs garbage collection on a timer. Allocation itself is a library
//! concern of the container runtime; this process only has to keep the pools
//! from silting up.

pub use command_line::{AgentCommand, AllocateOptions, GcOptions, Options, RunOptions};

pub mod agent_config;
mod command_line;
pub mod instrumentation;

use std::sync::Arc;

use eyre::WrapErr;
use fslocker::{ExclusiveLock, FsLocker};
use ipamd_cloud::{
    CloudApi, HttpVpcClient, ImdsClient, InstanceMetadata, MetadataNetworkInterface,
    NetworkInterface, SessionKey, SessionManager,
};
use ipamd_pool::IpPoolManager;
use opentelemetry::KeyValue;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;

use crate::agent_config::AgentConfig;

pub async fn start(options: Options) -> eyre::Result<()> {
    let config = match &options.config_path {
        Some(path) => AgentConfig::load_from(path)
            .wrap_err_with(|| format!("loading config from {}", path.display()))?,
        None => AgentConfig::default(),
    };

    match options.cmd {
        Some(AgentCommand::Gc(gc_options)) => gc_once(config, gc_options).await,
        Some(AgentCommand::Allocate(allocate_options)) => allocate(config, allocate_options).await,
        Some(AgentCommand::Run(run_options)) => run(config, run_options).await,
        None => run(config, RunOptions::default()).await,
    }
}

struct Host {
    pools: Vec<(String, IpPoolManager)>,
    // Held for the lifetime of the process so the allocation scan can never
    // hand out a primary address.
    _primary_guards: Vec<ExclusiveLock>,
}

async fn setup(config: &AgentConfig) -> eyre::Result<Host> {
    let base: Arc<dyn CloudApi> = Arc::new(HttpVpcClient::new(
        config.vpc.endpoint.clone(),
        config.vpc.region.clone(),
    ));
    let sessions = SessionManager::new(base);
    let session = if config.vpc.account_id.is_empty() {
        sessions.own_session(&config.vpc.region).await?
    } else {
        sessions
            .session(SessionKey {
                account_id: config.vpc.account_id.clone(),
                region: config.vpc.region.clone(),
            })
            .await?
    };

    let instance_type = if config.machine.instance_type.is_empty() {
        eyre::ensure!(
            !config.machine.instance_id.is_empty(),
            "either machine.instance-id or machine.instance-type must be configured"
        );
        session
            .describe_instance(&config.machine.instance_id)
            .await
            .wrap_err("discovering the instance type")?
            .instance_type
    } else {
        config.machine.instance_type.clone()
    };

    let locker = Arc::new(FsLocker::new(&config.pool.lock_root)?);
    let metadata: Arc<dyn InstanceMetadata> = Arc::new(ImdsClient::new());

    let mut pools = Vec::new();
    let mut primary_guards = Vec::new();
    for interface_config in &config.machine.interfaces {
        let interface: Arc<dyn NetworkInterface> = Arc::new(MetadataNetworkInterface::new(
            interface_config.interface_id.clone(),
            interface_config.mac.clone(),
            metadata.clone(),
        ));
        interface
            .refresh()
            .await
            .wrap_err_with(|| format!("refreshing interface {}", interface_config.interface_id))?;

        let pool = IpPoolManager::new(
            interface,
            locker.clone(),
            session.clone(),
            instance_type.clone(),
        )
        .with_ip_refresh_sleep_interval(config.pool.ip_refresh_sleep_interval());

        if let Some(guard) = pool.guard_primary().await? {
            primary_guards.push(guard);
        }
        pools.push((interface_config.interface_id.clone(), pool));
    }

    tracing::info!(
        interfaces = pools.len(),
        instance_type = %instance_type,
        "host setup complete"
    );
    Ok(Host {
        pools,
        _primary_guards: primary_guards,
    })
}

async fn run(config: AgentConfig, options: RunOptions) -> eyre::Result<()> {
    serve_metrics(&config.telemetry.metrics_address)?;
    let host = setup(&config).await?;

    let gc_interval = options.gc_interval.unwrap_or_else(|| config.gc.interval());
    let grace_period = options
        .grace_period
        .unwrap_or_else(|| config.gc.grace_period());
    tracing::info!(
        gc_interval_secs = gc_interval.as_secs(),
        grace_period_secs = grace_period.as_secs(),
        "starting GC loop"
    );

    let meter = instrumentation::get_agent_meter();
    let gc_passes = meter
        .u64_counter("gc_passes")
        .with_description("Completed GC passes per interface")
        .build();
    let gc_failures = meter
        .u64_counter("gc_failures")
        .with_description("Failed GC passes per interface")
        .build();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut timer = tokio::time::interval(gc_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received TERM, stopping GC loop");
                break;
            }
            _ = timer.tick() => {
                for (interface_id, pool) in &host.pools {
                    let attributes = [KeyValue::new("interface", interface_id.clone())];
                    match pool.do_gc(grace_period).await {
                        Ok(()) => gc_passes.add(1, &attributes),
                        Err(err) => {
                            gc_failures.add(1, &attributes);
                            tracing::error!(interface = %interface_id, error = %err, "GC pass failed");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Lease one address the way the container runtime would, print it, and keep
/// the lease alive until TERM. Useful for smoke-testing a host's pool.
async fn allocate(config: AgentConfig, options: AllocateOptions) -> eyre::Result<()> {
    let host = setup(&config).await?;
    let (interface_id, pool) = match &options.interface_id {
        Some(id) => host
            .pools
            .iter()
            .find(|(pool_id, _)| pool_id == id)
            .ok_or_else(|| eyre::eyre!("interface {id} is not configured"))?,
        None => host
            .pools
            .first()
            .ok_or_else(|| eyre::eyre!("no interfaces configured"))?,
    };

    let batch_size = options.batch_size.unwrap_or(config.pool.batch_size);
    let refresh_timeout = options
        .refresh_timeout
        .unwrap_or_else(|| config.pool.refresh_timeout());

    let (address, lease) = if options.ipv6 {
        let (ip, lease) = pool.allocate_ipv6().await?;
        (ip.to_string(), lease)
    } else {
        let (ip, lease) = pool.allocate_ipv4(batch_size, refresh_timeout).await?;
        (ip.to_string(), lease)
    };
    println!("{address}");
    tracing::info!(interface = %interface_id, address = %address, "leased address, holding until TERM");

    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    drop(lease);
    Ok(())
}

async fn gc_once(config: AgentConfig, options: GcOptions) -> eyre::Result<()> {
    let host = setup(&config).await?;
    let grace_period = options
        .grace_period
        .unwrap_or_else(|| config.gc.grace_period());
    for (interface_id, pool) in &host.pools {
        pool.do_gc(grace_period)
            .await
            .wrap_err_with(|| format!("GC failed on interface {interface_id}"))?;
    }
    Ok(())
}

fn serve_metrics(address: &str) -> eyre::Result<()> {
    let addr: std::net::SocketAddr = address
        .parse()
        .wrap_err_with(|| format!("bad metrics address {address}"))?;
    let router = instrumentation::get_metrics_router(instrumentation::get_prometheus_registry());
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(error = %err, "could not bind metrics listener");
                return;
            }
        };
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!(error = %err, "metrics server stopped");
        }
    });
    Ok(())
}
