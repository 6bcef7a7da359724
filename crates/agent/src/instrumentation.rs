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
use std::sync::LazyLock;

use axum::routing::get;
use axum::Router;
use eyre::WrapErr;
use opentelemetry::metrics::{Meter, MeterProvider};
use opentelemetry::KeyValue;
use opentelemetry_prometheus::ExporterBuilder;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_NAMESPACE};
use prometheus::{Encoder, Registry, TextEncoder};

static SINGLETON: LazyLock<InstrumentationSingleton> =
    LazyLock::new(InstrumentationSingleton::init);

struct InstrumentationSingleton {
    // SdkMeterProvider has an inner Arc, no need to Arc-wrap it ourselves.
    _meter_provider: SdkMeterProvider,

    // Registry has an inner Arc, no need to Arc-wrap it.
    prometheus_registry: Registry,

    // Meter has an inner Arc.
    agent_meter: Meter,
}

impl InstrumentationSingleton {
    // Build the standard instrumentation config for the agent.
    fn try_init() -> eyre::Result<Self> {
        let prometheus_registry = Registry::new();
        let exporter = ExporterBuilder::default()
            .with_registry(prometheus_registry.clone())
            .without_scope_info()
            .without_target_info()
            .build()
            .context("Could not build Prometheus exporter")?;

        let resource_attributes = opentelemetry_sdk::Resource::builder()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, "ipamd-agent"),
                KeyValue::new(SERVICE_NAMESPACE, "ipamd"),
            ])
            .build();

        let meter_provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .with_resource(resource_attributes)
            .build();

        let agent_meter = meter_provider.meter("ipamd-agent");

        // The session cache samplers in ipamd-cloud record through the
        // global provider; make sure they pick up ours.
        opentelemetry::global::set_meter_provider(meter_provider.clone());

        Ok(InstrumentationSingleton {
            _meter_provider: meter_provider,
            prometheus_registry,
            agent_meter,
        })
    }

    fn init() -> Self {
        Self::try_init().expect("instrumentation setup failed")
    }
}

pub fn get_prometheus_registry() -> Registry {
    SINGLETON.prometheus_registry.clone()
}

pub fn get_agent_meter() -> Meter {
    SINGLETON.agent_meter.clone()
}

/// Router exposing the registry in the Prometheus text format at `/metrics`.
pub fn get_metrics_router(registry: Registry) -> Router {
    Router::new().route(
        "/metrics",
        get(move || async move {
            let metric_families = registry.gather();
            let mut buffer = Vec::new();
            if let Err(err) = TextEncoder::new().encode(&metric_families, &mut buffer) {
                tracing::error!(error = %err, "could not encode metrics");
            }
            buffer
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_and_meter_come_from_one_singleton() {
        let _meter = get_agent_meter();
        let registry = get_prometheus_registry();
        // Nothing recorded yet; gathering must still work.
        let _ = registry.gather();
    }
}
