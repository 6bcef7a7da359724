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
//! HTTP client for the on-host instance metadata service.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::interface::{InstanceMetadata, MetadataError};

const DEFAULT_BASE_URL: &str = "http://169.254.169.254";

/// Client for the link-local metadata endpoint. The interface listing lives
/// under `/latest/meta-data/network/interfaces/macs/<mac>/`, one
/// newline-separated address per line, primary IPv4 first.
pub struct ImdsClient {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl Default for ImdsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ImdsClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client somewhere else, e.g. a mock server in tests.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    async fn get_text(&self, path: &str) -> Result<String, MetadataError> {
        let uri: Uri = format!("{}{}", self.base_url, path)
            .parse()
            .map_err(|err| MetadataError::Transport(format!("bad metadata URI: {err}")))?;
        let request = hyper::Request::builder()
            .method(hyper::Method::GET)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .map_err(|err| MetadataError::Transport(err.to_string()))?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|err| MetadataError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Http {
                status: status.as_u16(),
            });
        }
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| MetadataError::Transport(err.to_string()))?
            .to_bytes();
        String::from_utf8(body.to_vec())
            .map_err(|err| MetadataError::Parse(format!("non-utf8 metadata body: {err}")))
    }

    async fn address_list<T: FromStr>(&self, path: &str) -> Result<Vec<T>, MetadataError>
    where
        T::Err: std::fmt::Display,
    {
        let body = self.get_text(path).await?;
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse()
                    .map_err(|err| MetadataError::Parse(format!("bad address {line:?}: {err}")))
            })
            .collect()
    }
}

#[async_trait]
impl InstanceMetadata for ImdsClient {
    async fn local_ipv4_addresses(&self, mac: &str) -> Result<Vec<Ipv4Addr>, MetadataError> {
        self.address_list(&format!(
            "/latest/meta-data/network/interfaces/macs/{mac}/local-ipv4s"
        ))
        .await
    }

    async fn ipv6_addresses(&self, mac: &str) -> Result<Vec<Ipv6Addr>, MetadataError> {
        self.address_list(&format!(
            "/latest/meta-data/network/interfaces/macs/{mac}/ipv6s"
        ))
        .await
    }
}
