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
//! JSON-over-HTTP implementation of [`CloudApi`] against the deployment's
//! VPC control endpoint.
//!
//! One POST per action under `/vpc/`. Assume-role hands back a session token
//! that subsequent requests carry as a bearer credential. Non-2xx responses
//! are decoded as `{code, message}` when possible and surfaced verbatim.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::arn::Arn;
use crate::provider::{
    CallerIdentity, CloudApi, CloudError, InstanceDescription, InterfaceDescription,
    SubnetDescription,
};

#[derive(Serialize)]
struct AssignPrivateIpAddressesRequest<'a> {
    network_interface_id: &'a str,
    secondary_private_ip_address_count: usize,
}

#[derive(Serialize)]
struct UnassignPrivateIpAddressesRequest<'a> {
    network_interface_id: &'a str,
    private_ip_addresses: &'a [Ipv4Addr],
}

#[derive(Serialize)]
struct DescribeNetworkInterfacesRequest<'a> {
    network_interface_ids: &'a [String],
}

#[derive(Deserialize)]
struct DescribeNetworkInterfacesResponse {
    network_interfaces: Vec<InterfaceDescription>,
}

#[derive(Serialize)]
struct DescribeInstancesRequest<'a> {
    instance_ids: &'a [String],
}

#[derive(Deserialize)]
struct DescribeInstancesResponse {
    instances: Vec<InstanceDescription>,
}

#[derive(Serialize)]
struct DescribeSubnetRequest<'a> {
    subnet_id: &'a str,
}

#[derive(Serialize)]
struct AssumeRoleRequest<'a> {
    role_arn: String,
    region: &'a str,
}

#[derive(Deserialize)]
struct AssumeRoleResponse {
    session_token: String,
}

#[derive(Serialize, Deserialize)]
struct EmptyBody {}

#[derive(Deserialize)]
struct ApiErrorBody {
    code: String,
    message: String,
}

/// HTTP client for the VPC control endpoint.
pub struct HttpVpcClient {
    endpoint: String,
    region: String,
    session_token: Option<String>,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpVpcClient {
    pub fn new(endpoint: impl Into<String>, region: impl Into<String>) -> Self {
        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        Self {
            endpoint,
            region: region.into(),
            session_token: None,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    fn transport(err: impl std::fmt::Display) -> CloudError {
        CloudError::Transport(err.to_string())
    }

    async fn call<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp, CloudError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let uri: Uri = format!("{}/vpc/{}", self.endpoint, action)
            .parse()
            .map_err(Self::transport)?;
        let body = serde_json::to_vec(request).map_err(Self::transport)?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.session_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(Self::transport)?;

        let response = self.client.request(request).await.map_err(Self::transport)?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(Self::transport)?
            .to_bytes();

        if !status.is_success() {
            if let Ok(body) = serde_json::from_slice::<ApiErrorBody>(&bytes) {
                return Err(CloudError::Api {
                    code: body.code,
                    message: body.message,
                });
            }
            return Err(CloudError::Api {
                code: status.as_u16().to_string(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| Self::transport(format!("undecodable {action} response: {err}")))
    }
}

#[async_trait]
impl CloudApi for HttpVpcClient {
    async fn assign_private_ipv4_addresses(
        &self,
        interface_id: &str,
        count: usize,
    ) -> Result<(), CloudError> {
        let _: EmptyBody = self
            .call(
                "AssignPrivateIpAddresses",
                &AssignPrivateIpAddressesRequest {
                    network_interface_id: interface_id,
                    secondary_private_ip_address_count: count,
                },
            )
            .await?;
        Ok(())
    }

    async fn unassign_private_ipv4_addresses(
        &self,
        interface_id: &str,
        ips: &[Ipv4Addr],
    ) -> Result<(), CloudError> {
        let _: EmptyBody = self
            .call(
                "UnassignPrivateIpAddresses",
                &UnassignPrivateIpAddressesRequest {
                    network_interface_id: interface_id,
                    private_ip_addresses: ips,
                },
            )
            .await?;
        Ok(())
    }

    async fn describe_network_interfaces(
        &self,
        interface_ids: &[String],
    ) -> Result<Vec<InterfaceDescription>, CloudError> {
        let response: DescribeNetworkInterfacesResponse = self
            .call(
                "DescribeNetworkInterfaces",
                &DescribeNetworkInterfacesRequest {
                    network_interface_ids: interface_ids,
                },
            )
            .await?;
        Ok(response.network_interfaces)
    }

    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceDescription>, CloudError> {
        let response: DescribeInstancesResponse = self
            .call(
                "DescribeInstances",
                &DescribeInstancesRequest { instance_ids },
            )
            .await?;
        Ok(response.instances)
    }

    async fn describe_subnet(&self, subnet_id: &str) -> Result<SubnetDescription, CloudError> {
        self.call("DescribeSubnet", &DescribeSubnetRequest { subnet_id })
            .await
    }

    async fn get_caller_identity(&self) -> Result<CallerIdentity, CloudError> {
        self.call("GetCallerIdentity", &EmptyBody {}).await
    }

    async fn assume_role(
        &self,
        role_arn: &Arn,
        region: &str,
    ) -> Result<Arc<dyn CloudApi>, CloudError> {
        let response: AssumeRoleResponse = self
            .call(
                "AssumeRole",
                &AssumeRoleRequest {
                    role_arn: role_arn.to_string(),
                    region,
                },
            )
            .await?;
        Ok(Arc::new(Self {
            endpoint: self.endpoint.clone(),
            region: region.to_string(),
            session_token: Some(response.session_token),
            client: self.client.clone(),
        }))
    }
}

impl HttpVpcClient {
    pub fn region(&self) -> &str {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    #[derive(Default)]
    struct ServerState {
        assign_calls: AtomicUsize,
        last_authorization: std::sync::Mutex<Option<String>>,
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn assign_posts_the_interface_and_count() {
        let state = Arc::new(ServerState::default());
        let router = Router::new()
            .route(
                "/vpc/AssignPrivateIpAddresses",
                post(
                    |State(state): State<Arc<ServerState>>, Json(body): Json<Value>| async move {
                        state.assign_calls.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(body["network_interface_id"], "eni-1");
                        assert_eq!(body["secondary_private_ip_address_count"], 4);
                        Json(json!({}))
                    },
                ),
            )
            .with_state(state.clone());
        let client = HttpVpcClient::new(serve(router).await, "us-east-1");

        client
            .assign_private_ipv4_addresses("eni-1", 4)
            .await
            .unwrap();
        assert_eq!(state.assign_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn control_plane_errors_surface_verbatim() {
        let router = Router::new().route(
            "/vpc/DescribeSubnet",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    Json(json!({"code": "InvalidSubnetID.NotFound", "message": "no such subnet"})),
                )
            }),
        );
        let client = HttpVpcClient::new(serve(router).await, "us-east-1");

        let err = client.describe_subnet("subnet-404").await.unwrap_err();
        assert_eq!(
            err,
            CloudError::Api {
                code: "InvalidSubnetID.NotFound".to_string(),
                message: "no such subnet".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn assumed_role_client_sends_the_session_token() {
        let state = Arc::new(ServerState::default());
        let router = Router::new()
            .route(
                "/vpc/AssumeRole",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["role_arn"], "arn:aws:iam::222222222222:role/ipamd-host");
                    Json(json!({"session_token": "tok-123"}))
                }),
            )
            .route(
                "/vpc/GetCallerIdentity",
                post(
                    |State(state): State<Arc<ServerState>>, headers: HeaderMap| async move {
                        *state.last_authorization.lock().unwrap() = headers
                            .get(AUTHORIZATION)
                            .map(|value| value.to_str().unwrap().to_string());
                        Json(json!({"account_id": "222222222222",
                            "arn": "arn:aws:sts::222222222222:assumed-role/ipamd-host/i-0abc"}))
                    },
                ),
            )
            .with_state(state.clone());
        let client = HttpVpcClient::new(serve(router).await, "us-east-1");

        let role_arn: Arn = "arn:aws:iam::222222222222:role/ipamd-host".parse().unwrap();
        let assumed = client.assume_role(&role_arn, "us-west-2").await.unwrap();
        let identity = assumed.get_caller_identity().await.unwrap();

        assert_eq!(identity.account_id, "222222222222");
        assert_eq!(
            state.last_authorization.lock().unwrap().as_deref(),
            Some("Bearer tok-123")
        );
    }

    #[tokio::test]
    async fn describe_network_interfaces_round_trips() {
        let router = Router::new().route(
            "/vpc/DescribeNetworkInterfaces",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["network_interface_ids"], json!(["eni-1"]));
                Json(json!({"network_interfaces": [{
                    "interface_id": "eni-1",
                    "mac_address": "0a:00:00:00:00:01",
                    "subnet_id": "subnet-1",
                    "ipv4_addresses": ["10.0.0.1", "10.0.0.2"],
                    "ipv6_addresses": ["fd00::1"],
                }]}))
            }),
        );
        let client = HttpVpcClient::new(serve(router).await, "us-east-1");

        let interfaces = client
            .describe_network_interfaces(&["eni-1".to_string()])
            .await
            .unwrap();
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].ipv4_addresses.len(), 2);
        assert_eq!(interfaces[0].ipv6_addresses[0].to_string(), "fd00::1");
    }
}
