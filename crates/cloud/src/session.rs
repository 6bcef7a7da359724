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
//! Multi-account session cache.
//!
//! A session is the unit of provider access for one (account, region) pair:
//! credentials (assumed-role when the target account is not our own), LRU
//! caches of interface and subnet descriptions, and the batching describers.
//! Sessions are memoised process-wide; lookups are racy but convergent, with
//! the last insert winning.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use opentelemetry::KeyValue;
use tokio::sync::RwLock;

use crate::arn::Arn;
use crate::batch::{BatchDescriber, BatchFetch, DESCRIBE_HEDGE_DELAYS};
use crate::hedge::hedge;
use crate::provider::{
    record_cloud_failure, CallerIdentity, CloudApi, CloudError, InstanceDescription,
    InterfaceDescription, SubnetDescription,
};

const INTERFACE_CACHE_CAPACITY: usize = 10_000;
const SUBNET_CACHE_CAPACITY: usize = 1_000;

/// Interface descriptions go stale as addresses churn; subnets are immutable
/// for practical purposes.
const INTERFACE_CACHE_TTL: Duration = Duration::from_secs(60);
const SUBNET_CACHE_TTL: Duration = Duration::from_secs(3600);

const BATCH_WINDOW: Duration = Duration::from_secs(1);
const BATCH_LIMIT: usize = 50;

const CACHE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub account_id: String,
    pub region: String,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.account_id, self.region)
    }
}

/// How a cached describe interacts with the session's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Serve from cache when fresh; store the result.
    UseCache,
    /// Always ask the provider; leave the cache untouched.
    NoCache,
    /// Drop any cached entry, ask the provider, store the result.
    InvalidateCache,
}

impl CacheStrategy {
    fn fetch_from_cache(self) -> bool {
        matches!(self, CacheStrategy::UseCache)
    }

    fn store_in_cache(self) -> bool {
        !matches!(self, CacheStrategy::NoCache)
    }
}

struct CacheEntry<T> {
    stored_at: Instant,
    value: T,
}

impl<T> CacheEntry<T> {
    fn new(value: T) -> Self {
        Self {
            stored_at: Instant::now(),
            value,
        }
    }

    fn fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

struct EniFetcher {
    api: Arc<dyn CloudApi>,
}

#[async_trait::async_trait]
impl BatchFetch for EniFetcher {
    type Item = InterfaceDescription;

    fn kind() -> &'static str {
        "network interface"
    }

    fn key_of(item: &Self::Item) -> &str {
        &item.interface_id
    }

    async fn fetch(&self, keys: &[String]) -> Result<Vec<InterfaceDescription>, CloudError> {
        self.api.describe_network_interfaces(keys).await
    }
}

struct InstanceFetcher {
    api: Arc<dyn CloudApi>,
}

#[async_trait::async_trait]
impl BatchFetch for InstanceFetcher {
    type Item = InstanceDescription;

    fn kind() -> &'static str {
        "instance"
    }

    fn key_of(item: &Self::Item) -> &str {
        &item.instance_id
    }

    async fn fetch(&self, keys: &[String]) -> Result<Vec<InstanceDescription>, CloudError> {
        self.api.describe_instances(keys).await
    }
}

/// Provider access for one (account, region) pair.
pub struct CloudSession {
    key: SessionKey,
    api: Arc<dyn CloudApi>,
    interface_cache: Mutex<LruCache<String, CacheEntry<InterfaceDescription>>>,
    subnet_cache: Mutex<LruCache<String, CacheEntry<SubnetDescription>>>,
    eni_describer: BatchDescriber<EniFetcher>,
    instance_describer: BatchDescriber<InstanceFetcher>,
}

impl CloudSession {
    pub(crate) fn new(key: SessionKey, api: Arc<dyn CloudApi>) -> Arc<Self> {
        let session = Arc::new(Self {
            key,
            api: api.clone(),
            interface_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(INTERFACE_CACHE_CAPACITY).unwrap(),
            )),
            subnet_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SUBNET_CACHE_CAPACITY).unwrap(),
            )),
            eni_describer: BatchDescriber::new(
                EniFetcher { api: api.clone() },
                BATCH_WINDOW,
                BATCH_LIMIT,
            ),
            instance_describer: BatchDescriber::new(
                InstanceFetcher { api },
                BATCH_WINDOW,
                BATCH_LIMIT,
            ),
        });
        spawn_cache_sampler(&session);
        session
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub async fn assign_private_ipv4_addresses(
        &self,
        interface_id: &str,
        count: usize,
    ) -> Result<(), CloudError> {
        self.api
            .assign_private_ipv4_addresses(interface_id, count)
            .await
            .map_err(|err| {
                record_cloud_failure("assign_private_ipv4_addresses", &err);
                err
            })
    }

    pub async fn unassign_private_ipv4_addresses(
        &self,
        interface_id: &str,
        ips: &[std::net::Ipv4Addr],
    ) -> Result<(), CloudError> {
        self.api
            .unassign_private_ipv4_addresses(interface_id, ips)
            .await
            .map_err(|err| {
                record_cloud_failure("unassign_private_ipv4_addresses", &err);
                err
            })
    }

    /// Describe an interface through the batching describer, honouring the
    /// session cache per `strategy`.
    pub async fn describe_interface(
        &self,
        interface_id: &str,
        strategy: CacheStrategy,
    ) -> Result<InterfaceDescription, CloudError> {
        if matches!(strategy, CacheStrategy::InvalidateCache) {
            self.interface_cache.lock().unwrap().pop(interface_id);
        }
        if strategy.fetch_from_cache() {
            let mut cache = self.interface_cache.lock().unwrap();
            if let Some(entry) = cache.get(interface_id) {
                if entry.fresh(INTERFACE_CACHE_TTL) {
                    return Ok(entry.value.clone());
                }
                cache.pop(interface_id);
            }
        }

        let description = self.eni_describer.describe(interface_id).await?;
        if strategy.store_in_cache() {
            self.interface_cache.lock().unwrap().put(
                interface_id.to_string(),
                CacheEntry::new(description.clone()),
            );
        }
        Ok(description)
    }

    pub async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescription, CloudError> {
        self.instance_describer.describe(instance_id).await
    }

    pub async fn describe_subnet(
        &self,
        subnet_id: &str,
        strategy: CacheStrategy,
    ) -> Result<SubnetDescription, CloudError> {
        if matches!(strategy, CacheStrategy::InvalidateCache) {
            self.subnet_cache.lock().unwrap().pop(subnet_id);
        }
        if strategy.fetch_from_cache() {
            let mut cache = self.subnet_cache.lock().unwrap();
            if let Some(entry) = cache.get(subnet_id) {
                if entry.fresh(SUBNET_CACHE_TTL) {
                    return Ok(entry.value.clone());
                }
                cache.pop(subnet_id);
            }
        }

        let subnet = hedge(
            || self.api.describe_subnet(subnet_id),
            &DESCRIBE_HEDGE_DELAYS,
        )
        .await
        .map_err(|err| {
            record_cloud_failure("describe_subnet", &err);
            err
        })?;
        if strategy.store_in_cache() {
            self.subnet_cache
                .lock()
                .unwrap()
                .put(subnet_id.to_string(), CacheEntry::new(subnet.clone()));
        }
        Ok(subnet)
    }
}

/// Sample cache sizes into the meter until the session goes away. The task
/// holds only a `Weak` back-reference so it cannot keep a dead session (or
/// its describer workers) alive.
fn spawn_cache_sampler(session: &Arc<CloudSession>) {
    let weak = Arc::downgrade(session);
    let meter = opentelemetry::global::meter("ipamd-cloud");
    let interfaces = meter
        .u64_gauge("session_cached_interfaces")
        .with_description("Interface descriptions cached in this session")
        .build();
    let subnets = meter
        .u64_gauge("session_cached_subnets")
        .with_description("Subnet descriptions cached in this session")
        .build();
    let attributes = [
        KeyValue::new("account_id", session.key.account_id.clone()),
        KeyValue::new("region", session.key.region.clone()),
    ];
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(CACHE_SAMPLE_INTERVAL).await;
            let Some(session) = weak.upgrade() else { break };
            interfaces.record(
                session.interface_cache.lock().unwrap().len() as u64,
                &attributes,
            );
            subnets.record(
                session.subnet_cache.lock().unwrap().len() as u64,
                &attributes,
            );
        }
    });
}

/// Process-wide session registry.
pub struct SessionManager {
    base: Arc<dyn CloudApi>,
    caller_identity: RwLock<Option<CallerIdentity>>,
    sessions: RwLock<HashMap<SessionKey, Arc<CloudSession>>>,
}

impl SessionManager {
    pub fn new(base: Arc<dyn CloudApi>) -> Self {
        Self {
            base,
            caller_identity: RwLock::new(None),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Who are we? Fetched lazily, once per process; the write lock is held
    /// across the RPC so a cold-start stampede still issues a single call.
    pub async fn caller_identity(&self) -> Result<CallerIdentity, CloudError> {
        if let Some(identity) = self.caller_identity.read().await.as_ref() {
            return Ok(identity.clone());
        }

        let mut guard = self.caller_identity.write().await;
        if let Some(identity) = guard.as_ref() {
            return Ok(identity.clone());
        }
        let identity = self.base.get_caller_identity().await.map_err(|err| {
            record_cloud_failure("get_caller_identity", &err);
            err
        })?;
        *guard = Some(identity.clone());
        Ok(identity)
    }

    /// The session for our own account in `region`.
    pub async fn own_session(&self, region: &str) -> Result<Arc<CloudSession>, CloudError> {
        let identity = self.caller_identity().await?;
        self.session(SessionKey {
            account_id: identity.account_id,
            region: region.to_string(),
        })
        .await
    }

    pub async fn session(&self, key: SessionKey) -> Result<Arc<CloudSession>, CloudError> {
        if let Some(existing) = self.sessions.read().await.get(&key) {
            return Ok(existing.clone());
        }

        let identity = self.caller_identity().await?;
        let api = if identity.account_id == key.account_id {
            tracing::info!(key = %key, "setting up session");
            self.base.clone()
        } else {
            // Cross-account: assume the same-named role in the target
            // account. The role name is the second path segment of our own
            // ARN resource.
            let caller_arn: Arn = identity.arn.parse()?;
            let role_name = caller_arn
                .resource_segment(1)
                .ok_or_else(|| CloudError::MalformedArn(identity.arn.clone()))?;
            let role_arn = Arn {
                partition: "aws".to_string(),
                service: "iam".to_string(),
                region: String::new(),
                account_id: key.account_id.clone(),
                resource: format!("role/{role_name}"),
            };
            tracing::info!(key = %key, role_arn = %role_arn, "setting up assume-role session");
            self.base
                .assume_role(&role_arn, &key.region)
                .await
                .map_err(|err| {
                    record_cloud_failure("assume_role", &err);
                    err
                })?
        };

        let session = CloudSession::new(key.clone(), api);
        // Racing constructions for the same key are acceptable: the last
        // write wins and the losers are dropped, taking their samplers and
        // describer workers with them.
        self.sessions.write().await.insert(key, session.clone());
        Ok(session)
    }

    pub async fn cached_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Clone, Default)]
    struct MockApi {
        account_id: String,
        identity_calls: Arc<AtomicUsize>,
        interface_describes: Arc<AtomicUsize>,
        assumed_roles: Arc<Mutex<Vec<String>>>,
    }

    impl MockApi {
        fn for_account(account_id: &str) -> Self {
            Self {
                account_id: account_id.to_string(),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl CloudApi for MockApi {
        async fn assign_private_ipv4_addresses(
            &self,
            _interface_id: &str,
            _count: usize,
        ) -> Result<(), CloudError> {
            Ok(())
        }

        async fn unassign_private_ipv4_addresses(
            &self,
            _interface_id: &str,
            _ips: &[Ipv4Addr],
        ) -> Result<(), CloudError> {
            Ok(())
        }

        async fn describe_network_interfaces(
            &self,
            interface_ids: &[String],
        ) -> Result<Vec<InterfaceDescription>, CloudError> {
            self.interface_describes.fetch_add(1, Ordering::SeqCst);
            Ok(interface_ids
                .iter()
                .map(|id| InterfaceDescription {
                    interface_id: id.clone(),
                    mac_address: "0a:00:00:00:00:01".to_string(),
                    subnet_id: "subnet-1".to_string(),
                    ipv4_addresses: vec![Ipv4Addr::new(10, 0, 0, 1)],
                    ipv6_addresses: vec![],
                })
                .collect())
        }

        async fn describe_instances(
            &self,
            instance_ids: &[String],
        ) -> Result<Vec<InstanceDescription>, CloudError> {
            Ok(instance_ids
                .iter()
                .map(|id| InstanceDescription {
                    instance_id: id.clone(),
                    instance_type: "m5.large".to_string(),
                })
                .collect())
        }

        async fn describe_subnet(&self, subnet_id: &str) -> Result<SubnetDescription, CloudError> {
            Ok(SubnetDescription {
                subnet_id: subnet_id.to_string(),
                vpc_id: "vpc-1".to_string(),
                cidr_block: "10.0.0.0/24".to_string(),
            })
        }

        async fn get_caller_identity(&self) -> Result<CallerIdentity, CloudError> {
            self.identity_calls.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for the thundering-herd test.
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(CallerIdentity {
                account_id: self.account_id.clone(),
                arn: format!(
                    "arn:aws:sts::{}:assumed-role/ipamd-host/i-0abc",
                    self.account_id
                ),
            })
        }

        async fn assume_role(
            &self,
            role_arn: &Arn,
            _region: &str,
        ) -> Result<Arc<dyn CloudApi>, CloudError> {
            self.assumed_roles.lock().unwrap().push(role_arn.to_string());
            Ok(Arc::new(self.clone()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn caller_identity_fetched_once_under_concurrency() {
        let api = MockApi::for_account("111111111111");
        let identity_calls = api.identity_calls.clone();
        let manager = SessionManager::new(Arc::new(api));

        let key = SessionKey {
            account_id: "111111111111".to_string(),
            region: "us-east-1".to_string(),
        };
        let (a, b) = tokio::join!(manager.session(key.clone()), manager.session(key));
        a.unwrap();
        b.unwrap();

        assert_eq!(identity_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.cached_sessions().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_lookup_returns_the_cached_session() {
        let manager = SessionManager::new(Arc::new(MockApi::for_account("111111111111")));
        let key = SessionKey {
            account_id: "111111111111".to_string(),
            region: "us-east-1".to_string(),
        };
        let first = manager.session(key.clone()).await.unwrap();
        let second = manager.session(key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_account_assumes_our_role_name_in_the_target_account() {
        let api = MockApi::for_account("111111111111");
        let assumed_roles = api.assumed_roles.clone();
        let manager = SessionManager::new(Arc::new(api));

        manager
            .session(SessionKey {
                account_id: "222222222222".to_string(),
                region: "us-west-2".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            assumed_roles.lock().unwrap().as_slice(),
            ["arn:aws:iam::222222222222:role/ipamd-host"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cached_interface_describe_issues_one_rpc() {
        let api = MockApi::for_account("111111111111");
        let describes = api.interface_describes.clone();
        let manager = SessionManager::new(Arc::new(api));
        let session = manager.own_session("us-east-1").await.unwrap();

        let first = session
            .describe_interface("eni-1", CacheStrategy::UseCache)
            .await
            .unwrap();
        let second = session
            .describe_interface("eni-1", CacheStrategy::UseCache)
            .await
            .unwrap();
        assert_eq!(first.interface_id, second.interface_id);
        assert_eq!(describes.load(Ordering::SeqCst), 1);

        session
            .describe_interface("eni-1", CacheStrategy::InvalidateCache)
            .await
            .unwrap();
        assert_eq!(describes.load(Ordering::SeqCst), 2);
    }
}
