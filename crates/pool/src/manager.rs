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
//! The per-interface allocator and garbage collector.
//!
//! All mutation of an interface's address set on this host is serialised by
//! the interface's `ip-config` lock. Individual addresses are leased through
//! per-IP lock files whose mtime records last use; a lease file passes
//! through absent -> idle -> held -> idle, and only GC moves it back to
//! absent after the address has left the interface.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fslocker::{ExclusiveLock, FsLocker, LockError};
use ipamd_cloud::{CacheStrategy, CloudSession, NetworkInterface};
use rand::seq::SliceRandom;

use crate::errors::PoolError;
use crate::limits;

pub const DEFAULT_IP_REFRESH_SLEEP_INTERVAL: Duration = Duration::from_secs(5);

const CONFIG_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const EXPANSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Free convergence: up to 180 refreshes, declared done after 4 positive
/// observations in a row. A single positive is not enough because the
/// metadata service can briefly flap back to the old address set.
const FREE_CONVERGENCE_ITERATIONS: usize = 180;
const FREE_CONVERGENCE_REQUIRED_STREAK: usize = 4;

/// Records idle at least this long (and no longer backed by an interface
/// address) are deleted during GC's cleanup phase.
const FILE_CLEANUP_IDLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

const IP_ADDRESSES_DIR: &str = "ip-addresses";
const IP_CONFIG_LOCK: &str = "ip-config";

/// Allocator and garbage collector for one interface. A process may run one
/// manager per attached interface; managers on different interfaces operate
/// independently.
pub struct IpPoolManager {
    interface: Arc<dyn NetworkInterface>,
    locker: Arc<FsLocker>,
    session: Arc<CloudSession>,
    instance_type: String,
    ip_refresh_sleep_interval: Duration,
}

impl IpPoolManager {
    pub fn new(
        interface: Arc<dyn NetworkInterface>,
        locker: Arc<FsLocker>,
        session: Arc<CloudSession>,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            interface,
            locker,
            session,
            instance_type: instance_type.into(),
            ip_refresh_sleep_interval: DEFAULT_IP_REFRESH_SLEEP_INTERVAL,
        }
    }

    /// Override the free-convergence poll cadence (default 5 s).
    pub fn with_ip_refresh_sleep_interval(mut self, interval: Duration) -> Self {
        self.ip_refresh_sleep_interval = interval;
        self
    }

    fn ip_addresses_path(&self) -> PathBuf {
        self.interface.lock_path().join(IP_ADDRESSES_DIR)
    }

    fn ip_address_path(&self, name: &str) -> PathBuf {
        self.ip_addresses_path().join(name)
    }

    async fn lock_configuration(&self) -> Result<ExclusiveLock, PoolError> {
        let path = self.interface.lock_path().join(IP_CONFIG_LOCK);
        tracing::debug!(path = %path.display(), "taking exclusive lock for interface reconfiguration");
        match self
            .locker
            .exclusive_lock(&path, Some(CONFIG_LOCK_TIMEOUT))
            .await
        {
            Ok(lock) => Ok(lock),
            Err(LockError::WouldBlock) => Err(PoolError::ConfigLockTimeout),
            Err(LockError::Io(err)) => Err(err.into()),
        }
    }

    /// Non-blocking lease attempt on one address. `Ok(None)` means the
    /// address is held elsewhere and the caller should move on.
    async fn try_allocate(&self, name: &str) -> Result<Option<ExclusiveLock>, PoolError> {
        match self
            .locker
            .exclusive_lock(self.ip_address_path(name), Some(Duration::ZERO))
            .await
        {
            Ok(lock) => Ok(Some(lock)),
            Err(LockError::WouldBlock) => Ok(None),
            Err(LockError::Io(err)) => Err(err.into()),
        }
    }

    /// Take and hold the primary address's lease for the lifetime of the
    /// returned token. With the primary permanently contended, the
    /// allocation scan below skips it without a special case. Returns `None`
    /// when another process on this host already guards it.
    pub async fn guard_primary(&self) -> Result<Option<ExclusiveLock>, PoolError> {
        let Some(primary) = self.interface.ipv4_addresses().first().copied() else {
            return Ok(None);
        };
        match self.try_allocate(&primary.to_string()).await? {
            Some(lock) => {
                lock.bump()?;
                Ok(Some(lock))
            }
            None => Ok(None),
        }
    }

    /// Scan the interface's addresses in order (primary first, then
    /// provider order) and lease the first one whose lock is free.
    async fn do_allocate(&self) -> Result<(Ipv4Addr, ExclusiveLock), PoolError> {
        for ip in self.interface.ipv4_addresses() {
            match self.try_allocate(&ip.to_string()).await? {
                Some(lock) => {
                    lock.bump()?;
                    return Ok((ip, lock));
                }
                None => continue,
            }
        }
        Err(PoolError::NoFreeAddress)
    }

    /// Lease an IPv4 address, expanding the pool by up to `batch_size`
    /// addresses when everything is taken.
    ///
    /// Returns the address together with the lease lock; the caller keeps
    /// the lock for as long as it owns the address. When expansion hits the
    /// instance type's address cap this reports `NoFreeAddress` (the
    /// allocator's own verdict), not `MaxAddressesAllocated`.
    pub async fn allocate_ipv4(
        &self,
        batch_size: usize,
        refresh_timeout: Duration,
    ) -> Result<(Ipv4Addr, ExclusiveLock), PoolError> {
        let _config_lock = self.lock_configuration().await.map_err(|err| {
            tracing::warn!(error = %err, "unable to get lock during allocation");
            err
        })?;

        self.interface.refresh().await.map_err(|err| {
            tracing::warn!(error = %err, "unable to refresh interface before allocating");
            err
        })?;

        match self.do_allocate().await {
            Ok(allocation) => return Ok(allocation),
            Err(PoolError::NoFreeAddress) => {}
            Err(err) => {
                tracing::warn!(error = %err, "unable to allocate IP");
                return Err(err);
            }
        }

        match self.assign_more_ips(batch_size, refresh_timeout).await {
            Ok(()) => {}
            Err(PoolError::MaxAddressesAllocated) => {
                tracing::info!(
                    instance_type = %self.instance_type,
                    "interface is at its IPv4 address cap"
                );
                return Err(PoolError::NoFreeAddress);
            }
            Err(err) => {
                tracing::warn!(error = %err, "unable to assign more IPs");
                return Err(err);
            }
        }

        self.do_allocate().await
    }

    /// Grow the pool and wait until the local view shows at least one new
    /// address; the retried scan only ever sees local truth.
    async fn assign_more_ips(
        &self,
        mut batch_size: usize,
        refresh_timeout: Duration,
    ) -> Result<(), PoolError> {
        let cap = limits::max_ipv4_addresses(&self.instance_type);
        let have = self.interface.ipv4_addresses().len();
        if have >= cap {
            return Err(PoolError::MaxAddressesAllocated);
        }
        if have + batch_size > cap {
            batch_size = cap - have;
        }

        tracing::info!(batch_size, "no leasable IP address, expanding the pool");
        self.session
            .assign_private_ipv4_addresses(self.interface.interface_id(), batch_size)
            .await?;

        let before: HashSet<Ipv4Addr> = self.interface.ipv4_addresses().into_iter().collect();
        let start = tokio::time::Instant::now();
        while start.elapsed() < refresh_timeout {
            self.interface.refresh().await?;
            if self
                .interface
                .ipv4_addresses()
                .iter()
                .any(|ip| !before.contains(ip))
            {
                return Ok(());
            }
            tokio::time::sleep(EXPANSION_POLL_INTERVAL).await;
        }

        tracing::warn!("expanded addresses did not appear in the interface view in time");
        Err(PoolError::RefreshFailed)
    }

    /// Lease an IPv6 address from the session-cached interface description.
    /// Candidates are shuffled so concurrent callers on one host spread out
    /// instead of all fighting over the first address.
    pub async fn allocate_ipv6(&self) -> Result<(Ipv6Addr, ExclusiveLock), PoolError> {
        let _config_lock = self.lock_configuration().await.map_err(|err| {
            tracing::warn!(error = %err, "unable to get lock during allocation");
            err
        })?;

        let description = self
            .session
            .describe_interface(self.interface.interface_id(), CacheStrategy::UseCache)
            .await?;

        let mut candidates = description.ipv6_addresses;
        candidates.shuffle(&mut rand::thread_rng());
        for ip in candidates {
            if let Some(lock) = self.try_allocate(&ip.to_string()).await? {
                lock.bump()?;
                return Ok((ip, lock));
            }
        }
        Err(PoolError::NoFreeAddress)
    }

    /// One garbage-collection pass: select idle leases, return their
    /// addresses to the provider, wait for the local view to converge, then
    /// clean up lease records that no longer correspond to anything.
    pub async fn do_gc(&self, grace_period: Duration) -> Result<(), PoolError> {
        let config_lock = self.lock_configuration().await?;
        let (deallocation_list, ip_locks) = self.first_pass(grace_period).await?;

        // The cloud-side free can take minutes. The selected addresses stay
        // individually locked, so allocators can safely run concurrently
        // from here on.
        drop(config_lock);

        self.free_ips(&deallocation_list).await?;
        let result = self.do_file_cleanup(&deallocation_list).await;
        drop(ip_locks);
        result
    }

    /// Selection: every non-primary address currently on the interface whose
    /// lease is free, known, and idle past the grace period gets locked and
    /// queued for deallocation. Any I/O error abandons the pass; the locks
    /// taken so far are released on the way out.
    async fn first_pass(
        &self,
        grace_period: Duration,
    ) -> Result<(Vec<Ipv4Addr>, Vec<ExclusiveLock>), PoolError> {
        let records: HashMap<String, fslocker::Record> = self
            .locker
            .list_files(self.ip_addresses_path())?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let mut deallocation_list = Vec::new();
        let mut locks = Vec::new();
        let addresses = self.interface.ipv4_addresses();
        // The first address is the interface primary and is never tested
        // for removal.
        for ip in addresses.iter().skip(1) {
            let name = ip.to_string();
            tracing::debug!(ip = %name, "checking IP address");
            let lock = match self
                .locker
                .exclusive_lock(self.ip_address_path(&name), Some(Duration::ZERO))
                .await
            {
                Ok(lock) => lock,
                Err(LockError::WouldBlock) => {
                    tracing::debug!(ip = %name, "lease file currently locked");
                    continue;
                }
                Err(LockError::Io(err)) => return Err(err.into()),
            };

            let Some(record) = records.get(&name) else {
                tracing::debug!(ip = %name, "no existing lease record");
                drop(lock);
                continue;
            };
            let idle = SystemTime::now()
                .duration_since(record.bump_time)
                .unwrap_or_default();
            if idle < grace_period {
                tracing::debug!(ip = %name, idle_secs = idle.as_secs(), "IP not idle long enough");
                drop(lock);
                continue;
            }

            lock.bump()?;
            locks.push(lock);
            deallocation_list.push(*ip);
        }

        Ok((deallocation_list, locks))
    }

    async fn free_ips(&self, deallocation_list: &[Ipv4Addr]) -> Result<(), PoolError> {
        let old_ip_list = self.interface.ipv4_addresses();
        if deallocation_list.is_empty() {
            return Ok(());
        }

        tracing::info!(ips = ?deallocation_list, "returning idle IP addresses to the provider");
        self.interface
            .free_ipv4_addresses(&self.session, deallocation_list)
            .await?;

        if !self.ips_freed(&old_ip_list, deallocation_list).await {
            // Expected transient inconsistency; the next GC pass will see
            // the final state.
            tracing::warn!("interface view did not converge after freeing addresses");
        }
        Ok(())
    }

    async fn ips_freed(&self, old_ip_list: &[Ipv4Addr], deallocation_list: &[Ipv4Addr]) -> bool {
        let mut success_count = 0;
        for _ in 0..FREE_CONVERGENCE_ITERATIONS {
            match self.interface.refresh().await {
                Err(err) => tracing::error!(error = %err, "could not refresh IPs"),
                Ok(()) => {
                    let current: HashSet<Ipv4Addr> =
                        self.interface.ipv4_addresses().into_iter().collect();
                    let missing = old_ip_list
                        .iter()
                        .filter(|ip| !current.contains(ip))
                        .count();
                    if missing > 0 {
                        tracing::info!(
                            missing,
                            intended = deallocation_list.len(),
                            "freed IPs missing from the interface view"
                        );
                        success_count += 1;
                        if success_count >= FREE_CONVERGENCE_REQUIRED_STREAK {
                            return true;
                        }
                    } else {
                        tracing::info!("resetting freed success count to 0");
                        success_count = 0;
                    }
                }
            }
            tokio::time::sleep(self.ip_refresh_sleep_interval).await;
        }
        false
    }

    /// Cleanup: delete records that belong neither to a current interface
    /// address nor to this pass's deallocations, once they have been idle
    /// past the threshold. Failures here are logged and skipped so one bad
    /// record cannot block the rest of the reclaim.
    async fn do_file_cleanup(&self, deallocation_list: &[Ipv4Addr]) -> Result<(), PoolError> {
        let mut keep: HashSet<String> = deallocation_list
            .iter()
            .map(|ip| ip.to_string())
            .collect();
        keep.extend(
            self.interface
                .ipv4_addresses()
                .iter()
                .map(|ip| ip.to_string()),
        );

        for record in self.locker.list_files(self.ip_addresses_path())? {
            if keep.contains(&record.name) {
                continue;
            }
            let idle = SystemTime::now()
                .duration_since(record.bump_time)
                .unwrap_or_default();
            if idle < FILE_CLEANUP_IDLE_THRESHOLD {
                tracing::debug!(record = %record.name, idle_secs = idle.as_secs(), "record too recent to remove");
                continue;
            }

            match self
                .locker
                .exclusive_lock(self.ip_address_path(&record.name), Some(Duration::ZERO))
                .await
            {
                Ok(_lock) => {
                    tracing::info!(record = %record.name, "removing stale lease record");
                    if let Err(err) = self.locker.remove_path(self.ip_address_path(&record.name)) {
                        tracing::error!(record = %record.name, error = %err, "unable to remove lease record");
                    }
                }
                Err(LockError::WouldBlock) => {
                    tracing::warn!(record = %record.name, "lease record currently locked");
                }
                Err(LockError::Io(err)) => {
                    tracing::error!(record = %record.name, error = %err, "unable to lock lease record");
                }
            }
        }
        Ok(())
    }
}
