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
use std::sync::Arc;
use std::time::{Duration, Instant};

use fslocker::{FsLocker, LockError};

#[tokio::test]
async fn bounded_wait_expires_as_would_block() {
    let dir = tempfile::tempdir().unwrap();
    let locker = FsLocker::new(dir.path()).unwrap();

    let _held = locker
        .exclusive_lock("ip-config", Some(Duration::ZERO))
        .await
        .unwrap();

    let start = Instant::now();
    let result = locker
        .exclusive_lock("ip-config", Some(Duration::from_millis(200)))
        .await;
    assert!(matches!(result, Err(LockError::WouldBlock)));
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn bounded_wait_acquires_once_released() {
    let dir = tempfile::tempdir().unwrap();
    let locker = Arc::new(FsLocker::new(dir.path()).unwrap());

    let held = locker
        .exclusive_lock("ip-config", Some(Duration::ZERO))
        .await
        .unwrap();

    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(held);
    });

    locker
        .exclusive_lock("ip-config", Some(Duration::from_secs(2)))
        .await
        .expect("lock should be acquired after the holder releases");
    releaser.await.unwrap();
}

#[tokio::test]
async fn remove_path_deletes_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let locker = FsLocker::new(dir.path()).unwrap();

    let _lock = locker
        .exclusive_lock("iface/ip-addresses/10.0.0.9", Some(Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(locker.list_files("iface/ip-addresses").unwrap().len(), 1);

    locker.remove_path("iface/ip-addresses/10.0.0.9").unwrap();
    assert!(locker.list_files("iface/ip-addresses").unwrap().is_empty());
}

// Two distinct opens of the same path contend even inside one process, which
// is what lets many pool managers (and tests) share a host safely.
#[tokio::test]
async fn separate_handles_contend() {
    let dir = tempfile::tempdir().unwrap();
    let locker_a = FsLocker::new(dir.path()).unwrap();
    let locker_b = FsLocker::new(dir.path()).unwrap();

    let _held = locker_a
        .exclusive_lock("iface/ip-addresses/10.0.0.2", Some(Duration::ZERO))
        .await
        .unwrap();
    let contended = locker_b
        .exclusive_lock("iface/ip-addresses/10.0.0.2", Some(Duration::ZERO))
        .await;
    assert!(matches!(contended, Err(LockError::WouldBlock)));
}
