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
//! Hedged execution of one logical RPC against provider tail latency.

use std::future::Future;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;

/// Run staggered copies of `f` and return the first success.
///
/// `delays` must be non-empty with `delays[0] == ZERO`: attempt 0 launches
/// immediately and attempt `i` after the cumulative sum of `delays[..=i]`,
/// except that a completed result short-circuits further launches. The first
/// `Ok` wins and the losing attempts are dropped. If every attempt fails, the
/// error of the earliest-launched attempt is returned, regardless of which
/// error arrived first.
///
/// Deadlines are the caller's: wrap the returned future in
/// `tokio::time::timeout`. Dropping it (timeout or cancellation) drops all
/// in-flight attempts.
pub async fn hedge<T, E, F, Fut>(f: F, delays: &[Duration]) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    assert!(
        !delays.is_empty() && delays[0].is_zero(),
        "hedge delays must be non-empty and start at zero"
    );

    let start = tokio::time::Instant::now();
    let mut cumulative = Duration::ZERO;
    let schedule: Vec<tokio::time::Instant> = delays
        .iter()
        .map(|delay| {
            cumulative += *delay;
            start + cumulative
        })
        .collect();

    let mut in_flight = FuturesUnordered::new();
    let mut errors: Vec<(usize, E)> = Vec::new();
    let mut launched = 0;

    loop {
        // The launch timer index is clamped because select! evaluates the
        // branch expression even when its precondition disables it.
        let next_launch = schedule[launched.min(schedule.len() - 1)];
        tokio::select! {
            _ = tokio::time::sleep_until(next_launch), if launched < schedule.len() => {
                let attempt = f();
                let index = launched;
                launched += 1;
                in_flight.push(async move { (index, attempt.await) });
            }
            Some((index, result)) = in_flight.next() => {
                match result {
                    Ok(value) => return Ok(value),
                    Err(err) => errors.push((index, err)),
                }
                if launched == schedule.len() && in_flight.is_empty() {
                    let (_, earliest) = errors
                        .into_iter()
                        .min_by_key(|(index, _)| *index)
                        .expect("every launched attempt produced a result");
                    return Err(earliest);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;

    #[tokio::test]
    async fn first_attempt_success_launches_once() {
        let calls = AtomicI64::new(0);
        let delays = [Duration::ZERO, Duration::from_secs(1)];
        let value = hedge(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>("ok")
            },
            &delays,
        )
        .await
        .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_all_attempts() {
        let calls = AtomicI64::new(0);
        let delays = [Duration::ZERO, Duration::from_secs(1)];
        let start = tokio::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            hedge(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, &str>("ok")
                },
                &delays,
            ),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn later_attempt_wins_after_early_error() {
        let calls = AtomicI64::new(0);
        let delays = [Duration::ZERO, Duration::from_secs(2)];
        let start = tokio::time::Instant::now();
        let value = hedge(
            || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("fake error"),
                    _ => Ok("second"),
                }
            },
            &delays,
        )
        .await
        .unwrap();
        assert_eq!(value, "second");
        assert!(start.elapsed() > Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_launched_error_wins_when_all_fail() {
        // Attempt 0 errors slowly and attempt 1 errors instantly; the caller
        // still sees attempt 0's error.
        let calls = AtomicI64::new(0);
        let delays = [Duration::ZERO, Duration::from_millis(10)];
        let err = hedge(
            || async {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err::<&str, _>("first error")
                } else {
                    Err("second error")
                }
            },
            &delays,
        )
        .await
        .unwrap_err();
        assert_eq!(err, "first error");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
