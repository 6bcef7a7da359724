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
//! Amazon resource names, as far as role assumption needs them.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed ARN: {0}")]
pub struct ArnParseError(pub String);

/// `arn:partition:service:region:account-id:resource`. The resource part may
/// itself contain colons; everything after the fifth separator belongs to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl Arn {
    /// Slash-separated segments of the resource, e.g.
    /// `assumed-role/ipamd-host/i-0abc` -> `["assumed-role", "ipamd-host", "i-0abc"]`.
    pub fn resource_segment(&self, index: usize) -> Option<&str> {
        self.resource.split('/').nth(index)
    }
}

impl FromStr for Arn {
    type Err = ArnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(6, ':');
        let prefix = parts.next().unwrap_or_default();
        let (Some(partition), Some(service), Some(region), Some(account_id), Some(resource)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(ArnParseError(s.to_string()));
        };
        if prefix != "arn" || resource.is_empty() {
            return Err(ArnParseError(s.to_string()));
        }
        Ok(Arn {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assumed_role_arn() {
        let arn: Arn = "arn:aws:sts::111111111111:assumed-role/ipamd-host/i-0abc"
            .parse()
            .unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "sts");
        assert_eq!(arn.region, "");
        assert_eq!(arn.account_id, "111111111111");
        assert_eq!(arn.resource_segment(1), Some("ipamd-host"));
    }

    #[test]
    fn round_trips_through_display() {
        let text = "arn:aws:iam::222222222222:role/ipamd-host";
        let arn: Arn = text.parse().unwrap();
        assert_eq!(arn.to_string(), text);
    }

    #[test]
    fn rejects_short_and_foreign_strings() {
        assert!("arn:aws:iam".parse::<Arn>().is_err());
        assert!("urn:aws:iam::1:role/x".parse::<Arn>().is_err());
    }
}
