//! Age buckets and eviction planning

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BackupId, BackupMetadata};

/// Age classification of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Up to one day old
    Daily,
    /// Up to seven days old
    Weekly,
    /// Up to thirty days old
    Monthly,
    /// Older than thirty days
    Yearly,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::Daily, Bucket::Weekly, Bucket::Monthly, Bucket::Yearly];

    /// First bucket whose age range contains `age`
    ///
    /// Negative ages (clock skew, future timestamps) count as zero.
    pub fn classify(age: Duration) -> Self {
        if age <= Duration::days(1) {
            Bucket::Daily
        } else if age <= Duration::days(7) {
            Bucket::Weekly
        } else if age <= Duration::days(30) {
            Bucket::Monthly
        } else {
            Bucket::Yearly
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Daily => "daily",
            Bucket::Weekly => "weekly",
            Bucket::Monthly => "monthly",
            Bucket::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum number of backups kept per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
    pub yearly: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 12,
            yearly: 5,
        }
    }
}

impl RetentionPolicy {
    pub fn max_for(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Daily => self.daily,
            Bucket::Weekly => self.weekly,
            Bucket::Monthly => self.monthly,
            Bucket::Yearly => self.yearly,
        }
    }
}

/// A backup selected for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEviction {
    pub bucket: Bucket,
    pub id: BackupId,
    pub created_at: DateTime<Utc>,
}

/// Select the backups to evict under `policy` at time `now`
///
/// Buckets are evaluated independently. Within a bucket holding more than
/// its maximum, the oldest excess entries are selected. The result is
/// ordered by bucket, then oldest first.
pub fn plan_evictions(
    metadata: &[BackupMetadata],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<PlannedEviction> {
    let mut buckets: BTreeMap<Bucket, Vec<&BackupMetadata>> = BTreeMap::new();
    for meta in metadata {
        buckets
            .entry(Bucket::classify(meta.age_at(now)))
            .or_default()
            .push(meta);
    }

    let mut planned = Vec::new();
    for (bucket, mut members) in buckets {
        let max = policy.max_for(bucket);
        if members.len() <= max {
            continue;
        }

        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let excess = members.len() - max;
        planned.extend(members.into_iter().take(excess).map(|m| PlannedEviction {
            bucket,
            id: m.id.clone(),
            created_at: m.created_at,
        }));
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CompressionAlgorithm;
    use crate::models::BackupKind;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap()
    }

    fn meta_aged(age: Duration) -> BackupMetadata {
        let created_at = now() - age;
        BackupMetadata {
            id: BackupId::generate(created_at),
            created_at,
            kind: BackupKind::Automatic,
            description: None,
            size_bytes: 1,
            compressed: false,
            compression: CompressionAlgorithm::None,
            checksum: String::new(),
        }
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(Bucket::classify(Duration::zero()), Bucket::Daily);
        assert_eq!(Bucket::classify(Duration::days(1)), Bucket::Daily);
        assert_eq!(
            Bucket::classify(Duration::days(1) + Duration::milliseconds(1)),
            Bucket::Weekly
        );
        assert_eq!(Bucket::classify(Duration::days(7)), Bucket::Weekly);
        assert_eq!(Bucket::classify(Duration::days(8)), Bucket::Monthly);
        assert_eq!(Bucket::classify(Duration::days(30)), Bucket::Monthly);
        assert_eq!(Bucket::classify(Duration::days(31)), Bucket::Yearly);
        assert_eq!(Bucket::classify(Duration::days(4000)), Bucket::Yearly);
    }

    #[test]
    fn test_future_timestamp_is_daily() {
        let future = meta_aged(-Duration::days(3));
        assert_eq!(Bucket::classify(future.age_at(now())), Bucket::Daily);
    }

    #[test]
    fn test_oldest_excess_selected() {
        let metadata: Vec<_> = (0..9)
            .map(|i| meta_aged(Duration::hours(i)))
            .collect();
        let planned = plan_evictions(&metadata, &RetentionPolicy::default(), now());

        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].id, metadata[8].id);
        assert_eq!(planned[1].id, metadata[7].id);
        assert!(planned.iter().all(|p| p.bucket == Bucket::Daily));
    }

    #[test]
    fn test_buckets_are_independent() {
        let mut metadata: Vec<_> = (0..5)
            .map(|i| meta_aged(Duration::days(40 + i)))
            .collect();
        metadata.push(meta_aged(Duration::hours(1)));

        let policy = RetentionPolicy {
            yearly: 2,
            ..Default::default()
        };
        let planned = plan_evictions(&metadata, &policy, now());
        assert_eq!(planned.len(), 3);
        assert!(planned.iter().all(|p| p.bucket == Bucket::Yearly));
    }

    #[test]
    fn test_zero_max_evicts_bucket() {
        let metadata = vec![meta_aged(Duration::days(3)), meta_aged(Duration::days(4))];
        let policy = RetentionPolicy {
            weekly: 0,
            ..Default::default()
        };
        assert_eq!(plan_evictions(&metadata, &policy, now()).len(), 2);
    }

    #[test]
    fn test_within_limits_plans_nothing() {
        let metadata: Vec<_> = (0..7).map(|i| meta_aged(Duration::hours(i))).collect();
        assert!(plan_evictions(&metadata, &RetentionPolicy::default(), now()).is_empty());
        assert!(plan_evictions(&[], &RetentionPolicy::default(), now()).is_empty());
    }
}
