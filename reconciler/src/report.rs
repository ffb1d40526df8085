//! Run options and batch summary.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Record category a run can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncCategory {
    Properties,
    Payments,
    Certificates,
}

impl SyncCategory {
    /// Execution order within a run.
    pub const ALL: [SyncCategory; 3] = [
        SyncCategory::Properties,
        SyncCategory::Payments,
        SyncCategory::Certificates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncCategory::Properties => "properties",
            SyncCategory::Payments => "payments",
            SyncCategory::Certificates => "certificates",
        }
    }
}

impl fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "properties" | "property" => Ok(SyncCategory::Properties),
            "payments" | "payment" | "orders" => Ok(SyncCategory::Payments),
            "certificates" | "certificate" | "deeds" => Ok(SyncCategory::Certificates),
            other => Err(format!(
                "unknown category '{}', expected properties, payments or certificates",
                other
            )),
        }
    }
}

/// What a run should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Categories to process. Empty means all.
    pub categories: Vec<SyncCategory>,
    /// Walk the decision path without submitting or writing anything.
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            categories: SyncCategory::ALL.to_vec(),
            dry_run: false,
        }
    }
}

impl RunOptions {
    pub fn only(categories: impl IntoIterator<Item = SyncCategory>) -> Self {
        Self {
            categories: categories.into_iter().collect(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn includes(&self, category: SyncCategory) -> bool {
        self.categories.is_empty() || self.categories.contains(&category)
    }
}

/// Per-category outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub processed: u64,
    pub synced: u64,
    pub failed: u64,
}

impl SyncCounts {
    pub fn new(processed: u64, synced: u64, failed: u64) -> Self {
        Self {
            processed,
            synced,
            failed,
        }
    }

    pub fn record_synced(&mut self) {
        self.processed += 1;
        self.synced += 1;
    }

    pub fn record_failed(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }
}

impl fmt::Display for SyncCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} synced={} failed={}",
            self.processed, self.synced, self.failed
        )
    }
}

/// Aggregated result of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub dry_run: bool,
    /// `None` when the category was not part of the run.
    pub properties: Option<SyncCounts>,
    pub payments: Option<SyncCounts>,
    pub certificates: Option<SyncCounts>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn set(&mut self, category: SyncCategory, counts: SyncCounts) {
        let slot = match category {
            SyncCategory::Properties => &mut self.properties,
            SyncCategory::Payments => &mut self.payments,
            SyncCategory::Certificates => &mut self.certificates,
        };
        *slot = Some(counts);
    }

    pub fn get(&self, category: SyncCategory) -> Option<SyncCounts> {
        match category {
            SyncCategory::Properties => self.properties,
            SyncCategory::Payments => self.payments,
            SyncCategory::Certificates => self.certificates,
        }
    }

    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Sum over every category that ran.
    pub fn total(&self) -> SyncCounts {
        [self.properties, self.payments, self.certificates]
            .into_iter()
            .flatten()
            .fold(SyncCounts::default(), |acc, c| {
                SyncCounts::new(
                    acc.processed + c.processed,
                    acc.synced + c.synced,
                    acc.failed + c.failed,
                )
            })
    }

    pub fn has_failures(&self) -> bool {
        self.total().failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parsing() {
        assert_eq!("properties".parse::<SyncCategory>(), Ok(SyncCategory::Properties));
        assert_eq!(" Payments ".parse::<SyncCategory>(), Ok(SyncCategory::Payments));
        assert!("holdings".parse::<SyncCategory>().is_err());
    }

    #[test]
    fn test_options_include_all_by_default() {
        let options = RunOptions::default();
        assert!(SyncCategory::ALL.iter().all(|c| options.includes(*c)));

        let only = RunOptions::only([SyncCategory::Certificates]);
        assert!(only.includes(SyncCategory::Certificates));
        assert!(!only.includes(SyncCategory::Properties));
    }

    #[test]
    fn test_report_totals() {
        let mut report = RunReport::default();
        report.set(SyncCategory::Properties, SyncCounts::new(2, 1, 1));
        report.set(SyncCategory::Certificates, SyncCounts::new(3, 3, 0));

        assert_eq!(report.total(), SyncCounts::new(5, 4, 1));
        assert!(report.has_failures());
        assert_eq!(report.get(SyncCategory::Payments), None);
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = RunReport::default();
        report.set(SyncCategory::Payments, SyncCounts::new(1, 1, 0));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["payments"]["synced"], 1);
        assert!(json["properties"].is_null());
    }
}
