//! Resource monitoring: store-directory size and process RSS against
//! configured limits. Warnings surface through the sync reporter.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::LOG_TARGET;

/// Render a byte count for warning messages: binary units, with precision
/// that shrinks as the number grows (`512 B`, `3.21 MiB`, `47.3 GiB`).
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while 1024.0 <= value && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else if value < 10.0 {
        format!("{value:.2} {}", UNITS[unit])
    } else if value < 100.0 {
        format!("{value:.1} {}", UNITS[unit])
    } else {
        format!("{value:.0} {}", UNITS[unit])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceWarningKind {
    StoreBytes,
    ProcessRss,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceWarning {
    pub kind: ResourceWarningKind,
    pub actual: u64,
    pub limit: u64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    store_root: PathBuf,
    max_store_bytes: Option<u64>,
    max_rss_bytes: Option<u64>,
}

impl ResourceMonitor {
    pub fn new(
        store_root: impl Into<PathBuf>,
        max_store_bytes: Option<u64>,
        max_rss_bytes: Option<u64>,
    ) -> Self {
        Self {
            store_root: store_root.into(),
            max_store_bytes,
            max_rss_bytes,
        }
    }

    /// Measure and compare against limits; absent limits never warn.
    pub async fn check(&self) -> Vec<ResourceWarning> {
        let mut warnings = Vec::new();

        if let Some(limit) = self.max_store_bytes {
            let actual = dir_size(&self.store_root).await;
            debug!(target: LOG_TARGET, actual, limit, "Checked store directory size");
            if limit < actual {
                warnings.push(ResourceWarning {
                    kind: ResourceWarningKind::StoreBytes,
                    actual,
                    limit,
                    message: format!(
                        "store directory uses {} (limit {})",
                        human_bytes(actual),
                        human_bytes(limit)
                    ),
                });
            }
        }

        if let Some(limit) = self.max_rss_bytes {
            if let Some(actual) = process_rss_bytes() {
                if limit < actual {
                    warnings.push(ResourceWarning {
                        kind: ResourceWarningKind::ProcessRss,
                        actual,
                        limit,
                        message: format!(
                            "process RSS is {} (limit {})",
                            human_bytes(actual),
                            human_bytes(limit)
                        ),
                    });
                }
            }
        }

        warnings
    }
}

async fn dir_size(root: &Path) -> u64 {
    let mut total = 0u64;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    total
}

/// Resident set size from `/proc/self/status`; `None` where unavailable.
fn process_rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn warns_only_past_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("data.bin"), vec![0u8; 4096])
            .await
            .unwrap();

        let relaxed = ResourceMonitor::new(dir.path(), Some(1024 * 1024), None);
        assert!(relaxed.check().await.is_empty());

        let tight = ResourceMonitor::new(dir.path(), Some(1024), None);
        let warnings = tight.check().await;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, ResourceWarningKind::StoreBytes);
        assert!(warnings[0].message.contains("limit"));
    }

    #[tokio::test]
    async fn unlimited_monitor_never_warns() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = ResourceMonitor::new(dir.path(), None, None);
        assert!(monitor.check().await.is_empty());
    }

    #[test]
    fn byte_rendering_scales_precision_with_magnitude() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(4096), "4.00 KiB");
        assert_eq!(human_bytes(47 * 1024 * 1024), "47.0 MiB");
        assert_eq!(human_bytes(256 * 1024 * 1024 * 1024), "256 GiB");
    }
}
