//! Driver-backed checks.
//!
//! [`DriverStrategy`] turns any [`AutomationDriver`] into a
//! [`CheckStrategy`]. The bundled [`HttpDriver`] only fetches the target
//! page; it reports reachability, not DOM-level behavior.

use super::{CheckError, CheckStrategy, Verdict};
use crate::category::Category;
use crate::model::CaseStatus;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};
use tracing::debug;

/// A loaded page as seen by a driver.
#[derive(Debug, Clone)]
pub struct PageLoad {
    pub url: Url,
    pub status: u16,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub passed: bool,
    pub detail: String,
    pub screenshot: Option<String>,
}

/// Browser-automation capability consumed by [`DriverStrategy`].
#[async_trait::async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn navigate(&self, target: &Url) -> Result<PageLoad, CheckError>;

    async fn check(&self, category: Category, page: &PageLoad) -> Result<CheckOutcome, CheckError>;
}

pub struct DriverStrategy<D> {
    driver: D,
}

impl<D: AutomationDriver> DriverStrategy<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }
}

#[async_trait::async_trait]
impl<D: AutomationDriver> CheckStrategy for DriverStrategy<D> {
    fn name(&self) -> &'static str {
        "driver"
    }

    async fn check(&self, category: Category, target: &Url) -> Result<Verdict, CheckError> {
        let start = Instant::now();
        let page = self.driver.navigate(target).await?;
        debug!(%category, url = %page.url, status = page.status, "Page loaded");
        let outcome = self.driver.check(category, &page).await?;

        let duration_ms = u64::try_from(start.elapsed().as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let mut logs = Verdict::trail(category, target, outcome.detail);
        logs.push(if outcome.passed {
            "PASS: test completed successfully".to_string()
        } else {
            "FAIL: test failed".to_string()
        });
        logs.push(format!("Execution time: {}ms", duration_ms));

        Ok(Verdict {
            status: if outcome.passed {
                CaseStatus::Pass
            } else {
                CaseStatus::Fail
            },
            duration_ms,
            logs,
            screenshot: outcome.screenshot,
        })
    }
}

/// Plain HTTP driver: a category passes when the page answers 2xx.
pub struct HttpDriver {
    client: Client,
}

impl HttpDriver {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("testpilot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl AutomationDriver for HttpDriver {
    async fn navigate(&self, target: &Url) -> Result<PageLoad, CheckError> {
        let resp = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(|e| CheckError::Navigation {
                url: target.to_string(),
                reason: e.to_string(),
            })?;
        let url = resp.url().clone();
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| CheckError::Navigation {
            url: target.to_string(),
            reason: e.to_string(),
        })?;
        Ok(PageLoad {
            url,
            status,
            bytes: body.len(),
        })
    }

    async fn check(&self, category: Category, page: &PageLoad) -> Result<CheckOutcome, CheckError> {
        let passed = (200..300).contains(&page.status);
        Ok(CheckOutcome {
            passed,
            detail: format!(
                "{}: HTTP {} from {} ({} bytes)",
                category.label(),
                page.status,
                page.url,
                page.bytes
            ),
            screenshot: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDriver {
        status: u16,
        fail_navigation: bool,
    }

    #[async_trait::async_trait]
    impl AutomationDriver for FakeDriver {
        async fn navigate(&self, target: &Url) -> Result<PageLoad, CheckError> {
            if self.fail_navigation {
                return Err(CheckError::Navigation {
                    url: target.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(PageLoad {
                url: target.clone(),
                status: self.status,
                bytes: 512,
            })
        }

        async fn check(&self, category: Category, page: &PageLoad) -> Result<CheckOutcome, CheckError> {
            Ok(CheckOutcome {
                passed: page.status == 200,
                detail: format!("{} checked", category.key()),
                screenshot: Some("shot".to_string()),
            })
        }
    }

    fn target() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[tokio::test]
    async fn test_driver_pass() {
        let s = DriverStrategy::new(FakeDriver {
            status: 200,
            fail_navigation: false,
        });
        let v = s.check(Category::Login, &target()).await.unwrap();
        assert_eq!(v.status, CaseStatus::Pass);
        assert!(v.duration_ms >= 1);
        assert_eq!(v.logs[0], "Navigating to https://example.com/");
        assert_eq!(v.logs[2], "login checked");
        assert_eq!(v.screenshot.as_deref(), Some("shot"));
    }

    #[tokio::test]
    async fn test_driver_fail_status() {
        let s = DriverStrategy::new(FakeDriver {
            status: 503,
            fail_navigation: false,
        });
        let v = s.check(Category::Links, &target()).await.unwrap();
        assert_eq!(v.status, CaseStatus::Fail);
    }

    #[tokio::test]
    async fn test_navigation_error_propagates() {
        let s = DriverStrategy::new(FakeDriver {
            status: 200,
            fail_navigation: true,
        });
        let err = s.check(Category::Forms, &target()).await.unwrap_err();
        assert!(matches!(err, CheckError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_http_driver_judges_status() {
        let driver = HttpDriver::new(Duration::from_secs(1)).unwrap();
        let page = PageLoad {
            url: target(),
            status: 404,
            bytes: 0,
        };
        let outcome = driver.check(Category::Navigation, &page).await.unwrap();
        assert!(!outcome.passed);
        assert!(outcome.detail.contains("HTTP 404"));
    }
}
