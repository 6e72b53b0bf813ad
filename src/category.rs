//! Check categories offered by the run picker.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A named class of website check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Login,
    Navigation,
    Forms,
    Links,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown test category '{0}' (expected one of: login, navigation, forms, links)")]
pub struct UnknownCategory(pub String);

impl Category {
    /// Every category, in the default selection order.
    pub const ALL: [Category; 4] = [
        Category::Login,
        Category::Navigation,
        Category::Forms,
        Category::Links,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Category::Login => "login",
            Category::Navigation => "navigation",
            Category::Forms => "forms",
            Category::Links => "links",
        }
    }

    /// Human label shown in logs and reports.
    pub fn label(self) -> &'static str {
        match self {
            Category::Login => "Login Flow",
            Category::Navigation => "Navigation",
            Category::Forms => "Form Submission",
            Category::Links => "Broken Links",
        }
    }

    /// Icon key, consumed by presentation only.
    pub fn icon(self) -> &'static str {
        match self {
            Category::Login => "LogIn",
            Category::Navigation => "Navigation",
            Category::Forms => "FileText",
            Category::Links => "Link",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::Login => "Test authentication flows",
            Category::Navigation => "Check menu and page navigation",
            Category::Forms => "Validate form submissions",
            Category::Links => "Detect broken or invalid links",
        }
    }

    /// Name given to the test case recorded for this category.
    pub fn case_name(self) -> String {
        format!("{} Test", self.label())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.key() == wanted)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Catalog entry for listing categories to a UI or the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryInfo {
    pub key: &'static str,
    pub label: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
}

pub fn catalog() -> Vec<CategoryInfo> {
    Category::ALL
        .into_iter()
        .map(|c| CategoryInfo {
            key: c.key(),
            label: c.label(),
            icon: c.icon(),
            description: c.description(),
        })
        .collect()
}
