//! Archive names rendered from a template.
//!
//! A template may contain `{namespace}`, `{release}`, `{pvc}` and `{date}`.
//!

use core::fmt;
use std::path::Path;

use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const NAMESPACE: &str = "{namespace}";
const RELEASE: &str = "{release}";
const PVC: &str = "{pvc}";
const DATE: &str = "{date}";

/// The format of `{date}`, fixed width so names sort by time.
pub const DATE_FORMAT: &str = "%Y%m%d-%H%M%S";

/// The default archive name template.
pub const DEFAULT_TEMPLATE: &str = "{namespace}_{release}_{pvc}_{date}.tar.gz";

/// A template for archive names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameTemplate(String);

impl NameTemplate {
    /// Create a template.
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// The template string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render an archive name for a claim at a point in time.
    pub fn render(
        &self,
        namespace: &str,
        release: &str,
        claim: &str,
        date: DateTime<Local>,
    ) -> String {
        self.fill(namespace, release, claim)
            .replace(DATE, &date.format(DATE_FORMAT).to_string())
    }

    /// The key prefix shared by every archive of a claim, the template up to `{date}`.
    pub fn prefix(&self, namespace: &str, release: &str, claim: &str) -> String {
        let mut prefix = self.fill(namespace, release, claim);
        if let Some(index) = prefix.find(DATE) {
            prefix.truncate(index);
        }
        prefix
    }

    /// Recover the claim name from an archive file name or path.
    ///
    /// Only the final path segment is matched. `{namespace}` and `{release}` must match the given
    /// values exactly and `{date}` matches anything.
    pub fn parse_claim(
        &self,
        archive: &str,
        namespace: &str,
        release: &str,
    ) -> Result<String, NameError> {
        let file_name = Path::new(archive)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.to_string());

        let pattern = self.claim_pattern(namespace, release)?;

        pattern
            .captures(&file_name)
            .and_then(|captures| captures.get(1))
            .map(|claim| claim.as_str().to_string())
            .ok_or_else(|| NameError::NameMismatch {
                file_name,
                template: self.0.clone(),
            })
    }

    /// A pattern matching names of this template, capturing the claim name.
    pub fn claim_pattern(&self, namespace: &str, release: &str) -> Result<Regex, NameError> {
        if !self.0.contains(PVC) {
            return Err(NameError::MissingClaim(self.0.clone()));
        }

        let pattern = regex::escape(&self.0)
            .replace(&regex::escape(NAMESPACE), &regex::escape(namespace))
            .replace(&regex::escape(RELEASE), &regex::escape(release))
            .replacen(&regex::escape(PVC), "(.+?)", 1)
            .replace(&regex::escape(PVC), ".+?")
            .replace(&regex::escape(DATE), ".+");

        Ok(Regex::new(&format!("^{pattern}$"))?)
    }

    fn fill(&self, namespace: &str, release: &str, claim: &str) -> String {
        self.0
            .replace(NAMESPACE, namespace)
            .replace(RELEASE, release)
            .replace(PVC, claim)
    }
}

impl Default for NameTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum NameError {
    #[error("File name '{file_name}' does not match the template '{template}'")]
    NameMismatch { file_name: String, template: String },

    #[error("Template '{0}' does not contain {{pvc}}")]
    MissingClaim(String),

    #[error("Template could not be turned into a pattern:\n{0}")]
    InvalidTemplate(#[from] regex::Error),
}
