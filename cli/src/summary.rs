//! What each avatar did, for printing once the run is over.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvatarSummary {
    pub name: String,
    pub errored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Running average in milliseconds, by full category name. Categories
    /// with no samples are left out.
    pub averages_ms: BTreeMap<String, f64>,
}

impl AvatarSummary {
    pub fn new(name: impl Into<String>, error: Option<String>) -> Self {
        Self {
            name: name.into(),
            errored: error.is_some(),
            error,
            averages_ms: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, category: impl Into<String>, average: Duration) {
        self.averages_ms
            .insert(category.into(), average.as_secs_f64() * 1000.0);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub avatars: Vec<AvatarSummary>,
}

impl RunSummary {
    pub fn new(ticks: u64, mut avatars: Vec<AvatarSummary>) -> Self {
        avatars.sort_by(|a, b| a.name.cmp(&b.name));
        Self { ticks, avatars }
    }

    #[must_use]
    pub fn errored(&self) -> usize {
        self.avatars.iter().filter(|avatar| avatar.errored).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} avatar(s), {} errored, {} tick(s)",
            self.avatars.len(),
            self.errored(),
            self.ticks
        )?;
        for avatar in &self.avatars {
            match &avatar.error {
                Some(error) => writeln!(f, "  {} [errored: {error}]", avatar.name)?,
                None => writeln!(f, "  {} [ok]", avatar.name)?,
            }
            for (category, average) in &avatar.averages_ms {
                writeln!(f, "    {category:<40} {average:>9.3} ms")?;
            }
        }
        Ok(())
    }
}
