//! Instance bootstrap payload
//!
//! The payload handed to the compute instance is a shell script with named
//! slots written as `@@SLOT@@`. Templates are parsed up front so that a typo
//! in a slot name fails before anything is provisioned, and rendering refuses
//! to emit a script with an unfilled slot.

use crate::error::{CloudError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const MARKER: &str = "@@";

/// Named value slots a bootstrap template may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    DbEndpoint,
    DbPort,
    DbName,
    DbUsername,
    DbPassword,
    Region,
    Bucket,
    RepoUrl,
    AppPort,
}

impl Slot {
    pub const ALL: [Slot; 9] = [
        Slot::DbEndpoint,
        Slot::DbPort,
        Slot::DbName,
        Slot::DbUsername,
        Slot::DbPassword,
        Slot::Region,
        Slot::Bucket,
        Slot::RepoUrl,
        Slot::AppPort,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Slot::DbEndpoint => "DB_ENDPOINT",
            Slot::DbPort => "DB_PORT",
            Slot::DbName => "DB_NAME",
            Slot::DbUsername => "DB_USERNAME",
            Slot::DbPassword => "DB_PASSWORD",
            Slot::Region => "AWS_REGION",
            Slot::Bucket => "S3_BUCKET",
            Slot::RepoUrl => "REPO_URL",
            Slot::AppPort => "APP_PORT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", MARKER, self.name(), MARKER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(Slot),
}

/// A parsed bootstrap script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapTemplate {
    segments: Vec<Segment>,
}

impl BootstrapTemplate {
    /// Parse a template, rejecting unknown slot names
    pub fn parse(source: &str) -> Result<Self> {
        let pattern = Regex::new(r"@@([A-Za-z0-9_]+)@@")
            .map_err(|e| CloudError::Template(e.to_string()))?;

        let mut segments = Vec::new();
        let mut last = 0;

        for caps in pattern.captures_iter(source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };

            let slot = Slot::from_name(name.as_str()).ok_or_else(|| {
                CloudError::Template(format!(
                    "unknown slot {}{}{} at byte {}",
                    MARKER,
                    name.as_str(),
                    MARKER,
                    whole.start()
                ))
            })?;

            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Slot(slot));
            last = whole.end();
        }

        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_string()));
        }

        Ok(Self { segments })
    }

    /// The built-in script for Amazon Linux 2023 hosts
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_SCRIPT)
    }

    /// Load a custom template from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CloudError::Template(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&source)
    }

    /// Slots referenced by this template
    pub fn slots(&self) -> BTreeSet<Slot> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Slot(slot) => Some(*slot),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// Produce the script. Every referenced slot must be bound.
    pub fn render(&self, bindings: &Bindings) -> Result<String> {
        let missing: Vec<&str> = self
            .slots()
            .into_iter()
            .filter(|slot| !bindings.values.contains_key(slot))
            .map(|slot| slot.name())
            .collect();

        if !missing.is_empty() {
            return Err(CloudError::Template(format!(
                "unresolved slots: {}",
                missing.join(", ")
            )));
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(slot) => {
                    if let Some(value) = bindings.values.get(slot) {
                        out.push_str(value);
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Values for template slots
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: BTreeMap<Slot, String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a slot once. Values may not contain the marker delimiter or a
    /// newline.
    pub fn bind(&mut self, slot: Slot, value: impl Into<String>) -> Result<&mut Self> {
        let value = value.into();

        if value.contains(MARKER) || value.contains(['\n', '\r']) {
            return Err(CloudError::Template(format!(
                "value for {} contains a forbidden sequence",
                slot.name()
            )));
        }
        if self.values.contains_key(&slot) {
            return Err(CloudError::Template(format!(
                "slot {} bound twice",
                slot.name()
            )));
        }

        self.values.insert(slot, value);
        Ok(self)
    }

    pub fn is_bound(&self, slot: Slot) -> bool {
        self.values.contains_key(&slot)
    }
}

/// Default bootstrap script
///
/// Installs Docker and git, clones the application, writes its environment
/// file and starts it on `APP_PORT`.
pub const DEFAULT_SCRIPT: &str = r#"#!/bin/bash
# stackflow bootstrap (Amazon Linux 2023)

set -euo pipefail
exec > >(tee /var/log/stackflow-bootstrap.log) 2>&1

echo "=== stackflow: bootstrap start ==="

dnf update -y
dnf install -y docker git
systemctl enable docker
systemctl start docker
usermod -aG docker ec2-user

APP_DIR=/opt/app
if [ ! -d "$APP_DIR/.git" ]; then
    git clone '@@REPO_URL@@' "$APP_DIR"
fi
cd "$APP_DIR"

cat > "$APP_DIR/.env" <<'ENVEOF'
DATABASE_URL=postgresql://@@DB_USERNAME@@:@@DB_PASSWORD@@@@@DB_ENDPOINT@@:@@DB_PORT@@/@@DB_NAME@@
DB_HOST=@@DB_ENDPOINT@@
DB_PORT=@@DB_PORT@@
DB_NAME=@@DB_NAME@@
DB_USERNAME=@@DB_USERNAME@@
DB_PASSWORD=@@DB_PASSWORD@@
AWS_REGION=@@AWS_REGION@@
S3_BUCKET=@@S3_BUCKET@@
PORT=@@APP_PORT@@
ENVEOF
chmod 600 "$APP_DIR/.env"

docker build -t app:latest .
docker rm -f app 2>/dev/null || true
docker run -d --name app --restart unless-stopped \
    --env-file "$APP_DIR/.env" \
    -p 80:@@APP_PORT@@ -p @@APP_PORT@@:@@APP_PORT@@ \
    app:latest

echo "=== stackflow: bootstrap complete ==="
"#;
