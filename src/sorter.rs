//! Masterlist-driven load-order sorting and reporting. The masterlist is a
//! plain text file of plugin names in canonical order; `\` lines are
//! comments and a leading `? Revision <n>` line carries the revision.

use anyhow::{Context, Result};
use serde::Serialize;
use std::{collections::HashMap, fs, path::Path};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Default)]
pub struct Masterlist {
    pub revision: Option<u32>,
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Masterlist {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read masterlist {}", path.display()))?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        let mut list = Self::default();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('\\') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('?') {
                let rest = rest.trim();
                if let Some(number) = rest.strip_prefix("Revision") {
                    list.revision = number.trim().parse().ok();
                }
                continue;
            }
            // group markers some masterlists carry in front of names
            let line = line.trim_start_matches(|c| c == '>' || c == '<').trim();
            if line.is_empty() {
                continue;
            }
            let key = line.to_lowercase();
            if !list.positions.contains_key(&key) {
                list.positions.insert(key, list.names.len());
                list.names.push(line.to_string());
            }
        }
        list
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, plugin: &str) -> Option<usize> {
        self.positions.get(&plugin.to_lowercase()).copied()
    }
}

/// Sorts plugin names by masterlist position. Unrecognized plugins keep
/// their relative order and land after every recognized one.
pub fn sort_plugins(list: &Masterlist, plugins: &[String]) -> Vec<String> {
    let mut indexed: Vec<(usize, usize, &String)> = plugins
        .iter()
        .enumerate()
        .map(|(slot, name)| (list.position(name).unwrap_or(usize::MAX), slot, name))
        .collect();
    indexed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    indexed.into_iter().map(|(_, _, name)| name.clone()).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportInput {
    pub name: String,
    pub active: bool,
    pub corrupt: bool,
    pub masters: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportLine {
    pub plugin: String,
    pub active: bool,
    pub recognized: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub generated: String,
    pub revision: Option<u32>,
    pub lines: Vec<ReportLine>,
}

impl Report {
    pub fn render(&self) -> String {
        let mut out = format!("Load order report ({})\n", self.generated);
        match self.revision {
            Some(revision) => out.push_str(&format!("Masterlist revision {revision}\n\n")),
            None => out.push_str("Masterlist revision unknown\n\n"),
        }
        for line in &self.lines {
            let active = if line.active { 'x' } else { ' ' };
            let mark = if line.recognized { ' ' } else { '?' };
            out.push_str(&format!("[{active}]{mark} {}\n", line.plugin));
            for warning in &line.warnings {
                out.push_str(&format!("    ! {warning}\n"));
            }
        }
        out
    }
}

/// Checks each plugin against the masterlist and its master dependencies
/// against the actual load order.
pub fn generate_report(list: &Masterlist, plugins: &[ReportInput]) -> Report {
    let order: HashMap<String, usize> = plugins
        .iter()
        .enumerate()
        .map(|(slot, input)| (input.name.to_lowercase(), slot))
        .collect();

    let lines = plugins
        .iter()
        .enumerate()
        .map(|(slot, input)| {
            let recognized = list.position(&input.name).is_some();
            let mut warnings = Vec::new();
            if !recognized {
                warnings.push("not present in the masterlist".to_string());
            }
            if input.corrupt {
                warnings.push("file appears corrupt".to_string());
            }
            for master in &input.masters {
                match order.get(&master.to_lowercase()) {
                    None => warnings.push(format!("master {master} is missing")),
                    Some(&master_slot) if master_slot > slot => {
                        warnings.push(format!("master {master} loads after this plugin"));
                    }
                    Some(_) => {}
                }
            }
            ReportLine {
                plugin: input.name.clone(),
                active: input.active,
                recognized,
                warnings,
            }
        })
        .collect();

    Report {
        generated: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        revision: list.revision,
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
? Revision 3401
\\ Core masters first
Fallout3.esm
Anchorage.esm
ThePitt.esm
> CRAFT.esp
";

    #[test]
    fn parses_revision_and_skips_comments() {
        let list = Masterlist::parse(SAMPLE);
        assert_eq!(list.revision, Some(3401));
        assert_eq!(list.len(), 4);
        assert_eq!(list.position("fallout3.esm"), Some(0));
        assert_eq!(list.position("craft.esp"), Some(3));
        assert_eq!(list.position("unknown.esp"), None);
    }

    #[test]
    fn sorts_known_plugins_and_appends_unknown() {
        let list = Masterlist::parse(SAMPLE);
        let plugins = vec![
            "CRAFT.esp".to_string(),
            "MyMod.esp".to_string(),
            "Fallout3.esm".to_string(),
            "OtherMod.esp".to_string(),
            "Anchorage.esm".to_string(),
        ];
        let sorted = sort_plugins(&list, &plugins);
        assert_eq!(
            sorted,
            vec!["Fallout3.esm", "Anchorage.esm", "CRAFT.esp", "MyMod.esp", "OtherMod.esp"]
        );
    }

    #[test]
    fn report_flags_missing_and_late_masters() {
        let list = Masterlist::parse(SAMPLE);
        let plugins = vec![
            ReportInput {
                name: "CRAFT.esp".to_string(),
                active: true,
                corrupt: false,
                masters: vec!["Fallout3.esm".to_string()],
            },
            ReportInput {
                name: "Fallout3.esm".to_string(),
                active: true,
                corrupt: false,
                masters: Vec::new(),
            },
            ReportInput {
                name: "Broken.esp".to_string(),
                active: false,
                corrupt: true,
                masters: vec!["Gone.esm".to_string()],
            },
        ];
        let report = generate_report(&list, &plugins);
        assert_eq!(report.revision, Some(3401));

        let craft = &report.lines[0];
        assert!(craft.recognized);
        assert_eq!(craft.warnings, vec!["master Fallout3.esm loads after this plugin"]);

        let broken = &report.lines[2];
        assert!(!broken.recognized);
        assert!(broken.warnings.iter().any(|w| w.contains("appears corrupt")));
        assert!(broken.warnings.iter().any(|w| w.contains("Gone.esm is missing")));
    }
}
