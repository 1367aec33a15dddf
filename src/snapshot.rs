//! Disk usage snapshot built from `du` output
//!
//! A snapshot maps an entry name (the measured path or one of its immediate
//! children, exactly as `du` prints it) to its size in kilobytes. Snapshots
//! are built fresh for every scrape and never merged with earlier ones.

use log::debug;
use std::collections::btree_map::{self, BTreeMap};

/// Mapping from entry name to size in kilobytes
///
/// Names are never empty. Iteration is ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    entries: BTreeMap<String, u64>,
}

impl UsageSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the tab-separated output of `du -k -d 1`
    ///
    /// Each non-blank line is split on its first tab into `<size>\t<name>`.
    /// A size that does not parse as an unsigned integer is recorded as `0`.
    /// Lines without a tab or with an empty name are skipped.
    ///
    /// # Example
    ///
    /// ```
    /// use du_exporter::snapshot::UsageSnapshot;
    ///
    /// let snapshot = UsageSnapshot::from_du_output("1024\tfoo\n2048\tbar\n");
    /// assert_eq!(snapshot.get("foo"), Some(1024));
    /// assert_eq!(snapshot.get("bar"), Some(2048));
    /// ```
    pub fn from_du_output(output: &str) -> Self {
        let mut snapshot = Self::new();

        for line in output.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let Some((size, name)) = line.split_once('\t') else {
                debug!("Skipping du line without a tab separator: {:?}", line);
                continue;
            };

            if name.is_empty() {
                debug!("Skipping du line with an empty name: {:?}", line);
                continue;
            }

            let kilobytes = match size.trim().parse::<u64>() {
                Ok(kilobytes) => kilobytes,
                Err(e) => {
                    debug!("Unparseable size {:?} for {}, recording 0: {}", size, name, e);
                    0
                }
            };

            snapshot.insert(name.to_string(), kilobytes);
        }

        snapshot
    }

    /// Insert an entry, returning the previous size if the name was present
    pub fn insert(&mut self, name: String, kilobytes: u64) -> Option<u64> {
        self.entries.insert(name, kilobytes)
    }

    /// Size of an entry
    ///
    /// # Arguments
    ///
    /// * `name` - Entry name exactly as `du` printed it
    ///
    /// # Returns
    ///
    /// The size in kilobytes, or `None` if no such entry was reported.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(name, kb)| (name.as_str(), *kb))
    }
}

impl IntoIterator for UsageSnapshot {
    type Item = (String, u64);
    type IntoIter = btree_map::IntoIter<String, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, u64)> for UsageSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_records() {
        let snapshot = UsageSnapshot::from_du_output("1024\tfoo\n2048\tbar\n");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("foo"), Some(1024));
        assert_eq!(snapshot.get("bar"), Some(2048));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(UsageSnapshot::from_du_output("").is_empty());
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let snapshot = UsageSnapshot::from_du_output("\n10\t.\n\n   \n5\t./sub\n");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("."), Some(10));
        assert_eq!(snapshot.get("./sub"), Some(5));
    }

    #[test]
    fn test_non_numeric_size_becomes_zero() {
        let snapshot = UsageSnapshot::from_du_output("abc\tbroken\n42\tnext\n");
        assert_eq!(snapshot.get("broken"), Some(0));
        assert_eq!(snapshot.get("next"), Some(42));
    }

    #[test]
    fn test_negative_size_becomes_zero() {
        let snapshot = UsageSnapshot::from_du_output("-5\tweird\n");
        assert_eq!(snapshot.get("weird"), Some(0));
    }

    #[test]
    fn test_name_keeps_later_tabs() {
        let snapshot = UsageSnapshot::from_du_output("7\tdir\twith\ttabs\n");
        assert_eq!(snapshot.get("dir\twith\ttabs"), Some(7));
    }

    #[test]
    fn test_line_without_tab_is_skipped() {
        let snapshot = UsageSnapshot::from_du_output("garbage\n3\tok\n");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("ok"), Some(3));
    }

    #[test]
    fn test_empty_name_is_skipped() {
        let snapshot = UsageSnapshot::from_du_output("12\t\n3\tok\n");
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains(""));
    }

    #[test]
    fn test_duplicate_name_keeps_last() {
        let snapshot = UsageSnapshot::from_du_output("1\tsame\n2\tsame\n");
        assert_eq!(snapshot.get("same"), Some(2));
    }

    #[test]
    fn test_iteration_is_sorted_by_name() {
        let snapshot = UsageSnapshot::from_du_output("1\tzeta\n2\talpha\n3\tmid\n");
        let names: Vec<&str> = snapshot.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// A single `du` record with a printable name
    #[derive(Debug, Clone)]
    struct DuRecord {
        kilobytes: u64,
        name: String,
    }

    impl Arbitrary for DuRecord {
        fn arbitrary(g: &mut Gen) -> Self {
            let segments = ["usr", "var", "log", "cache", "sub dir", "a.b", "äö"];
            let depth = 1 + usize::arbitrary(g) % 3;
            let mut name = String::from(".");
            for _ in 0..depth {
                name.push('/');
                name.push_str(g.choose(&segments).unwrap_or(&"x"));
            }
            DuRecord {
                kilobytes: u64::arbitrary(g),
                name,
            }
        }
    }

    #[quickcheck]
    fn prop_parse_never_yields_empty_names(raw: String) -> bool {
        let snapshot = UsageSnapshot::from_du_output(&raw);
        let names_present = snapshot.iter().all(|(name, _)| !name.is_empty());
        names_present
    }

    #[quickcheck]
    fn prop_well_formed_records_are_parsed(records: Vec<DuRecord>) -> bool {
        let output: String = records
            .iter()
            .map(|r| format!("{}\t{}\n", r.kilobytes, r.name))
            .collect();
        let snapshot = UsageSnapshot::from_du_output(&output);

        // Last record for a name wins
        let mut expected = BTreeMap::new();
        for r in &records {
            expected.insert(r.name.clone(), r.kilobytes);
        }

        snapshot.len() == expected.len()
            && expected
                .iter()
                .all(|(name, kb)| snapshot.get(name) == Some(*kb))
    }

    #[quickcheck]
    fn prop_garbage_lines_do_not_halt_parsing(garbage: Vec<String>, kb: u64) -> bool {
        let mut output = String::new();
        for line in &garbage {
            // Keep each garbage entry on its own line
            output.push_str(&line.replace('\n', " "));
            output.push('\n');
        }
        output.push_str(&format!("{}\tsentinel-entry\n", kb));

        UsageSnapshot::from_du_output(&output).get("sentinel-entry") == Some(kb)
    }
}
