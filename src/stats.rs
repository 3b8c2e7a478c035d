use crate::config::StageSkips;

/// Stage 1 counters. The classification buckets are mutually exclusive per record.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionStats {
    pub total: usize,
    pub isbn_only: usize,
    pub lccn_only: usize,
    pub both: usize,
    pub neither: usize,
    pub errors: usize,
}

impl ExtractionStats {
    pub fn with_isbn(&self) -> usize {
        self.isbn_only + self.both
    }

    pub fn with_lccn(&self) -> usize {
        self.lccn_only + self.both
    }
}

/// Stage 2 counters. Records passed through untouched are not counted anywhere.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolutionStats {
    pub lookups_required: usize,
    pub isbn_hits: usize,
    pub title_hits: usize,
    pub failures: usize,
}

/// Stage 3 counters. `missing` groups fetch failures and absent fields.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NoteStats {
    pub total: usize,
    pub found: usize,
    pub empty: usize,
    pub missing: usize,
    pub no_lccn: usize,
    pub parse_errors: usize,
}

/// Aggregate for one pipeline invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub extraction: ExtractionStats,
    pub resolution: ResolutionStats,
    pub notes: NoteStats,
}

impl RunStats {
    /// Human-readable summary of every stage that was not skipped.
    pub fn render_summary(&self, skips: &StageSkips) -> String {
        let mut out = String::new();
        out.push_str("===== SUMMARY =====\n");

        if !skips.stage1 {
            let s = &self.extraction;
            out.push_str("\nStage 1: Local Catalog Processing\n");
            out.push_str(&format!("Total records processed: {}\n", s.total));
            out.push_str(&format!(
                "Records with ISBN: {} ({:.1}%)\n",
                s.with_isbn(),
                percent(s.with_isbn(), s.total)
            ));
            out.push_str(&format!(
                "Records with LCCN: {} ({:.1}%)\n",
                s.with_lccn(),
                percent(s.with_lccn(), s.total)
            ));
            out.push_str(&format!(
                "Records with both ISBN and LCCN: {} ({:.1}%)\n",
                s.both,
                percent(s.both, s.total)
            ));
            out.push_str(&format!(
                "Records with neither ISBN nor LCCN: {} ({:.1}%)\n",
                s.neither,
                percent(s.neither, s.total)
            ));
            out.push_str(&format!("Errors during processing: {}\n", s.errors));
        }

        if !skips.stage2 {
            let s = &self.resolution;
            out.push_str("\nStage 2: LCCN Lookup\n");
            out.push_str(&format!("Items requiring LCCN lookup: {}\n", s.lookups_required));
            if s.lookups_required > 0 {
                for (label, count) in [
                    ("Successful lookups using ISBN", s.isbn_hits),
                    ("Successful lookups using title", s.title_hits),
                    ("Failed lookups", s.failures),
                ] {
                    out.push_str(&format!(
                        "{}: {} ({:.1}%)\n",
                        label,
                        count,
                        percent(count, s.lookups_required)
                    ));
                }
            }
        }

        if !skips.stage3 {
            let s = &self.notes;
            out.push_str("\nStage 3: 505 Field Retrieval\n");
            out.push_str(&format!("Total records processed: {}\n", s.total));
            if s.total > 0 {
                for (label, count) in [
                    ("Records with 505 content", s.found),
                    ("Records with empty 505 tags", s.empty),
                    ("Records with no 505 tags or errors", s.missing),
                    ("Records without an LCCN", s.no_lccn),
                ] {
                    out.push_str(&format!(
                        "{}: {} ({:.1}%)\n",
                        label,
                        count,
                        percent(count, s.total)
                    ));
                }
            }
            out.push_str(&format!("Errors during processing: {}\n", s.parse_errors));
        }

        out
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_totals_include_both() {
        let s = ExtractionStats {
            total: 4,
            isbn_only: 1,
            lccn_only: 1,
            both: 1,
            neither: 1,
            errors: 0,
        };
        assert_eq!(s.with_isbn(), 2);
        assert_eq!(s.with_lccn(), 2);
    }

    #[test]
    fn summary_skips_stages() {
        let stats = RunStats::default();
        let skips = StageSkips {
            stage1: true,
            stage2: false,
            stage3: true,
        };
        let summary = stats.render_summary(&skips);
        assert!(!summary.contains("Stage 1"));
        assert!(summary.contains("Items requiring LCCN lookup: 0"));
        assert!(!summary.contains("Stage 3"));
    }

    #[test]
    fn zero_total_prints_zero_percent() {
        let summary = RunStats::default().render_summary(&StageSkips::default());
        assert!(summary.contains("Records with ISBN: 0 (0.0%)"));
    }

    #[test]
    fn percentages_of_lookups() {
        let mut stats = RunStats::default();
        stats.resolution = ResolutionStats {
            lookups_required: 4,
            isbn_hits: 2,
            title_hits: 1,
            failures: 1,
        };
        let summary = stats.render_summary(&StageSkips::default());
        assert!(summary.contains("Successful lookups using ISBN: 2 (50.0%)"));
        assert!(summary.contains("Failed lookups: 1 (25.0%)"));
    }
}
