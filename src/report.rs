//src/report.rs

use std::fmt::Write as FmtWrite;

use crate::error::RowParseError;
use crate::types::{ContigRecord, CoverageRecord, LcaCall, Rank, RecordKind, UNCLASSIFIED};

pub const COVERAGE_HEADER: &str = "SEQ\tRANK\tORGANISM\tTAX_ID\tPARENT\tLENGTH\tNUM_HIT\tTOL_HIT_LEN\tTOL_MISM\tAVG_IDT\tLINEAR_LEN\tRANK_LINEAR_LEN\tCOV\tSCALED_COV\tACC_COV_RGN\tACC_COV_LEN";

pub const CONTIG_HEADER: &str = "SEQ\tRANK\tORGANISM\tTAX_ID\tPARENT\tLENGTH\tNUM_HIT\tTOL_HIT_LEN\tTOL_MISM\tAVG_IDT\tLINEAR_LEN\tRANK_LINEAR_LEN\tCOV\tSCALED_COV\tNUM_MERGED\tACC_COV_LEN";

const NUM_COLUMNS: usize = 16;

fn float(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_default()
}

fn id(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// `1..60;75..80`
pub fn format_regions(regions: &[(u64, u64)]) -> String {
    regions
        .iter()
        .map(|(s, e)| format!("{}..{}", s, e))
        .collect::<Vec<_>>()
        .join(";")
}

/// One coverage row without the trailing newline.
pub fn format_coverage_row(r: &CoverageRecord) -> String {
    let regions = format_regions(&r.owned_regions);
    match r.kind {
        RecordKind::Taxon => format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.query_id,
            r.rank,
            r.name,
            id(r.taxon_id),
            r.parent,
            r.query_length,
            r.num_hits,
            r.total_hit_length,
            r.total_mismatches,
            float(r.average_identity()),
            r.linear_length,
            r.rank_linear_length,
            float(r.coverage()),
            float(r.scaled_coverage()),
            regions,
            r.owned_length
        ),
        RecordKind::Unclassified => format!(
            "{}\t{}\t{}\t\t\t{}\t\t\t\t\t{}\t\t{}\t\t{}\t{}",
            r.query_id,
            r.rank,
            UNCLASSIFIED,
            r.query_length,
            r.linear_length,
            float(r.coverage()),
            regions,
            r.owned_length
        ),
    }
}

/// Coverage table with header, rows in the order given.
pub fn coverage_report(records: &[CoverageRecord]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{}", COVERAGE_HEADER);
    for record in records {
        let _ = writeln!(output, "{}", format_coverage_row(record));
    }
    output
}

/// One line per query that has an LCA call, same columns as the coverage table.
pub fn lca_report(calls: &[LcaCall]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{}", COVERAGE_HEADER);
    for call in calls {
        let _ = writeln!(output, "{}", format_coverage_row(&call.record));
    }
    output
}

pub fn format_contig_row(r: &ContigRecord) -> String {
    match r.kind {
        RecordKind::Taxon => format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.contig_id,
            r.rank,
            r.name,
            id(r.taxon_id),
            r.parent,
            r.length,
            r.num_hits,
            r.total_hit_length,
            r.total_mismatches,
            float(r.average_identity()),
            r.linear_length,
            r.rank_linear_length,
            float(r.coverage()),
            float(r.scaled_coverage()),
            r.num_merged,
            r.owned_length
        ),
        RecordKind::Unclassified => format!(
            "{}\t{}\t{}\t\t\t{}\t\t\t\t\t{}\t\t{}\t\t{}\t{}",
            r.contig_id,
            r.rank,
            UNCLASSIFIED,
            r.length,
            r.linear_length,
            float(r.coverage()),
            r.num_merged,
            r.owned_length
        ),
    }
}

pub fn contig_report(records: &[ContigRecord]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{}", CONTIG_HEADER);
    for record in records {
        let _ = writeln!(output, "{}", format_contig_row(record));
    }
    output
}

/// Top-hit contig rows, optionally prefixed with a `PROJECT` column.
pub fn top_hit_report(rows: &[&ContigRecord], project: Option<&str>) -> String {
    let mut output = String::new();
    match project {
        Some(_) => {
            let _ = writeln!(output, "PROJECT\t{}", CONTIG_HEADER);
        }
        None => {
            let _ = writeln!(output, "{}", CONTIG_HEADER);
        }
    }
    for row in rows {
        match project {
            Some(name) => {
                let _ = writeln!(output, "{}\t{}", name, format_contig_row(row));
            }
            None => {
                let _ = writeln!(output, "{}", format_contig_row(row));
            }
        }
    }
    output
}

fn bad_value(column: &'static str, value: &str) -> RowParseError {
    RowParseError::BadValue {
        column,
        value: value.to_string(),
    }
}

fn parse_u64(field: &str, column: &'static str) -> Result<u64, RowParseError> {
    if field.is_empty() {
        return Ok(0);
    }
    field.parse().map_err(|_| bad_value(column, field))
}

fn parse_regions(field: &str) -> Result<Vec<(u64, u64)>, RowParseError> {
    field
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|region| {
            let (s, e) = region
                .split_once("..")
                .ok_or_else(|| bad_value("ACC_COV_RGN", region))?;
            Ok((parse_u64(s, "ACC_COV_RGN")?, parse_u64(e, "ACC_COV_RGN")?))
        })
        .collect()
}

/// Reads back a row produced by `format_coverage_row`.
pub fn parse_coverage_row(line: &str) -> Result<CoverageRecord, RowParseError> {
    let fields: Vec<&str> = line.trim_end_matches(&['\r', '\n'][..]).split('\t').collect();
    if fields.len() != NUM_COLUMNS {
        return Err(RowParseError::ColumnCount {
            expected: NUM_COLUMNS,
            found: fields.len(),
        });
    }

    let rank: Rank = fields[1].parse().map_err(|_| bad_value("RANK", fields[1]))?;
    let kind = if fields[2] == UNCLASSIFIED && fields[3].is_empty() {
        RecordKind::Unclassified
    } else {
        RecordKind::Taxon
    };
    let taxon_id = match fields[3] {
        "" => None,
        s => Some(s.parse().map_err(|_| bad_value("TAX_ID", s))?),
    };

    Ok(CoverageRecord {
        query_id: fields[0].to_string(),
        rank,
        kind,
        name: fields[2].to_string(),
        taxon_id,
        parent: fields[4].to_string(),
        query_length: parse_u64(fields[5], "LENGTH")?,
        num_hits: parse_u64(fields[6], "NUM_HIT")?,
        total_hit_length: parse_u64(fields[7], "TOL_HIT_LEN")?,
        total_mismatches: parse_u64(fields[8], "TOL_MISM")?,
        linear_length: parse_u64(fields[10], "LINEAR_LEN")?,
        rank_linear_length: parse_u64(fields[11], "RANK_LINEAR_LEN")?,
        owned_regions: parse_regions(fields[14])?,
        owned_length: parse_u64(fields[15], "ACC_COV_LEN")?,
    })
}

/// Parses a whole coverage table, skipping the header and blank lines.
pub fn parse_coverage_report(text: &str) -> Result<Vec<CoverageRecord>, RowParseError> {
    text.lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with("SEQ\t"))
        .map(parse_coverage_row)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxon_row() -> CoverageRecord {
        CoverageRecord {
            query_id: "q1".to_string(),
            rank: Rank::Species,
            kind: RecordKind::Taxon,
            name: "Bacillus anthracis".to_string(),
            taxon_id: Some(4),
            parent: "Bacillus".to_string(),
            query_length: 100,
            num_hits: 2,
            total_hit_length: 81,
            total_mismatches: 3,
            linear_length: 70,
            rank_linear_length: 70,
            owned_regions: vec![(1, 60), (65, 74)],
            owned_length: 70,
        }
    }

    fn unclassified_row() -> CoverageRecord {
        CoverageRecord {
            query_id: "q1".to_string(),
            rank: Rank::Species,
            kind: RecordKind::Unclassified,
            name: UNCLASSIFIED.to_string(),
            taxon_id: None,
            parent: String::new(),
            query_length: 100,
            num_hits: 0,
            total_hit_length: 0,
            total_mismatches: 0,
            linear_length: 30,
            rank_linear_length: 0,
            owned_regions: vec![(61, 64), (75, 100)],
            owned_length: 30,
        }
    }

    #[test]
    fn test_taxon_row_layout() {
        assert_eq!(
            format_coverage_row(&taxon_row()),
            "q1\tspecies\tBacillus anthracis\t4\tBacillus\t100\t2\t81\t3\t0.9630\t70\t70\t0.7000\t1.0000\t1..60;65..74\t70"
        );
    }

    #[test]
    fn test_unclassified_row_layout() {
        let line = format_coverage_row(&unclassified_row());
        assert_eq!(line, "q1\tspecies\tunclassified\t\t\t100\t\t\t\t\t30\t\t0.3000\t\t61..64;75..100\t30");
        assert_eq!(line.split('\t').count(), NUM_COLUMNS);
    }

    #[test]
    fn test_undefined_ratios_are_empty() {
        let mut row = taxon_row();
        row.total_hit_length = 0;
        row.rank_linear_length = 0;
        let fields: Vec<String> = format_coverage_row(&row).split('\t').map(String::from).collect();
        assert_eq!(fields[9], "");
        assert_eq!(fields[13], "");
    }

    #[test]
    fn test_parse_reads_back_written_rows() {
        let rows = vec![taxon_row(), unclassified_row()];
        let text = coverage_report(&rows);
        assert!(text.starts_with(COVERAGE_HEADER));
        assert_eq!(parse_coverage_report(&text).unwrap(), rows);
    }

    #[test]
    fn test_parse_rejects_bad_rows() {
        assert_eq!(
            parse_coverage_row("q1\tspecies\tX"),
            Err(RowParseError::ColumnCount {
                expected: NUM_COLUMNS,
                found: 3
            })
        );
        let bad_rank = format_coverage_row(&taxon_row()).replace("species", "tribe");
        assert_eq!(
            parse_coverage_row(&bad_rank),
            Err(RowParseError::BadValue {
                column: "RANK",
                value: "tribe".to_string()
            })
        );
        let bad_region = format_coverage_row(&taxon_row()).replace("1..60;", "1-60;");
        assert_eq!(
            parse_coverage_row(&bad_region),
            Err(RowParseError::BadValue {
                column: "ACC_COV_RGN",
                value: "1-60".to_string()
            })
        );
    }

    #[test]
    fn test_top_hit_report_prefix() {
        let row = contig_row();
        let text = top_hit_report(&[&row], Some("proj"));
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), format!("PROJECT\t{}", CONTIG_HEADER));
        assert_eq!(lines.next().unwrap(), format!("proj\t{}", format_contig_row(&row)));
        assert!(lines.next().is_none());
    }

    fn contig_row() -> ContigRecord {
        ContigRecord {
            contig_id: "c1".to_string(),
            rank: Rank::Genus,
            kind: RecordKind::Unclassified,
            name: UNCLASSIFIED.to_string(),
            taxon_id: None,
            parent: String::new(),
            length: 200,
            num_hits: 0,
            total_hit_length: 0,
            total_mismatches: 0,
            linear_length: 50,
            rank_linear_length: 0,
            num_merged: 2,
            owned_length: 50,
        }
    }

    #[test]
    fn test_contig_row_layout() {
        assert_eq!(format_contig_row(&contig_row()), "c1\tgenus\tunclassified\t\t\t200\t\t\t\t\t50\t\t0.2500\t\t2\t50");
    }
}
