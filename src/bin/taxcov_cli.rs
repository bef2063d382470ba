use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use taxcov_rs::{classify_with, EngineConfig, References};

const USAGE: &str = "usage: taxcov-rs <taxonomy.tab> <acc2taxid.tab> <out_prefix> <hits.tsv[.gz]>... [queries.fasta[.gz]]";

const FASTA_EXTENSIONS: [&str; 4] = ["fa", "fasta", "fna", "faa"];

/// Query FASTA files are recognized by extension, with or without `.gz`.
fn is_fasta(path: &Path) -> bool {
    let name = path.to_string_lossy().to_ascii_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    FASTA_EXTENSIONS
        .iter()
        .any(|ext| name.rsplit_once('.').is_some_and(|(_, e)| e == *ext))
}

fn spinner(color: &str, msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&format!("{{spinner:.{}}} {{msg}}", color))
    {
        spinner.set_style(style);
    }
    spinner.set_message(msg);
    spinner
}

fn write_or_exit(path: &str, contents: String) {
    if let Err(e) = fs::write(path, contents) {
        log::error!("Could not write {}: {}", path, e);
        process::exit(1);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 4 {
        eprintln!("{}", USAGE);
        process::exit(2);
    }
    let taxonomy = &args[0];
    let accession_index = &args[1];
    let prefix = &args[2];
    let (fasta, hits_files): (Vec<PathBuf>, Vec<PathBuf>) =
        args[3..].iter().map(PathBuf::from).partition(|p| is_fasta(p));
    if hits_files.is_empty() || fasta.len() > 1 {
        eprintln!("{}", USAGE);
        process::exit(2);
    }
    let lengths_fasta = fasta.into_iter().next();
    let config = EngineConfig::default();

    // 1. Load taxonomy and accession index
    let progress = spinner("blue", "Loading taxonomy and accession index...");
    let refs = match References::load(taxonomy, accession_index, config.accession_index_mode) {
        Ok(refs) => refs,
        Err(e) => {
            progress.abandon_with_message("Loading failed.");
            log::error!("{}", e);
            process::exit(1);
        }
    };
    progress.finish_with_message("References loaded.");

    // 2. Classify
    let progress = spinner("green", "Classifying hits...");
    let results = match classify_with(&refs, hits_files, lengths_fasta, &config) {
        Ok(results) => results,
        Err(e) => {
            progress.abandon_with_message("Classification failed.");
            log::error!("{}", e);
            process::exit(1);
        }
    };
    progress.finish_with_message(format!(
        "Classified {} rows, {} LCA calls.",
        results.coverage_records.len(),
        results.lca_calls.len()
    ));

    // 3. Write reports
    let progress = spinner("yellow", "Writing output files...");
    write_or_exit(&format!("{}.coverage.tsv", prefix), results.get_coverage_report());
    write_or_exit(&format!("{}.lca.tsv", prefix), results.get_lca_report());
    write_or_exit(&format!("{}.contig.tsv", prefix), results.get_contig_report());
    if !results.missing_accessions.is_empty() {
        write_or_exit(&format!("{}.missing.txt", prefix), results.get_missing_accessions_text());
    }
    progress.finish_with_message("Output files created.");
}
