// main.rs

// --- External Crate Imports ---
use anyhow::{anyhow, Context, Error, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use phenocorr::io::{BedPhenotypeReader, CovariateTable};
use phenocorr::{AnalysisConfig, AnalysisDriver, AnalysisReport, PhenotypeStore, StatsError};
use rayon::prelude::*;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    time::Instant,
};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting phenocorr with args: {:?}", cli_args);

    // Configure Rayon thread pool
    let num_threads = cli_args.threads.unwrap_or_else(num_cpus::get);
    info!("Using {} threads for parallel operations.", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    // --- 1. Parse Region ---
    let region = phenocorr::set_region(&cli_args.region)?;
    info!("Analysis region: {}", region);

    // --- 2. Scan & Load Phenotypes ---
    let first_bed_path = &cli_args.bed_files[0];
    let scan = PhenotypeStore::scan(&mut BedPhenotypeReader::from_path(first_bed_path)?)
        .with_context(|| format!("Failed to scan phenotype file {}", first_bed_path.display()))?;
    info!(
        "Established sample set from {}: {} samples, {} features. \
         All other phenotype files must match this set and order.",
        first_bed_path.display(),
        scan.sample_count(),
        scan.feature_count()
    );
    debug!(
        "Sample names (first 5): {:?}",
        scan.sample_names.iter().take(5).collect::<Vec<_>>()
    );

    let mut store = PhenotypeStore::new();
    for bed_path in &cli_args.bed_files {
        let mut reader = BedPhenotypeReader::from_path(bed_path)?;
        store
            .load_in_region(&mut reader, &region)
            .with_context(|| format!("Failed to load phenotype file {}", bed_path.display()))?;
    }
    store.sort();

    if store.is_empty() {
        return Err(anyhow!("No phenotypes overlap region {}.", region));
    }

    // --- 3. Missing Values ---
    if cli_args.drop_unimputable {
        let dropped = store.drop_unimputable();
        if !dropped.is_empty() {
            info!("Removed {} features without any observed value.", dropped.len());
        }
    }
    if cli_args.impute {
        store
            .impute()
            .context("Imputation failed; rerun with --drop-unimputable to remove such features")?;
    }

    // --- 4. Read Covariates ---
    let covariates = CovariateTable::from_path(&cli_args.covariate_file, store.sample_names())
        .with_context(|| {
            format!(
                "Failed to read covariates from {}",
                cli_args.covariate_file.display()
            )
        })?;
    if covariates.is_empty() {
        return Err(anyhow!(
            "No covariate rows found in {}.",
            cli_args.covariate_file.display()
        ));
    }
    info!(
        "Testing {} features against {} covariates.",
        store.len(),
        covariates.len()
    );

    // --- 5. Run Analyses ---
    let config = if cli_args.sequential {
        AnalysisConfig::for_store(&store).sequential()
    } else {
        AnalysisConfig::for_store(&store)
    };

    let pb_style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
             {pos}/{len} covariates ({percent}%) ETA: {eta}",
        )
        .map_err(|e| anyhow!("Failed to create progress bar style: {}", e))?
        .progress_chars("=> ");
    let pb = ProgressBar::new(covariates.len() as u64).with_style(pb_style);

    let report_results: Vec<Result<AnalysisReport, StatsError>> = (0..covariates.len())
        .into_par_iter()
        .map(|i| {
            let result = AnalysisDriver::new(&store, config)
                .and_then(|driver| driver.select_region(&region))
                .and_then(|selected| selected.run(covariates.row(i)));
            pb.inc(1);
            result
        })
        .collect();
    pb.finish_with_message("Association testing complete.");

    let mut reports = Vec::with_capacity(report_results.len());
    let mut analysis_errors = Vec::new();
    for (i, result) in report_results.into_iter().enumerate() {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => analysis_errors.push(anyhow!(
                "Analysis of covariate {} failed: {}",
                covariates.ids()[i],
                e
            )),
        }
    }
    if !analysis_errors.is_empty() {
        for err in analysis_errors {
            error!("{}", err);
        }
        return Err(anyhow!("One or more analyses failed. See errors above."));
    }

    let total_skipped: usize = reports.iter().map(|r| r.skipped.len()).sum();
    if total_skipped > 0 {
        warn!(
            "{} feature/covariate pairs were skipped; see the skipped report.",
            total_skipped
        );
    }

    // --- 6. Write Outputs ---
    let output_prefix_path = PathBuf::from(&cli_args.output_prefix);
    if let Some(parent) = output_prefix_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow!("Failed to create output directory {}: {}", parent.display(), e)
            })?;
            info!("Created output directory: {}", parent.display());
        }
    }
    info!(
        "Writing results to files with prefix '{}'...",
        cli_args.output_prefix
    );

    output_writer::write_associations(
        &cli_args.output_prefix,
        covariates.ids(),
        &reports,
        &store,
    )?;
    output_writer::write_skipped(&cli_args.output_prefix, covariates.ids(), &reports)?;

    info!(
        "phenocorr finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

// --- Module Implementations ---

mod cli {
    use clap::Parser;
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(
        author,
        version,
        about = "Region-restricted phenotype/covariate association.",
        long_about = None,
        propagate_version = true
    )]
    pub(crate) struct CliArgs {
        /// Phenotype BED files sharing one sample set.
        #[arg(short = 'b', long = "bed", required = true, num_args = 1..)]
        pub(crate) bed_files: Vec<PathBuf>,

        /// Covariate table: one row per covariate, one column per sample.
        #[arg(short = 'c', long = "cov", required = true)]
        pub(crate) covariate_file: PathBuf,

        /// `*`, `chr`, `chr:pos` or `chr:start-end` (1-based, inclusive).
        #[arg(short, long, default_value = phenocorr::region::WHOLE_GENOME)]
        pub(crate) region: String,

        #[arg(short, long = "out", required = true)]
        pub(crate) output_prefix: String,

        /// Replace missing values with the feature mean.
        #[arg(long)]
        pub(crate) impute: bool,

        /// Remove features without any observed value.
        #[arg(long)]
        pub(crate) drop_unimputable: bool,

        /// Evaluate features of each analysis on one thread.
        #[arg(long)]
        pub(crate) sequential: bool,

        #[arg(short = 't', long)]
        pub(crate) threads: Option<usize>,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,
    }
}

mod output_writer {
    use super::{anyhow, info, AnalysisReport, BufWriter, File, PhenotypeStore, Result, Write};

    fn create_output_file(prefix: &str, suffix: &str) -> Result<BufWriter<File>> {
        let filename = format!("{}.{}", prefix, suffix);
        File::create(&filename)
            .map(BufWriter::new)
            .map_err(|e| anyhow!("Failed to create output file {}: {}", filename, e))
    }

    pub(crate) fn write_associations(
        output_prefix: &str,
        covariate_ids: &[String],
        reports: &[AnalysisReport],
        store: &PhenotypeStore,
    ) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "assoc.tsv")?;
        info!("Writing associations to {}.assoc.tsv", output_prefix);

        writeln!(writer, "covariate\tfeature\tchr\tstart\tend\tstrand\tr\tp")?;
        let mut rows = 0usize;
        for (covariate_id, report) in covariate_ids.iter().zip(reports) {
            for result in &report.results {
                let record = store.get(&result.feature_id).ok_or_else(|| {
                    anyhow!("Feature '{}' vanished from the phenotype store.", result.feature_id)
                })?;
                let locus = record.locus;
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{:.6}\t{:.6e}",
                    covariate_id,
                    locus.id,
                    locus.chr,
                    locus.start,
                    locus.end,
                    if locus.negative_strand { '-' } else { '+' },
                    result.correlation,
                    result.p_value
                )?;
                rows += 1;
            }
        }
        writer.flush()?;
        info!("Wrote {} association rows.", rows);
        Ok(())
    }

    pub(crate) fn write_skipped(
        output_prefix: &str,
        covariate_ids: &[String],
        reports: &[AnalysisReport],
    ) -> Result<()> {
        if reports.iter().all(|r| r.skipped.is_empty()) {
            info!("No skipped features to write.");
            return Ok(());
        }
        let mut writer = create_output_file(output_prefix, "skipped.tsv")?;
        info!("Writing skipped features to {}.skipped.tsv", output_prefix);

        writeln!(writer, "covariate\tfeature\treason")?;
        for (covariate_id, report) in covariate_ids.iter().zip(reports) {
            for skipped in &report.skipped {
                writeln!(writer, "{}\t{}\t{}", covariate_id, skipped.feature_id, skipped.error)?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
