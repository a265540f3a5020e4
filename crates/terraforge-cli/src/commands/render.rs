use console::style;
use miette::Result;
use terraforge_core::config::{load_run_file, load_user_config, RunConfig, RunSettings, SourceDescriptor};
use terraforge_core::RunReport;

use crate::cli::Cli;

pub async fn run(cli: Cli) -> Result<()> {
    let verbose = cli.verbose;
    let config = resolve_config(&cli)?;
    print_header(&config);

    // Render failures are listed by the returned diagnostic, one related
    // entry per file.
    let report = terraforge_core::run(&config).await?;
    print_report(&report, verbose);
    Ok(())
}

/// Combine user defaults, the run file and the command line, in rising
/// precedence, into the run configuration.
fn resolve_config(cli: &Cli) -> Result<RunConfig> {
    let file_settings = match &cli.config {
        Some(path) => load_run_file(path)?,
        None => RunSettings::default(),
    };
    let user = load_user_config()?.unwrap_or_default();

    Ok(cli
        .settings()
        .or(file_settings)
        .with_user_defaults(&user)
        .into_config()?)
}

fn print_header(config: &RunConfig) {
    match &config.source {
        SourceDescriptor::Local { path } => {
            println!("  Source: local {}", style(path.display()).cyan());
        }
        SourceDescriptor::Git {
            repo_url,
            branch,
            subpath,
        } => {
            println!(
                "  Source: git {} ({}) {}",
                style(repo_url).cyan(),
                branch,
                subpath.display()
            );
        }
    }
    println!("  Output: {}", style(config.output_dir.display()).cyan());
    println!("  Data files (lowest precedence first):");
    for file in &config.data_files {
        println!("    - {}", file.display());
    }
    for over in &config.overrides {
        println!("    - --set {over}");
    }
}

fn print_report(report: &RunReport, verbose: bool) {
    let rendered = report.plan.rendered_count();
    let copied = report.plan.copied_count();

    let Some(written) = &report.written else {
        println!(
            "\n{} Dry run, files that would be written to {}:",
            style("==>").cyan().bold(),
            style(report.output_dir.display()).cyan()
        );
        for file in &report.plan.files {
            let action = if file.is_copy { "copy  " } else { "render" };
            println!("  {} {}", style(action).green(), file.relative_path);

            if verbose {
                println!("  {}", style("──────").dim());
                if file.is_copy {
                    println!("  {}", style(format!("[copied, {} bytes]", file.content.len())).dim());
                } else {
                    for line in String::from_utf8_lossy(&file.content).lines() {
                        println!("  {line}");
                    }
                }
                println!("  {}", style("──────").dim());
            }
        }
        println!("\nSummary: {rendered} rendered, {copied} copied. No files written.");
        return;
    };

    println!(
        "\n{} Rendered {} data layer(s) into {}",
        style("✓").green().bold(),
        report.layer_count,
        style(written.output_dir.display()).cyan()
    );
    if let Some(sha) = &report.commit_sha {
        println!("  commit: {sha}");
    }
    println!(
        "  {} files rendered, {} files copied",
        written.files_rendered.len(),
        written.files_copied.len()
    );
}
