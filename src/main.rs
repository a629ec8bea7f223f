// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for asm80.

use clap::Parser;
use serde_json::json;

use asm80::assembler::{self, Cli, OutputFormat};

fn main() {
    let cli = Cli::parse();
    let format = cli.format;
    let use_color = std::env::var("NO_COLOR").is_err();

    match assembler::run_with_cli(&cli) {
        Ok(report) => {
            for diag in report.diagnostics() {
                match format {
                    OutputFormat::Json => eprintln!("{}", diag.to_json()),
                    OutputFormat::Text => eprintln!(
                        "{}",
                        diag.format_with_context(Some(report.source_lines()), use_color)
                    ),
                }
            }
        }
        Err(err) => {
            match format {
                OutputFormat::Json => {
                    for diag in err.diagnostics() {
                        eprintln!("{}", diag.to_json());
                    }
                    eprintln!("{}", json!({ "error": err.to_string() }));
                }
                OutputFormat::Text => {
                    for diag in err.diagnostics() {
                        eprintln!(
                            "{}",
                            diag.format_with_context(Some(err.source_lines()), use_color)
                        );
                    }
                    eprintln!("{err}");
                }
            }
            std::process::exit(1);
        }
    }
}
