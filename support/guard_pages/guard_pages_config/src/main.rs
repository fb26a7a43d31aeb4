// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Generates a header that makes the host page size available at compile
//! time, so that page-sized buffers can be declared without a runtime query.
//!
//! The output is regenerated by the build and should never be edited by hand.

#![forbid(unsafe_code)]

mod header;

use anyhow::Context;
use clap::Parser;
use header::Format;
use header::HeaderConfig;
use std::io::Write;
use std::path::PathBuf;

const BUILD_DATE: &str = env!("GUARD_PAGES_CONFIG_BUILD_DATE");

#[derive(Parser, Debug)]
#[clap(
    name = "guard_pages_config",
    about = "Emits the virtual-memory page size as a compile-time constant."
)]
struct Options {
    /// The language of the generated file.
    #[clap(long, value_enum, default_value_t = Format::C)]
    format: Format,

    /// Write to this file instead of stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Use this page size instead of querying the host.
    #[clap(long, value_parser = parse_page_size)]
    page_size: Option<usize>,

    /// Enable verbose logging (trace level).
    #[clap(short, long)]
    verbose: bool,
}

fn parse_page_size(s: &str) -> Result<usize, String> {
    let size = s.parse::<usize>().map_err(|err| err.to_string())?;
    if !size.is_power_of_two() {
        return Err(format!("{size} is not a power of two"));
    }
    Ok(size)
}

fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .log_internal_errors(true)
        .with_max_level(if options.verbose {
            tracing::Level::TRACE
        } else {
            tracing::Level::INFO
        })
        .init();

    let page_size = match options.page_size {
        Some(size) => {
            tracing::debug!(size, "using page size override");
            size
        }
        None => guard_pages::page_size(),
    };

    let text = header::render(&HeaderConfig {
        format: options.format,
        tool: env!("CARGO_PKG_NAME"),
        date: BUILD_DATE,
        platform: header::platform_label(),
        page_size,
    });

    match &options.output {
        Some(path) => {
            fs_err::write(path, text)?;
            tracing::info!(path = %path.display(), page_size, "wrote page size header");
        }
        None => {
            std::io::stdout()
                .lock()
                .write_all(text.as_bytes())
                .context("failed to write to stdout")?;
        }
    }
    Ok(())
}
