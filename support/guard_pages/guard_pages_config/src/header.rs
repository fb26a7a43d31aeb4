// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rendering of the generated page size header.

use std::fmt::Write;

/// The language of the generated file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// A C header with a `#define`.
    C,
    /// A Rust module with a `const`.
    Rust,
}

/// Everything that ends up in the generated file.
#[derive(Debug, Clone)]
pub struct HeaderConfig<'a> {
    pub format: Format,
    pub tool: &'a str,
    pub date: &'a str,
    pub platform: Option<&'a str>,
    pub page_size: usize,
}

/// Returns the label for the platform this tool was built for.
pub fn platform_label() -> Option<&'static str> {
    if cfg!(windows) {
        Some("MS Windows(TM)")
    } else if cfg!(target_os = "linux") {
        Some("Linux")
    } else if cfg!(target_os = "macos") {
        Some("macOS")
    } else if cfg!(target_os = "freebsd") {
        Some("FreeBSD")
    } else if cfg!(target_os = "aix") {
        Some("AIX")
    } else {
        None
    }
}

fn banner(config: &HeaderConfig<'_>) -> [String; 3] {
    let origin = match config.platform {
        Some(platform) => format!("under {platform} the {}", config.date),
        None => format!("the {}", config.date),
    };
    [
        "WARNING: DO NOT CHANGE THIS FILE!".to_owned(),
        format!("This file is automatically generated by {}", config.tool),
        origin,
    ]
}

/// Renders the generated file.
pub fn render(config: &HeaderConfig<'_>) -> String {
    let mut out = String::new();
    let banner = banner(config);
    match config.format {
        Format::C => {
            out.push_str("/*\n");
            for line in &banner {
                writeln!(out, " * {line}").unwrap();
            }
            out.push_str(" */\n\n");
            out.push_str("#ifndef GUARD_PAGES_CONFIG_H\n");
            out.push_str("#define GUARD_PAGES_CONFIG_H\n\n");
            out.push_str("/*\n");
            out.push_str(" * Number of bytes per virtual-memory page, as returned by page_size().\n");
            out.push_str(" */\n");
            writeln!(out, "#define PAGE_SIZE {}", config.page_size).unwrap();
            out.push_str("\n#endif /* GUARD_PAGES_CONFIG_H */\n");
        }
        Format::Rust => {
            for line in &banner {
                writeln!(out, "// {line}").unwrap();
            }
            out.push('\n');
            out.push_str(
                "/// Number of bytes per virtual-memory page, as returned by `guard_pages::page_size()`.\n",
            );
            writeln!(out, "pub const PAGE_SIZE: usize = {};", config.page_size).unwrap();
        }
    }
    out
}
