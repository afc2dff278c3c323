use anyhow::Context;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SymbolOptions {
    /// Upper bound on symbols in one scan.
    pub max_symbols: usize,

    /// Used when neither arguments nor a file name any symbols.
    pub default_symbols: Vec<String>,
}

impl Default for SymbolOptions {
    fn default() -> Self {
        Self {
            max_symbols: 100,
            default_symbols: Vec::new(),
        }
    }
}

impl SymbolOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("SCAN_MAX_SYMBOLS") {
            if let Ok(n) = s.parse::<usize>() {
                out.max_symbols = n;
            }
        }

        if let Ok(s) = std::env::var("SCAN_SYMBOLS") {
            out.default_symbols = split_list(&s);
        }

        out
    }
}

/// Builds the scan list from CLI arguments, then the symbols file, then `SCAN_SYMBOLS`.
/// The first non-empty source wins. Output is uppercased and deduplicated in first-seen order.
pub fn resolve_symbols(
    args: &[String],
    file: Option<&Path>,
    opts: &SymbolOptions,
) -> anyhow::Result<Vec<String>> {
    let mut raw: Vec<String> = args.iter().flat_map(|a| split_list(a)).collect();

    if raw.is_empty() {
        if let Some(path) = file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read symbols file {} failed", path.display()))?;
            raw = parse_symbols_file(&text);
        }
    }

    if raw.is_empty() {
        raw = opts.default_symbols.clone();
    }

    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for s in raw {
        let symbol = s.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            continue;
        }
        anyhow::ensure!(is_valid_symbol(&symbol), "invalid symbol {symbol:?}");
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }

    anyhow::ensure!(
        !out.is_empty(),
        "no symbols to scan; pass them as arguments, --symbols-file or SCAN_SYMBOLS"
    );
    anyhow::ensure!(
        out.len() <= opts.max_symbols,
        "scan list has {} symbols, limit is {} (SCAN_MAX_SYMBOLS)",
        out.len(),
        opts.max_symbols
    );

    Ok(out)
}

fn split_list(s: &str) -> Vec<String> {
    s.split([',', ' '])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

// One symbol per line; `#` starts a comment.
fn parse_symbols_file(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .flat_map(split_list)
        .collect()
}

fn is_valid_symbol(s: &str) -> bool {
    s.len() <= 12
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
