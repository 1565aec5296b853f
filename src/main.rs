use std::fs;

use anyhow::{Context, Result};
use log::info;
use optnorm::optimizer::rules::default_sources;
use optnorm::RuleRegistry;

/// Compile rule files and print which rules each operator would try, in order.
///
/// With no arguments the built-in rule set is checked.
fn main() -> Result<()> {
    env_logger::init();

    let paths = std::env::args().skip(1).collect::<Vec<_>>();
    let registry = if paths.is_empty() {
        RuleRegistry::from_sources(default_sources())?
    } else {
        let mut sources = vec![];
        for path in paths.iter() {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
            sources.push((path.clone(), text));
        }
        RuleRegistry::from_sources(sources.iter().map(|(p, t)| (p.as_str(), t.as_str())))?
    };
    info!("compiled {} normalization rules", registry.len());

    for (op, rules) in registry.index_summary() {
        println!("{}: {}", op, rules.join(", "));
    }
    Ok(())
}
