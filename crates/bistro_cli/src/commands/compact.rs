//! Compact command implementation.

use super::open_engine;
use bistro_store::CompactStats;
use std::path::Path;

/// Runs the compact command.
pub async fn run(journal: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journal at {:?}", journal);
    let engine = open_engine(journal)?;
    let stats = engine.compact().await?;
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &CompactStats) {
    println!();
    println!("  Entries before: {}", stats.entries_before);
    println!("  Entries after:  {}", stats.entries_after);
    println!("  Size before:    {} bytes", stats.bytes_before);
    println!("  Size after:     {} bytes", stats.bytes_after);
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!("  Space saved:    {} bytes ({:.1}%)", saved, saved_percent(stats));
}

fn saved_percent(stats: &CompactStats) -> f64 {
    if stats.bytes_before == 0 {
        return 0.0;
    }
    stats.bytes_before.saturating_sub(stats.bytes_after) as f64 / stats.bytes_before as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_percent_handles_empty_journal() {
        assert_eq!(saved_percent(&CompactStats::default()), 0.0);
        let stats = CompactStats {
            bytes_before: 400,
            bytes_after: 100,
            ..CompactStats::default()
        };
        assert_eq!(saved_percent(&stats), 75.0);
    }
}
