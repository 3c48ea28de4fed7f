/// XP needed to clear `level`. Negative levels count as level 0.
pub fn next_threshold(level: i64) -> u64 {
    let lvl = level.max(0) as u64;
    lvl.saturating_mul(lvl)
        .saturating_mul(5)
        .saturating_add(lvl.saturating_mul(50))
        .saturating_add(100)
}

/// Share of the current level completed, clamped to `[0, 1]`.
pub fn progress_fraction(current_xp: u64, level: i64) -> f64 {
    let threshold = next_threshold(level);
    if current_xp >= threshold {
        return 1.0;
    }
    current_xp as f64 / threshold as f64
}
