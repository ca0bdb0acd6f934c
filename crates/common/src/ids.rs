//! Deterministic names for pipelines, windows and stages.

use std::collections::HashMap;

/// Hands out unique names scoped to one compilation.
///
/// Names are `part_part_..._n` where `n` counts how often the same prefix was
/// requested, so two compilations of the same statement produce the same names.
#[derive(Debug, Default, Clone)]
pub struct NameCreator {
    counters: HashMap<String, u64>,
}

impl NameCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh name from `parts`.
    pub fn create_name(&mut self, parts: &[&str]) -> String {
        let prefix = parts
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("_");
        let counter = self.counters.entry(prefix.clone()).or_insert(0);
        *counter += 1;
        format!("{prefix}_{counter}")
    }
}

#[cfg(test)]
mod tests {
    use super::NameCreator;

    #[test]
    fn names_are_unique_per_prefix() {
        let mut names = NameCreator::new();
        assert_eq!(names.create_name(&["root", "join", "window"]), "root_join_window_1");
        assert_eq!(names.create_name(&["root", "join", "window"]), "root_join_window_2");
        assert_eq!(names.create_name(&["root", "", "left"]), "root_left_1");
    }

    #[test]
    fn independent_creators_agree() {
        let mut a = NameCreator::new();
        let mut b = NameCreator::new();
        for _ in 0..3 {
            assert_eq!(a.create_name(&["p", "x"]), b.create_name(&["p", "x"]));
        }
    }
}
