use std::collections::HashSet;

/// Unions `incoming` into `existing`, dropping blanks and duplicates, then keeps
/// only the newest `max` entries.
///
/// Existing facts keep their order and new ones are appended in the order the
/// backend returned them, so eviction from the front drops the oldest facts.
pub fn merge_facts(existing: &[String], incoming: &[String], max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for fact in existing.iter().chain(incoming) {
        let fact = fact.trim();
        if fact.is_empty() || !seen.insert(fact.to_string()) {
            continue;
        }
        merged.push(fact.to_string());
    }

    if merged.len() > max {
        merged.drain(..merged.len() - max);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_union_without_bound() {
        let merged = merge_facts(
            &facts(&["likes tea", "from Japan"]),
            &facts(&["likes tea", "plays piano"]),
            10,
        );
        assert_eq!(merged, facts(&["likes tea", "from Japan", "plays piano"]));
    }

    #[test]
    fn test_bound_evicts_oldest() {
        let merged = merge_facts(
            &facts(&["likes tea", "from Japan"]),
            &facts(&["likes tea", "plays piano"]),
            2,
        );
        assert_eq!(merged, facts(&["from Japan", "plays piano"]));
    }

    #[test]
    fn test_blank_and_padded_facts() {
        let merged = merge_facts(&facts(&["  cat owner "]), &facts(&["", "cat owner", "  "]), 5);
        assert_eq!(merged, facts(&["cat owner"]));
    }

    #[test]
    fn test_repeated_merges_hold_invariants() {
        let mut current = Vec::new();
        for round in 0..25 {
            let incoming: Vec<String> = (0..4)
                .map(|i| format!("fact {}", (round * 3 + i) % 11))
                .collect();
            current = merge_facts(&current, &incoming, 6);

            let unique: HashSet<_> = current.iter().collect();
            assert_eq!(unique.len(), current.len(), "duplicates after round {}", round);
            assert!(current.len() <= 6);
        }
    }

    #[test]
    fn test_zero_bound() {
        assert!(merge_facts(&facts(&["a"]), &facts(&["b"]), 0).is_empty());
    }
}
