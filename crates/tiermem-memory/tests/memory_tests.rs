#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use tiermem_core::{ErrorKind, MemError};
    use tiermem_memory::*;

    fn filler(i: usize, chars: usize) -> String {
        let mut text = format!("fact {i:04} ");
        while text.len() < chars {
            text.push_str("lorem ");
        }
        text.truncate(chars);
        text
    }

    // ── Scorer ─────────────────────────────────────────────────

    mod scorer {
        use super::*;
        use tiermem_memory::scorer::score;

        #[test]
        fn test_score_at_45_days_brackets_threshold() {
            let now = Utc::now();
            let created = now - Duration::days(45);
            let high = score(0.9, created, 0, now);
            let low = score(0.1, created, 0, now);
            assert!(high > 0.3, "high-importance fact should survive, got {high}");
            assert!(low < 0.3, "low-importance fact should expire, got {low}");
        }

        #[test]
        fn test_score_never_increases_with_age() {
            let now = Utc::now();
            for access in [0u32, 1, 10] {
                let mut prev = f64::INFINITY;
                for hours in (0..24 * 90).step_by(7) {
                    let s = score(0.6, now - Duration::hours(hours), access, now);
                    assert!(s <= prev);
                    prev = s;
                }
            }
        }
    }

    // ── Tree index ─────────────────────────────────────────────

    mod tree {
        use super::*;
        use tiermem_memory::tree::{TREE_MAX_CHILDREN, TREE_MAX_DEPTH, TREE_MAX_NODES, depth};

        fn assert_caps(tree: &TreeIndex) {
            assert!(tree.len() <= TREE_MAX_NODES);
            for (path, node) in tree.nodes() {
                assert!(depth(path) <= TREE_MAX_DEPTH, "{path} too deep");
                assert!(node.children.len() <= TREE_MAX_CHILDREN, "{path} too wide");
            }
        }

        #[test]
        fn test_add_creates_ancestors() {
            let mut tree = TreeIndex::in_memory();
            assert!(tree.add("work/projectA", "Project A").unwrap());
            assert_eq!(tree.len(), 3);
            assert_eq!(tree.node("work").unwrap().desc, "Work");
            assert!(tree.node("root").unwrap().children.contains("work"));
            assert!(tree.node("work").unwrap().children.contains("work/projectA"));
            assert!(!tree.add("work/projectA", "again").unwrap());
        }

        #[test]
        fn test_add_rejects_depth_beyond_cap() {
            let mut tree = TreeIndex::in_memory();
            tree.add("a/b/c", "three deep").unwrap();
            let err = tree.add("a/b/c/d", "four deep").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::LimitExceeded);
            assert!(tree.node("a/b/c/d").is_none());
            assert_caps(&tree);
        }

        #[test]
        fn test_add_rejects_fanout_beyond_cap() {
            let mut tree = TreeIndex::in_memory();
            for i in 0..TREE_MAX_CHILDREN {
                tree.add(&format!("c{i}"), "child").unwrap();
            }
            let before = tree.nodes().clone();
            assert!(tree.add("overflow", "one too many").is_err());
            assert_eq!(tree.nodes(), &before);
        }

        #[test]
        fn test_add_rejects_node_count_beyond_cap() {
            let mut tree = TreeIndex::in_memory();
            'fill: for top in 0..10 {
                tree.add(&format!("t{top}"), "top").unwrap();
                for child in 0..10 {
                    if tree.len() == TREE_MAX_NODES {
                        break 'fill;
                    }
                    tree.add(&format!("t{top}/c{child}"), "leaf").unwrap();
                }
            }
            assert_eq!(tree.len(), TREE_MAX_NODES);
            let err = tree.add("t9/new", "leaf").unwrap_err();
            assert!(matches!(err, MemError::LimitExceeded { .. }));
            assert_eq!(tree.len(), TREE_MAX_NODES);
            assert_caps(&tree);
        }

        #[test]
        fn test_invalid_paths_are_usage_errors() {
            let mut tree = TreeIndex::in_memory();
            assert_eq!(tree.add("root", "x").unwrap_err().kind(), ErrorKind::Usage);
            assert_eq!(tree.add("bad path", "x").unwrap_err().kind(), ErrorKind::Usage);
        }

        #[test]
        fn test_remove_guard_leaves_tree_unchanged() {
            let now = Utc::now();
            let mut tree = TreeIndex::in_memory();
            tree.add("work/a", "A").unwrap();
            tree.update_counts("work/a", 1, 0, now).unwrap();
            let before = tree.nodes().clone();

            let err = tree.remove("work").unwrap_err();
            assert!(matches!(err, MemError::NotEmpty { ref path, warm: 1, cold: 0 } if path == "work"));
            assert_eq!(tree.nodes(), &before);
        }

        #[test]
        fn test_remove_drops_descendants() {
            let mut tree = TreeIndex::in_memory();
            tree.add("work/a", "A").unwrap();
            tree.add("work/b", "B").unwrap();
            tree.add("home", "Home").unwrap();
            assert!(tree.remove("work").unwrap());
            assert_eq!(tree.len(), 2);
            assert!(!tree.node("root").unwrap().children.contains("work"));
            assert!(!tree.remove("work").unwrap());
            assert!(!tree.remove("root").unwrap());
        }

        #[test]
        fn test_update_counts_propagates_and_clamps() {
            let now = Utc::now();
            let mut tree = TreeIndex::in_memory();
            tree.add("work/a", "A").unwrap();
            tree.update_counts("work/a", 2, 1, now).unwrap();
            assert_eq!(tree.node("work").unwrap().warm_count, 2);
            assert_eq!(tree.node("root").unwrap().cold_count, 1);
            assert_eq!(tree.node("work/a").unwrap().last_access, Some(now));

            tree.update_counts("work/a", -5, 0, now).unwrap();
            assert_eq!(tree.node("work/a").unwrap().warm_count, 0);
            assert_eq!(tree.node("root").unwrap().warm_count, 0);
        }

        #[test]
        fn test_search_ties_break_by_path() {
            let now = Utc::now();
            let mut tree = TreeIndex::in_memory();
            tree.add("ops/deploy", "Deploys").unwrap();
            tree.add("ops/cron", "Cron jobs").unwrap();
            let hits = tree.search("ops", 5, now);
            let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
            assert_eq!(paths, vec!["ops", "ops/cron", "ops/deploy"]);
            assert!(tree.search("unrelated", 5, now).is_empty());
        }

        #[test]
        fn test_search_boosts_recent_access() {
            let now = Utc::now();
            let mut tree = TreeIndex::in_memory();
            tree.add("ops/cron", "Cron jobs").unwrap();
            tree.add("ops/deploy", "Deploys").unwrap();
            tree.update_counts("ops/deploy", 0, 0, now).unwrap();
            let hits = tree.search("ops", 1, now);
            assert_eq!(hits.len(), 1);
            // update_counts touches ancestors too, so `ops` ties with the leaf
            assert_eq!(hits[0].path, "ops");
            assert!((hits[0].score - 2.0).abs() < 1e-9);

            let hits = tree.search("cron deploy", 2, now);
            assert_eq!(hits[0].path, "ops/deploy");
        }

        #[test]
        fn test_recount_from_facts() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            for (cat, n) in [("work/projectA", 3), ("work/projectB", 2)] {
                for i in 0..n {
                    warm.insert(NewFact::new(format!("{cat} note {i}"), cat, 0.5), now + Duration::seconds(i)).unwrap();
                }
            }
            let mut tree = TreeIndex::in_memory();
            tree.add("work", "Work").unwrap();
            tree.add("work/projectA", "A").unwrap();
            tree.add("work/projectB", "B").unwrap();

            assert!(tree.recount(warm.facts()).unwrap());
            assert_eq!(tree.node("work").unwrap().warm_count, 5);
            assert_eq!(tree.node("work/projectA").unwrap().warm_count, 3);
            assert_eq!(tree.node("work/projectB").unwrap().warm_count, 2);
            assert_eq!(tree.node("root").unwrap().warm_count, 5);
            assert!(!tree.recount(warm.facts()).unwrap());
        }

        #[test]
        fn test_persisted_and_reopened() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("memory").join("memory-tree.json");
            let mut tree = TreeIndex::open(&path).unwrap();
            tree.add("ops/cron", "Cron").unwrap();

            let reopened = TreeIndex::open(&path).unwrap();
            assert_eq!(reopened.nodes(), tree.nodes());
            assert!(reopened.quarantined().is_none());
        }

        #[test]
        fn test_show_lists_nodes_depth_first() {
            let mut tree = TreeIndex::in_memory();
            tree.add("ops/cron", "Cron").unwrap();
            let shown = tree.show();
            let root_at = shown.find("root - Memory root").unwrap();
            let cron_at = shown.find("    ops/cron - Cron (warm:0, cold:0)").unwrap();
            assert!(root_at < cron_at);
            assert!(shown.contains("Total nodes: 3/50"));
        }
    }

    // ── Warm store ─────────────────────────────────────────────

    mod warm {
        use super::*;
        use tiermem_memory::warm::{EVICT_SCORE_THRESHOLD, WARM_MAX_BYTES, WARM_TTL_DAYS, serialized_size};
        use tiermem_memory::scorer::age_days;

        #[test]
        fn test_insert_then_search_finds_it() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let inserted = warm
                .insert(NewFact::new("Backups land in the eu-west bucket", "ops/backup", 0.7), now)
                .unwrap();
            assert_eq!(inserted.id.len(), 12);
            let hits = warm.search_keyword("backups bucket", 5, now);
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].fact.id, inserted.id);
            assert_eq!(warm.get(&inserted.id).unwrap().access_count, 0);
        }

        #[test]
        fn test_same_text_same_instant_gets_distinct_ids() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let a = warm.insert(NewFact::new("same", "misc", 0.5), now).unwrap();
            let b = warm.insert(NewFact::new("same", "misc", 0.5), now).unwrap();
            assert_ne!(a.id, b.id);
        }

        #[test]
        fn test_insert_validates_input() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            for bad in [
                NewFact::new("text", "bad category!", 0.5),
                NewFact::new("text", "ok", 1.5),
                NewFact::new("text", "ok", f64::NAN),
                NewFact::new("   ", "ok", 0.5),
            ] {
                assert_eq!(warm.insert(bad, now).unwrap_err().kind(), ErrorKind::Usage);
            }
            assert!(warm.is_empty());
        }

        #[test]
        fn test_size_cap_holds_after_every_insert() {
            let start = Utc::now();
            let mut warm = WarmStore::in_memory();
            for i in 0..200 {
                let importance = (i % 10) as f64 / 10.0;
                let result = warm.insert(
                    NewFact::new(filler(i, 500), "load/test", importance),
                    start + Duration::seconds(i as i64),
                );
                if let Err(e) = result {
                    assert_eq!(e.kind(), ErrorKind::LimitExceeded);
                }
                assert!(serialized_size(warm.facts()).unwrap() <= WARM_MAX_BYTES);
            }
            assert!(warm.len() > 1);
        }

        #[test]
        fn test_insert_rejected_when_new_fact_ranks_lowest() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let mut i = 0;
            loop {
                let inserted = warm
                    .insert(NewFact::new(filler(i, 500), "load", 0.9), now + Duration::seconds(i as i64))
                    .unwrap();
                i += 1;
                if !inserted.evicted.is_empty() {
                    break;
                }
            }
            let before = warm.facts().to_vec();
            let err = warm
                .insert(NewFact::new(filler(i, 500), "load", 0.0), now + Duration::seconds(i as i64))
                .unwrap_err();
            assert!(matches!(err, MemError::LimitExceeded { .. }));
            assert_eq!(warm.facts(), before.as_slice());
        }

        #[test]
        fn test_evict_expired_applies_ttl_and_threshold() {
            let now = Utc::now();
            let old = now - Duration::days(45);
            let mut warm = WarmStore::in_memory();
            let f1 = warm.insert(NewFact::new("keep this important fact", "ops", 0.9), old).unwrap();
            let f2 = warm.insert(NewFact::new("drop this trivial fact", "ops", 0.1), old).unwrap();
            let fresh = warm.insert(NewFact::new("fresh low fact", "ops", 0.1), now).unwrap();

            let evicted = warm.evict_expired(now).unwrap();
            assert_eq!(evicted.len(), 1);
            assert_eq!(evicted[0].id, f2.id);
            assert!(warm.get(&f1.id).is_some());
            assert!(warm.get(&fresh.id).is_some());
            for fact in warm.facts() {
                assert!(!(age_days(fact.created_at, now) > WARM_TTL_DAYS && fact.score(now) < EVICT_SCORE_THRESHOLD));
            }
            assert!(warm.evict_expired(now).unwrap().is_empty());
        }

        #[test]
        fn test_expired_is_read_only_until_removed() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("warm-memory.json");
            let now = Utc::now();
            let mut warm = WarmStore::open(&path).unwrap();
            let stale = warm.insert(NewFact::new("stale note", "ops", 0.1), now - Duration::days(45)).unwrap();
            warm.insert(NewFact::new("fresh note", "ops", 0.5), now).unwrap();
            let before = std::fs::read(&path).unwrap();

            let expired = warm.expired(now);
            assert_eq!(expired.len(), 1);
            assert_eq!(expired[0].id, stale.id);
            assert_eq!(warm.len(), 2);
            assert_eq!(std::fs::read(&path).unwrap(), before);

            let ids = std::collections::HashSet::from([stale.id.as_str()]);
            assert_eq!(warm.remove(&ids).unwrap(), 1);
            assert_eq!(WarmStore::open(&path).unwrap().len(), 1);
            assert_eq!(warm.remove(&ids).unwrap(), 0);
        }

        #[test]
        fn test_staged_insert_writes_nothing_until_applied() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let staged = warm.stage_insert(NewFact::new("staged note", "ops", 0.5), now).unwrap();
            assert!(warm.is_empty());
            assert!(staged.evicted().is_empty());
            let id = staged.id().to_string();
            let inserted = warm.apply_insert(staged).unwrap();
            assert_eq!(inserted.id, id);
            assert!(warm.get(&id).is_some());
        }

        #[test]
        fn test_stale_staged_insert_is_refused() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let staged = warm.stage_insert(NewFact::new("first", "ops", 0.5), now).unwrap();
            warm.insert(NewFact::new("second", "ops", 0.5), now).unwrap();
            let err = warm.apply_insert(staged).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::StateStale);
            assert_eq!(warm.len(), 1);
        }

        #[test]
        fn test_recall_touches_only_returned_facts() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let a = warm.insert(NewFact::new("deploy pipeline notes", "ops", 0.9), now).unwrap();
            let b = warm.insert(NewFact::new("deploy checklist", "ops", 0.2), now).unwrap();
            let c = warm.insert(NewFact::new("unrelated", "misc", 0.5), now).unwrap();

            let hits = warm.recall("deploy", 1, now).unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].fact.id, a.id);
            assert_eq!(warm.get(&a.id).unwrap().access_count, 1);
            assert_eq!(warm.get(&b.id).unwrap().access_count, 0);
            assert_eq!(warm.get(&c.id).unwrap().access_count, 0);

            warm.search_keyword("deploy", 5, now);
            warm.by_category("ops", 5, now);
            assert_eq!(warm.get(&a.id).unwrap().access_count, 1);
        }

        #[test]
        fn test_by_category_is_component_wise() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            warm.insert(NewFact::new("one", "work/a", 0.5), now).unwrap();
            warm.insert(NewFact::new("two", "work/ab", 0.5), now).unwrap();
            warm.insert(NewFact::new("three", "work/a/x", 0.5), now).unwrap();
            let hits = warm.by_category("work/a", 10, now);
            let mut cats: Vec<&str> = hits.iter().map(|h| h.fact.category.as_str()).collect();
            cats.sort();
            assert_eq!(cats, vec!["work/a", "work/a/x"]);
        }

        #[test]
        fn test_equal_scores_prefer_newer_then_smaller_id() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let older = warm.insert(NewFact::new("alpha", "t", 0.5), now - Duration::seconds(1)).unwrap();
            let newer = warm.insert(NewFact::new("beta", "t", 0.5), now - Duration::seconds(1)).unwrap();
            let listed = warm.list(now - Duration::seconds(1));
            let expected_first = if newer.id < older.id { &newer.id } else { &older.id };
            assert_eq!(&listed[0].fact.id, expected_first);

            let latest = warm.insert(NewFact::new("gamma", "t", 0.5), now).unwrap();
            // at `now` the newest fact has decayed least
            assert_eq!(warm.list(now)[0].fact.id, latest.id);
        }

        #[test]
        fn test_tags_any_and_all() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let both = warm
                .insert(NewFact::new("x", "t", 0.5).with_tags(vec!["Ops".into(), "cron".into()]), now)
                .unwrap();
            warm.insert(NewFact::new("y", "t", 0.5).with_tags(vec!["ops".into()]), now).unwrap();
            warm.insert(NewFact::new("z", "t", 0.5), now).unwrap();

            let tags = vec!["ops".to_string(), "cron".to_string()];
            assert_eq!(warm.search_by_tags(&tags, TagMode::Any, 10, now).len(), 2);
            let all = warm.search_by_tags(&tags, TagMode::All, 10, now);
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].fact.id, both.id);
        }

        #[test]
        fn test_auto_tag_extends_tags() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let inserted = warm
                .insert(
                    NewFact::new("Rotate the staging credentials", "ops", 0.5)
                        .with_tags(vec!["security".into()])
                        .with_auto_tag(true),
                    now,
                )
                .unwrap();
            let tags = &warm.get(&inserted.id).unwrap().tags;
            assert_eq!(tags, &vec!["security", "rotate", "staging", "credentials"]);
        }

        #[test]
        fn test_recent_and_stats() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            for i in 0..4 {
                warm.insert(NewFact::new(format!("note {i}"), if i % 2 == 0 { "a" } else { "b" }, 0.5), now + Duration::seconds(i))
                    .unwrap();
            }
            let recent = warm.recent(2, now);
            assert_eq!(recent[0].fact.text, "note 3");
            assert_eq!(recent[1].fact.text, "note 2");

            let stats = warm.stats().unwrap();
            assert_eq!(stats.count, 4);
            assert_eq!(stats.categories["a"], 2);
            assert_eq!(stats.oldest, Some(now));
            assert_eq!(stats.newest, Some(now + Duration::seconds(3)));
        }

        #[test]
        fn test_persists_and_quarantines_corrupt_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("warm-memory.json");
            let now = Utc::now();
            {
                let mut warm = WarmStore::open(&path).unwrap();
                warm.insert(NewFact::new("persist me", "misc", 0.5), now).unwrap();
            }
            let raw = std::fs::read_to_string(&path).unwrap();
            assert!(raw.starts_with("[\n  {"));
            assert!(raw.ends_with("}\n]\n"));
            assert_eq!(WarmStore::open(&path).unwrap().len(), 1);

            std::fs::write(&path, "{ not json").unwrap();
            let warm = WarmStore::open(&path).unwrap();
            assert!(warm.is_empty());
            let quarantined = warm.quarantined().unwrap();
            assert!(quarantined.exists());
            assert!(quarantined.file_name().unwrap().to_string_lossy().contains(".corrupt-"));
        }
    }

    // ── Hot digest ─────────────────────────────────────────────

    mod hot {
        use super::*;
        use serde_json::json;
        use tiermem_memory::hot::HOT_MAX_BYTES;

        fn state_with_identity() -> HotState {
            let mut state = HotState::default();
            state.apply(HotKey::Owner, json!({"name": "Sam", "timezone": "UTC"})).unwrap();
            state.apply(HotKey::Agent, json!({"role": "ops assistant"})).unwrap();
            for i in 0..3 {
                state
                    .apply(HotKey::Project, json!({"name": format!("project {i}"), "status": "active"}))
                    .unwrap();
            }
            for i in 0..5 {
                state.apply(HotKey::Lesson, json!({"text": format!("lesson number {i}")})).unwrap();
            }
            state
        }

        #[test]
        fn test_truncation_keeps_identity_and_some_context() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            for i in 0..40 {
                let cat = format!("area{}", i % 4);
                warm.insert(NewFact::new(filler(i, 200), cat, 0.5), now - Duration::minutes(i as i64)).unwrap();
            }
            let mut state = state_with_identity();
            for i in 5..20 {
                state
                    .apply(HotKey::Lesson, json!(format!("lesson {i}: keep deploys small, reversible and observed")))
                    .unwrap();
            }
            let digest = HotBuilder::render(&state, &warm, 5, now);
            assert!(digest.bytes <= HOT_MAX_BYTES);
            assert_eq!(digest.bytes, digest.content.len());
            assert!(digest.pruned_lines > 0);
            assert!(!digest.truncated);
            assert!(digest.content.contains("## Active Projects"));
            assert!(digest.content.contains("## Key Learnings"));
            let recent = digest.content.split("## Recent Context").nth(1).unwrap();
            assert!(recent.lines().any(|l| l.starts_with("- [")));
        }

        #[test]
        fn test_sections_in_order() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            warm.insert(NewFact::new("short note", "misc", 0.5), now).unwrap();
            let digest = HotBuilder::render(&state_with_identity(), &warm, 1, now);
            let order = ["## About Sam", "## Agent Identity", "## Active Projects", "## Key Learnings", "## Recent Context", "*Auto-generated:"];
            let positions: Vec<usize> = order.iter().map(|h| digest.content.find(h).unwrap()).collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(digest.pruned_lines, 0);
        }

        #[test]
        fn test_oversized_identity_is_cut_under_cap() {
            let now = Utc::now();
            let mut state = HotState::default();
            let mut owner = serde_json::Map::new();
            for i in 0..60 {
                owner.insert(format!("field{i:02}"), json!("v".repeat(400)));
            }
            state.apply(HotKey::Owner, serde_json::Value::Object(owner)).unwrap();
            let digest = HotBuilder::render(&state, &WarmStore::in_memory(), 1, now);
            assert!(digest.bytes <= HOT_MAX_BYTES);
            assert!(digest.truncated);
            assert!(digest.content.ends_with('\n'));
        }

        #[test]
        fn test_multibyte_identity_cut_on_char_boundary() {
            let now = Utc::now();
            // Shifting the first lesson by 0..3 bytes lands the cap inside a
            // three-byte character for at least one of the offsets.
            for pad in 0..3 {
                let mut state = HotState::default();
                for i in 0..20 {
                    let prefix = if i == 0 { "x".repeat(pad) } else { String::new() };
                    let text = format!("{prefix}{i:02}{}", "记".repeat(197));
                    state.apply(HotKey::Lesson, json!(text)).unwrap();
                }
                let digest = HotBuilder::render(&state, &WarmStore::in_memory(), 1, now);
                assert!(digest.bytes <= HOT_MAX_BYTES);
                assert!(digest.truncated);
                assert!(digest.content.ends_with('\n'));
                assert!(digest.content.contains("## Key Learnings"));
            }
        }

        #[test]
        fn test_rebuild_writes_file() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("MEMORY.md");
            let digest = HotBuilder::rebuild(&HotState::default(), &WarmStore::in_memory(), 1, &out, Utc::now()).unwrap();
            let written = std::fs::read_to_string(&out).unwrap();
            assert_eq!(written.len(), digest.bytes);
            assert!(written.starts_with("# MEMORY.md"));
        }

        #[test]
        fn test_state_roundtrip_on_disk() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("hot-memory-state.json");
            let state = state_with_identity();
            state.save(&path).unwrap();
            let loaded = HotState::load(&path).unwrap();
            assert_eq!(loaded.value, state);
            assert!(loaded.quarantined.is_none());
        }
    }

    // ── Cold store ─────────────────────────────────────────────

    mod cold {
        use super::*;
        use async_trait::async_trait;
        use std::sync::Arc;
        use tiermem_memory::cold::StatementResult;

        fn record(id: &str, text: &str, importance: f64, created_at: DateTime<Utc>) -> ColdRecord {
            ColdRecord {
                id: id.into(),
                text: text.into(),
                category: "archive".into(),
                importance,
                created_at,
                access_count: 0,
            }
        }

        async fn store() -> ColdStore {
            let cold = ColdStore::new(Arc::new(SqliteTransport::in_memory().unwrap()));
            cold.init_schema().await.unwrap();
            cold
        }

        struct FailingTransport;

        #[async_trait]
        impl ColdTransport for FailingTransport {
            async fn execute(&self, _batch: &[Statement]) -> tiermem_core::Result<Vec<StatementResult>> {
                Err(MemError::Remote("connection refused".into()))
            }

            fn name(&self) -> &str {
                "failing"
            }
        }

        #[tokio::test]
        async fn test_init_schema_is_idempotent() {
            let cold = store().await;
            cold.init_schema().await.unwrap();
        }

        #[tokio::test]
        async fn test_append_ignores_duplicate_ids() {
            let cold = store().await;
            let r = record("abc", "rotation schedule", 0.5, Utc::now());
            assert!(cold.append(&r).await.unwrap());
            assert!(!cold.append(&r).await.unwrap());
        }

        #[tokio::test]
        async fn test_query_orders_by_importance_then_recency() {
            let cold = store().await;
            let now = Utc::now();
            cold.append(&record("a", "key rotation old", 0.5, now - Duration::days(2))).await.unwrap();
            cold.append(&record("b", "key rotation new", 0.5, now)).await.unwrap();
            cold.append(&record("c", "important rotation", 0.9, now - Duration::days(9))).await.unwrap();
            cold.append(&record("d", "nothing relevant", 1.0, now)).await.unwrap();

            let hits = cold.try_query_keyword(&["rotation".into()], 10).await.unwrap();
            let ids: Vec<&str> = hits.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids, vec!["c", "b", "a"]);
            assert_eq!(hits[0].created_at.timestamp(), (now - Duration::days(9)).timestamp());

            let limited = cold.try_query_keyword(&["rotation".into()], 1).await.unwrap();
            assert_eq!(limited.len(), 1);
        }

        #[tokio::test]
        async fn test_query_treats_wildcards_literally() {
            let cold = store().await;
            cold.append(&record("a", "50% off", 0.5, Utc::now())).await.unwrap();
            cold.append(&record("b", "500 items", 0.5, Utc::now())).await.unwrap();
            let hits = cold.try_query_keyword(&["0%".into()], 10).await.unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].id, "a");
        }

        #[tokio::test]
        async fn test_failures_surface_as_empty_results() {
            let cold = ColdStore::new(Arc::new(FailingTransport));
            assert!(cold.query_keyword(&["anything".into()], 5).await.is_empty());
            let err = cold.try_query_keyword(&["anything".into()], 5).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Io);
        }

        #[tokio::test]
        async fn test_from_url_opens_local_file() {
            let dir = tempfile::tempdir().unwrap();
            let url = format!("file:{}", dir.path().join("cold.db").display());
            let cold = ColdStore::from_url(&url, None, std::time::Duration::from_secs(1)).unwrap();
            assert_eq!(cold.transport_name(), "sqlite");
            cold.init_schema().await.unwrap();
            assert!(dir.path().join("cold.db").exists());
        }

        #[test]
        fn test_from_url_rejects_hostless_remote() {
            let err = ColdStore::from_url("https://", None, std::time::Duration::from_secs(1)).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    // ── Cold over HTTP ─────────────────────────────────────────

    mod http {
        use super::*;
        use httpmock::{Method::POST, MockServer};
        use serde_json::json;
        use std::sync::Arc;
        use std::time::Duration as StdDuration;

        fn transport(server: &MockServer, timeout: StdDuration) -> HttpPipelineTransport {
            HttpPipelineTransport::new(&server.base_url(), Some("secret".into()), timeout)
                .unwrap()
                .with_retry_backoff(StdDuration::from_millis(10))
        }

        fn ok_execute(affected: u64) -> serde_json::Value {
            json!({"type": "ok", "response": {"type": "execute", "result": {
                "cols": [], "rows": [], "affected_row_count": affected}}})
        }

        #[tokio::test]
        async fn test_append_sends_bearer_token_and_close() {
            let server = MockServer::start();
            let pipeline = server.mock(|when, then| {
                when.method(POST)
                    .path("/v2/pipeline")
                    .header("authorization", "Bearer secret")
                    .body_includes("INSERT OR IGNORE INTO cold_memories")
                    .body_includes("\"type\":\"close\"");
                then.status(200).json_body(json!({
                    "results": [ok_execute(1), {"type": "ok", "response": {"type": "close"}}]
                }));
            });

            let cold = ColdStore::new(Arc::new(transport(&server, StdDuration::from_secs(5))));
            let record = ColdRecord::new("runbook for failover", "ops", 0.6, Utc::now());
            assert!(cold.append(&record).await.unwrap());
            pipeline.assert();
        }

        #[tokio::test]
        async fn test_query_decodes_typed_rows() {
            let server = MockServer::start();
            let created = Utc::now().timestamp();
            server.mock(|when, then| {
                when.method(POST).path("/v2/pipeline").body_includes("SELECT id, text");
                then.status(200).json_body(json!({"results": [
                    {"type": "ok", "response": {"type": "execute", "result": {"rows": [[
                        {"type": "text", "value": "abc"},
                        {"type": "text", "value": "failover drill"},
                        {"type": "text", "value": "ops"},
                        {"type": "float", "value": 0.7},
                        {"type": "integer", "value": created.to_string()},
                        {"type": "integer", "value": "2"}
                    ]]}}},
                    {"type": "ok", "response": {"type": "close"}}
                ]}));
            });

            let cold = ColdStore::new(Arc::new(transport(&server, StdDuration::from_secs(5))));
            let hits = cold.try_query_keyword(&["failover".into()], 5).await.unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].id, "abc");
            assert_eq!(hits[0].created_at.timestamp(), created);
            assert_eq!(hits[0].access_count, 2);
        }

        #[tokio::test]
        async fn test_server_error_is_retried_once() {
            let server = MockServer::start();
            let pipeline = server.mock(|when, then| {
                when.method(POST).path("/v2/pipeline");
                then.status(503).body("overloaded");
            });

            let t = transport(&server, StdDuration::from_secs(5));
            let err = t.execute(&[Statement::new("SELECT 1")]).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Io);
            assert!(err.to_string().contains("503"));
            pipeline.assert_calls(2);
        }

        #[tokio::test]
        async fn test_timeout_is_retried_once() {
            let server = MockServer::start();
            let pipeline = server.mock(|when, then| {
                when.method(POST).path("/v2/pipeline");
                then.status(200)
                    .delay(StdDuration::from_millis(600))
                    .json_body(json!({"results": [ok_execute(0)]}));
            });

            let t = transport(&server, StdDuration::from_millis(100));
            assert!(t.execute(&[Statement::new("SELECT 1")]).await.is_err());
            pipeline.assert_calls(2);
        }

        #[tokio::test]
        async fn test_client_error_is_not_retried() {
            let server = MockServer::start();
            let pipeline = server.mock(|when, then| {
                when.method(POST).path("/v2/pipeline");
                then.status(401).body("bad token");
            });

            let t = transport(&server, StdDuration::from_secs(5));
            let err = t.execute(&[Statement::new("SELECT 1")]).await.unwrap_err();
            assert!(err.to_string().contains("401"));
            pipeline.assert_calls(1);
        }

        #[tokio::test]
        async fn test_malformed_body_fails_without_retry() {
            let server = MockServer::start();
            let pipeline = server.mock(|when, then| {
                when.method(POST).path("/v2/pipeline");
                then.status(200).body("<html>not json</html>");
            });

            let t = transport(&server, StdDuration::from_secs(5));
            let err = t.execute(&[Statement::new("SELECT 1")]).await.unwrap_err();
            assert!(err.to_string().contains("malformed cold response"));
            pipeline.assert_calls(1);
        }

        #[tokio::test]
        async fn test_missing_or_failed_results_fail_the_batch() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(POST).path("/v2/pipeline").body_includes("FROM missing");
                then.status(200).json_body(json!({"results": [
                    {"type": "error", "error": {"message": "no such table: missing"}},
                    {"type": "ok", "response": {"type": "close"}}
                ]}));
            });
            server.mock(|when, then| {
                when.method(POST).path("/v2/pipeline").body_includes("SELECT 2");
                then.status(200).json_body(json!({"results": []}));
            });

            let t = transport(&server, StdDuration::from_secs(5));
            let err = t.execute(&[Statement::new("SELECT * FROM missing")]).await.unwrap_err();
            assert!(err.to_string().contains("no such table"));
            let err = t.execute(&[Statement::new("SELECT 2")]).await.unwrap_err();
            assert!(err.to_string().contains("0 results for 1 statements"));
        }
    }

    // ── Retriever ──────────────────────────────────────────────

    mod retriever {
        use super::*;
        use std::sync::Arc;

        #[tokio::test]
        async fn test_simple_insert_and_retrieve() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let mut tree = TreeIndex::in_memory();
            let inserted = warm
                .insert(NewFact::new("The API key rotation runs at 03:00 UTC", "ops/cron", 0.8), now)
                .unwrap();
            tree.add("ops/cron", "Cron").unwrap();
            tree.update_counts("ops/cron", 1, 0, now).unwrap();

            let results = Retriever::new(&tree, &mut warm, None).retrieve("rotation", 3, now).await.unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].category, "ops/cron");
            assert_eq!(results[0].tier, Tier::Warm);
            assert_eq!(warm.get(&inserted.id).unwrap().access_count, 1);
        }

        #[tokio::test]
        async fn test_tree_routed_and_keyword_hits_are_deduplicated() {
            let now = Utc::now();
            let mut warm = WarmStore::in_memory();
            let mut tree = TreeIndex::in_memory();
            warm.insert(NewFact::new("cron rotation at midnight", "ops/cron", 0.8), now).unwrap();
            warm.insert(NewFact::new("cron cleanup job", "ops/cron", 0.4), now).unwrap();
            tree.add("ops/cron", "Cron").unwrap();

            let results = Retriever::new(&tree, &mut warm, None).retrieve("cron", 10, now).await.unwrap();
            assert_eq!(results.len(), 2);
            assert!(results.iter().all(|r| r.tree_relevance.is_some()));
            assert!(results[0].rank_key() >= results[1].rank_key());
        }

        #[tokio::test]
        async fn test_cold_fills_shortfall_without_reinforcing() {
            let now = Utc::now();
            let cold = ColdStore::new(Arc::new(SqliteTransport::in_memory().unwrap()));
            cold.init_schema().await.unwrap();
            let archived = ColdRecord::new("old rotation runbook", "ops", 0.6, now - Duration::days(90));
            cold.append(&archived).await.unwrap();

            let mut warm = WarmStore::in_memory();
            warm.insert(NewFact::new("rotation moved to 04:00", "ops", 0.9), now).unwrap();
            let tree = TreeIndex::in_memory();

            let results = Retriever::new(&tree, &mut warm, Some(&cold)).retrieve("rotation", 5, now).await.unwrap();
            assert_eq!(results.len(), 2);
            let cold_item = results.iter().find(|r| r.tier == Tier::Cold).unwrap();
            assert_eq!(cold_item.id, archived.id);
            assert!(cold_item.score.is_none());

            let again = cold.try_query_keyword(&["rotation".into()], 5).await.unwrap();
            assert_eq!(again[0].access_count, 0);
        }

        #[tokio::test]
        async fn test_cold_skipped_when_warm_fills_limit() {
            let now = Utc::now();
            let cold = ColdStore::new(Arc::new(SqliteTransport::in_memory().unwrap()));
            cold.init_schema().await.unwrap();
            cold.append(&ColdRecord::new("rotation archive", "ops", 1.0, now)).await.unwrap();

            let mut warm = WarmStore::in_memory();
            warm.insert(NewFact::new("rotation now", "ops", 0.1), now).unwrap();
            let tree = TreeIndex::in_memory();

            let results = Retriever::new(&tree, &mut warm, Some(&cold)).retrieve("rotation", 1, now).await.unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].tier, Tier::Warm);
        }
    }
}
