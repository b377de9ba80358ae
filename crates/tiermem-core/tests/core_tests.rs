#[cfg(test)]
mod tests {
    use tiermem_core::*;

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        let err = MemError::usage("unknown sub-command");
        assert!(err.to_string().contains("unknown sub-command"));
    }

    #[test]
    fn test_error_kinds_map_to_exit_codes() {
        assert_eq!(MemError::usage("x").exit_code(), exit::USAGE);
        assert_eq!(
            MemError::io_at("/tmp/x", std::io::Error::other("boom")).exit_code(),
            exit::IO
        );
        assert_eq!(MemError::Remote("timeout".into()).kind(), ErrorKind::Io);
        let limit = MemError::LimitExceeded {
            what: "tree nodes".into(),
            limit: 50,
            hint: "remove unused categories".into(),
        };
        assert_eq!(limit.kind(), ErrorKind::LimitExceeded);
        assert_eq!(limit.hint(), "remove unused categories");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: MemError = io_err.into();
        assert!(err.to_string().contains("file missing"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: MemError = serde_err.into();
        assert!(err.to_string().contains("serialization"));
    }

    #[test]
    fn test_kind_tags_are_single_words() {
        for kind in [
            ErrorKind::Usage,
            ErrorKind::NotFound,
            ErrorKind::LimitExceeded,
            ErrorKind::StateStale,
            ErrorKind::Io,
            ErrorKind::Corruption,
            ErrorKind::SourceParse,
        ] {
            assert!(!kind.as_str().contains(' '));
        }
    }

    // ── State file tests ───────────────────────────────────────

    #[test]
    fn test_write_json_atomic_uses_two_space_indent_and_lf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_json_atomic(&path, &serde_json::json!({"a": [1, 2]})).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"a\": ["));
        assert!(raw.ends_with('\n'));
        assert!(!raw.contains('\r'));
        // no temp files left behind
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Loaded<Vec<u32>> =
            load_json_or_default(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.value.is_empty());
        assert!(loaded.quarantined.is_none());
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.json");
        write_json_atomic(&path, &vec![3u32, 4, 5]).unwrap();
        let loaded: Loaded<Vec<u32>> = load_json_or_default(&path).unwrap();
        assert_eq!(loaded.value, vec![3, 4, 5]);
    }

    #[test]
    fn test_corrupt_state_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warm-memory.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let loaded: Loaded<Vec<u32>> = load_json_or_default(&path).unwrap();
        assert!(loaded.value.is_empty());
        let quarantined = loaded.quarantined.expect("file should be quarantined");
        assert!(quarantined.exists());
        assert!(!path.exists());
        let name = quarantined.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("warm-memory.json.corrupt-"));
        assert_eq!(
            std::fs::read_to_string(&quarantined).unwrap(),
            "{ this is not json"
        );
    }

    // ── Text tests ─────────────────────────────────────────────

    #[test]
    fn test_clip() {
        assert_eq!(text::clip("short", 10), "short");
        let clipped = text::clip("abcdefghij", 5);
        assert_eq!(clipped.chars().count(), 5);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(text::parent_path("work/projectA"), "work");
        assert_eq!(text::parent_path("work"), "root");
    }
}
