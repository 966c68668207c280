use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        ScenecamError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(ScenecamError::not_found("x").to_string().contains("not found:"));
    assert!(
        ScenecamError::scene_load("x")
            .to_string()
            .contains("scene load error:")
    );
    assert!(
        ScenecamError::from(EngineError::Timeout("x".into()))
            .to_string()
            .contains("engine timeout:")
    );
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = ScenecamError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn engine_kinds_stay_distinguishable() {
    let kinds = [
        ScenecamError::from(EngineError::Start("a".into())).kind(),
        ScenecamError::from(EngineError::Timeout("a".into())).kind(),
        ScenecamError::from(EngineError::Crash("a".into())).kind(),
        ScenecamError::from(EngineError::Protocol("a".into())).kind(),
        ScenecamError::from(EngineError::Command("a".into())).kind(),
        ScenecamError::from(EngineError::QueueClosed).kind(),
        ScenecamError::validation("a").kind(),
        ScenecamError::not_found("a").kind(),
        ScenecamError::scene_load("a").kind(),
    ];
    let unique: std::collections::HashSet<_> = kinds.iter().collect();
    assert_eq!(unique.len(), kinds.len());
}

#[test]
fn only_crash_and_timeout_are_transient() {
    assert!(EngineError::Crash("x".into()).is_transient());
    assert!(EngineError::Timeout("x".into()).is_transient());
    assert!(!EngineError::Protocol("x".into()).is_transient());
    assert!(!EngineError::Command("x".into()).is_transient());
    assert!(!EngineError::Start("x".into()).is_transient());
    assert!(!EngineError::QueueClosed.is_transient());
}
