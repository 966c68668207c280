use super::*;

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "scenecam_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

#[test]
fn put_numbers_files_and_remove_deletes_them() {
    let storage = FsSceneStorage::new(temp_dir("storage_put")).unwrap();
    let a = storage.put(b"first").unwrap();
    let b = storage.put(b"second").unwrap();
    assert_eq!(a.path.file_name().unwrap(), "1.blend");
    assert_eq!(b.path.file_name().unwrap(), "2.blend");
    assert_eq!(b.size, 6);
    assert_eq!(std::fs::read(&a.path).unwrap(), b"first");

    storage.remove(&a.path).unwrap();
    assert!(!a.path.exists());
    assert!(storage.remove(&a.path).is_err(), "second removal reports the missing file");
}

#[test]
fn numbering_continues_after_existing_files() {
    let dir = temp_dir("storage_resume");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("7.blend"), b"x").unwrap();
    std::fs::write(dir.join("notes.txt"), b"x").unwrap();
    let storage = FsSceneStorage::new(&dir).unwrap();
    assert_eq!(storage.put(b"y").unwrap().path.file_name().unwrap(), "8.blend");
}

#[test]
fn remove_refuses_foreign_paths() {
    let storage = FsSceneStorage::new(temp_dir("storage_foreign")).unwrap();
    let err = storage.remove(Path::new("/etc/passwd")).unwrap_err();
    assert!(matches!(err, ScenecamError::Validation(_)));
}
