use super::*;

fn loaded_scene(store: &StateStore) -> SceneId {
    let id = store.next_scene_id();
    store.insert_scene(id, PathBuf::from(format!("{id}.blend")));
    store.set_scene_state(id, SceneState::Loaded, None).unwrap();
    id
}

fn camera(store: &StateStore, scene: SceneId) -> EntityId {
    let id = store.next_entity_id();
    store
        .insert_entity(Entity {
            id,
            scene,
            kind: EntityKind::Camera,
            pose: Pose::default(),
            intrinsics: None,
        })
        .unwrap();
    id
}

#[test]
fn entity_requires_loaded_scene() {
    let store = StateStore::new();
    let scene = store.next_scene_id();
    store.insert_scene(scene, PathBuf::from("a.blend"));
    let err = store
        .insert_entity(Entity {
            id: store.next_entity_id(),
            scene,
            kind: EntityKind::Camera,
            pose: Pose::default(),
            intrinsics: None,
        })
        .unwrap_err();
    assert!(matches!(err, ScenecamError::Validation(_)));
}

#[test]
fn pose_roundtrips_exactly() {
    let store = StateStore::new();
    let scene = loaded_scene(&store);
    let cam = camera(&store, scene);
    let pose = Pose::from_slice(&[0.1, -0.2, 5.0, 3.5, -7.25, 0.0]).unwrap();
    store.set_pose(cam, pose).unwrap();
    assert_eq!(store.entity(cam).unwrap().pose, pose);
}

#[test]
fn deleting_scene_cascades_to_entities() {
    let store = StateStore::new();
    let a = loaded_scene(&store);
    let b = loaded_scene(&store);
    let a1 = camera(&store, a);
    let a2 = camera(&store, a);
    let b1 = camera(&store, b);

    let (_, removed) = store.remove_scene(a).unwrap();
    assert_eq!(removed.len(), 2);
    for id in [a1, a2] {
        assert!(matches!(store.entity(id), Err(ScenecamError::NotFound(_))));
    }
    assert!(store.entity(b1).is_ok());
    assert!(matches!(store.list_entities(a), Err(ScenecamError::NotFound(_))));
}

#[test]
fn unknown_ids_are_not_found() {
    let store = StateStore::new();
    let scene = store.next_scene_id();
    let entity = store.next_entity_id();
    assert!(matches!(store.scene(scene), Err(ScenecamError::NotFound(_))));
    assert!(matches!(store.entity(entity), Err(ScenecamError::NotFound(_))));
    assert!(matches!(
        store.set_pose(entity, Pose::default()),
        Err(ScenecamError::NotFound(_))
    ));
    assert!(matches!(store.remove_entity(entity), Err(ScenecamError::NotFound(_))));
}

#[test]
fn live_entity_rejects_unloaded_scene() {
    let store = StateStore::new();
    let scene = loaded_scene(&store);
    let cam = camera(&store, scene);
    assert!(store.live_entity(cam).is_ok());
    store.set_scene_state(scene, SceneState::Loading, None).unwrap();
    assert!(matches!(store.live_entity(cam), Err(ScenecamError::Validation(_))));
}

#[test]
fn replay_loads_scenes_before_entities() {
    let store = StateStore::new();
    let res = Resolution::default();
    let a = loaded_scene(&store);
    let failed = store.next_scene_id();
    store.insert_scene(failed, PathBuf::from("bad.blend"));
    store
        .set_scene_state(failed, SceneState::Failed, Some("nope".into()))
        .unwrap();
    let cam = camera(&store, a);
    let k = CameraIntrinsics::new(50.0, 320.0, 240.0);
    store.set_intrinsics(cam, k).unwrap();

    let cmds = store.replay_commands(res);
    assert_eq!(cmds.len(), 2);
    assert!(matches!(&cmds[0], EngineCommand::LoadScene { scene, .. } if *scene == a));
    match &cmds[1] {
        EngineCommand::CreateEntity {
            entity, camera, ..
        } => {
            assert_eq!(*entity, cam);
            assert_eq!(*camera, Some(k.to_engine(res)));
        }
        other => panic!("unexpected replay command {other:?}"),
    }
}

#[test]
fn concurrent_readers_see_consistent_rows() {
    let store = std::sync::Arc::new(StateStore::new());
    let scene = loaded_scene(&store);
    let cam = camera(&store, scene);

    let writer = {
        let store = store.clone();
        std::thread::spawn(move || {
            for i in 0..200 {
                let v = f64::from(i);
                store.set_pose(cam, Pose::new([v, v, v], [0.0; 3]).unwrap()).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let p = store.entity(cam).unwrap().pose.position;
                    assert!(p[0] == p[1] && p[1] == p[2]);
                }
            })
        })
        .collect();
    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(store.entity(cam).unwrap().pose.position, [199.0; 3]);
}
